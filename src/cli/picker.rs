//! Interactive trace CSV picker.
//!
//! Kept separate from clap parsing:
//! - clap handles structured flags/subcommands
//! - the picker provides the "run `rcm fit` and choose a capture" UX
//!
//! Candidates are `*.csv` files under the current working directory.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use crate::error::AppError;

/// Directory recursion depth when looking for captures.
const DEFAULT_SEARCH_DEPTH: usize = 4;

/// Prompt on stdin/stdout for a trace CSV under the current directory.
pub fn prompt_for_trace_path() -> Result<PathBuf, AppError> {
    let files = discover_csv_files(Path::new("."));
    if files.is_empty() {
        return Err(AppError::new(
            2,
            "No .csv files found. Provide a trace with `rcm fit --trace <file.csv>`.",
        ));
    }

    let stdin = io::stdin();
    select_from(&files, stdin.lock(), io::stdout())
}

/// Run the selection dialogue over arbitrary streams.
///
/// Accepts a list number or an explicit path; `q` cancels. Invalid answers
/// re-prompt until input runs out.
pub fn select_from<R: BufRead, W: Write>(files: &[PathBuf], mut input: R, mut output: W) -> Result<PathBuf, AppError> {
    let io_err = |e: io::Error| AppError::new(2, format!("Picker I/O failed: {e}"));

    writeln!(output, "Found {} trace CSV file(s):", files.len()).map_err(io_err)?;
    for (idx, path) in files.iter().enumerate() {
        writeln!(output, "{:>3}) {}", idx + 1, pretty_path(path)).map_err(io_err)?;
    }

    loop {
        write!(output, "Select a trace by number (1-{}) or type a path (q to quit): ", files.len()).map_err(io_err)?;
        output.flush().map_err(io_err)?;

        let mut line = String::new();
        if input.read_line(&mut line).map_err(io_err)? == 0 {
            return Err(AppError::new(
                2,
                "No input received. Provide a trace with `rcm fit --trace <file.csv>`.",
            ));
        }

        let answer = line.trim();
        if answer.eq_ignore_ascii_case("q") {
            return Err(AppError::new(2, "Canceled."));
        }

        if let Ok(choice) = answer.parse::<usize>() {
            if (1..=files.len()).contains(&choice) {
                return validate_csv_path(&files[choice - 1]);
            }
            writeln!(output, "Invalid choice: {choice}. Enter a number between 1 and {}.", files.len())
                .map_err(io_err)?;
            continue;
        }

        match validate_csv_path(Path::new(answer)) {
            Ok(path) => return Ok(path),
            Err(err) => writeln!(output, "{err}").map_err(io_err)?,
        }
    }
}

/// Check that `path` is an existing `.csv` file.
pub fn validate_csv_path(path: &Path) -> Result<PathBuf, AppError> {
    if !path.exists() {
        return Err(AppError::new(2, format!("Trace CSV not found: {}", path.display())));
    }
    if path.is_dir() {
        return Err(AppError::new(
            2,
            format!("Expected a file, got a directory: {}", path.display()),
        ));
    }
    if !has_csv_extension(path) {
        return Err(AppError::new(
            2,
            format!("Expected a .csv trace (got: {}).", path.display()),
        ));
    }
    Ok(path.to_path_buf())
}

/// `*.csv` files under `root`, sorted by display path.
pub fn discover_csv_files(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    walk(root, 0, &mut out);
    out.sort_by_key(|p| pretty_path(p));
    out
}

fn walk(dir: &Path, depth: usize, out: &mut Vec<PathBuf>) {
    if depth > DEFAULT_SEARCH_DEPTH {
        return;
    }
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_dir() {
            if !should_skip_dir(&path) {
                walk(&path, depth + 1, out);
            }
        } else if file_type.is_file() && has_csv_extension(&path) {
            out.push(path);
        }
    }
}

fn has_csv_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

fn should_skip_dir(path: &Path) -> bool {
    let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
    matches!(name, ".git" | "target" | "node_modules" | "debug")
}

fn pretty_path(path: &Path) -> String {
    path.strip_prefix("./").unwrap_or(path).display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, Vec<PathBuf>) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("caps")).unwrap();
        fs::create_dir_all(dir.path().join("target")).unwrap();
        fs::write(dir.path().join("b.csv"), "time,voltage\n").unwrap();
        fs::write(dir.path().join("caps/a.CSV"), "time,voltage\n").unwrap();
        fs::write(dir.path().join("target/skip.csv"), "time,voltage\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        let files = discover_csv_files(dir.path());
        (dir, files)
    }

    #[test]
    fn discovers_csvs_and_skips_build_dirs() {
        let (_dir, files) = setup();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|p| p.file_name().is_some_and(|n| n != "skip.csv")));
    }

    #[test]
    fn picks_by_number_after_bad_answer() {
        let (_dir, files) = setup();
        let mut shown = Vec::new();
        let picked = select_from(&files, "7\n2\n".as_bytes(), &mut shown).unwrap();
        assert_eq!(picked, files[1]);
        assert!(String::from_utf8(shown).unwrap().contains("Invalid choice: 7"));
    }

    #[test]
    fn quit_and_eof_cancel() {
        let (_dir, files) = setup();
        assert!(select_from(&files, "q\n".as_bytes(), Vec::new()).is_err());
        assert!(select_from(&files, "".as_bytes(), Vec::new()).is_err());
    }

    #[test]
    fn rejects_non_csv_paths() {
        let (dir, _files) = setup();
        assert!(validate_csv_path(&dir.path().join("notes.txt")).is_err());
        assert!(validate_csv_path(&dir.path().join("missing.csv")).is_err());
        assert!(validate_csv_path(dir.path()).is_err());
    }
}
