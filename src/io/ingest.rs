//! CSV trace ingest + validation.
//!
//! Expected schema: a header row with a time column and a voltage column, one
//! sample per row. Header names are matched case-insensitively and a UTF-8 BOM
//! on the first header is tolerated. Extra columns are ignored.
//!
//! Accepted names:
//! - time: `time`, `t`, `time_s`, `seconds`
//! - voltage: `voltage`, `v`, `vout`, `v(vout)`, `voltage_v`
//!
//! Rows that fail to parse are collected as `RowError`s rather than aborting
//! the whole file; the trace itself is then validated as a unit.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;

use crate::domain::Trace;
use crate::error::MeasureError;

const TIME_COLUMNS: &[&str] = &["time", "t", "time_s", "seconds"];
const VOLTAGE_COLUMNS: &[&str] = &["voltage", "v", "vout", "v(vout)", "voltage_v"];

/// A row-level parse problem.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    /// 1-based line number in the file.
    pub line: usize,
    pub message: String,
}

/// Result of reading a trace file.
#[derive(Debug, Clone)]
pub struct IngestedTrace {
    pub trace: Trace,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
    pub rows_used: usize,
}

/// Read a trace CSV file from disk.
pub fn read_trace_csv(path: &Path) -> Result<IngestedTrace, MeasureError> {
    let file = File::open(path)
        .map_err(|e| MeasureError::Source(format!("Failed to open trace CSV '{}': {e}", path.display())))?;
    read_trace_from_reader(file)
}

/// Read a trace CSV from any reader.
pub fn read_trace_from_reader<R: Read>(reader: R) -> Result<IngestedTrace, MeasureError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| MeasureError::Source(format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);

    let time_idx = find_column(&header_map, TIME_COLUMNS).ok_or_else(|| {
        MeasureError::InvalidParameter(format!(
            "Missing time column (expected one of: {}).",
            TIME_COLUMNS.join(", ")
        ))
    })?;
    let volt_idx = find_column(&header_map, VOLTAGE_COLUMNS).ok_or_else(|| {
        MeasureError::InvalidParameter(format!(
            "Missing voltage column (expected one of: {}).",
            VOLTAGE_COLUMNS.join(", ")
        ))
    })?;

    let mut times = Vec::new();
    let mut voltages = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // +2: records() starts after the header and lines are 1-based.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        match (parse_field(&record, time_idx), parse_field(&record, volt_idx)) {
            (Ok(t), Ok(v)) => {
                times.push(t);
                voltages.push(v);
            }
            (Err(message), _) | (_, Err(message)) => row_errors.push(RowError { line, message }),
        }
    }

    if !row_errors.is_empty() {
        tracing::warn!(
            skipped = row_errors.len(),
            first_line = row_errors[0].line,
            "skipped malformed trace rows"
        );
    }

    let rows_used = times.len();
    let trace = Trace::new(times, voltages)?;

    Ok(IngestedTrace {
        trace,
        row_errors,
        rows_read,
        rows_used,
    })
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports sometimes prefix the first header with a BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn find_column(header_map: &HashMap<String, usize>, names: &[&str]) -> Option<usize> {
    names.iter().find_map(|n| header_map.get(*n).copied())
}

fn parse_field(record: &StringRecord, idx: usize) -> Result<f64, String> {
    let raw = record
        .get(idx)
        .ok_or_else(|| format!("missing column {}", idx + 1))?;
    let value: f64 = raw
        .parse()
        .map_err(|_| format!("not a number: '{raw}'"))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(format!("non-finite value: '{raw}'"))
    }
}
