//! Exports: measurement JSON and trace CSV.
//!
//! The JSON file is the portable record of one measurement (inputs, settings,
//! result and full attempt history). The trace CSV uses the same schema the
//! ingest side reads, so simulated traces can be fed back through `rcm fit`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::Local;

use crate::domain::{MeasureConfig, Measurement, MeasurementFile, Target, Trace};
use crate::error::AppError;

/// Assemble the JSON record for a measurement.
pub fn measurement_file(
    target: Target,
    pulse_voltage: f64,
    initial_period: f64,
    config: &MeasureConfig,
    measurement: &Measurement,
) -> MeasurementFile {
    MeasurementFile {
        tool: format!("rcm {}", env!("CARGO_PKG_VERSION")),
        generated: Local::now(),
        target,
        pulse_voltage,
        initial_period,
        config: config.clone(),
        measurement: measurement.clone(),
    }
}

/// Write a measurement JSON file.
pub fn write_measurement_json(path: &Path, file: &MeasurementFile) -> Result<(), AppError> {
    let out = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create measurement JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(BufWriter::new(out), file)
        .map_err(|e| AppError::new(2, format!("Failed to write measurement JSON: {e}")))?;
    Ok(())
}

/// Read a measurement JSON file.
pub fn read_measurement_json(path: &Path) -> Result<MeasurementFile, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open measurement JSON '{}': {e}", path.display())))?;
    serde_json::from_reader(file).map_err(|e| AppError::new(2, format!("Invalid measurement JSON: {e}")))
}

/// Write a trace as `time,voltage` CSV.
pub fn write_trace_csv(path: &Path, trace: &Trace) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create trace CSV '{}': {e}", path.display())))?;
    let mut out = BufWriter::new(file);

    writeln!(out, "time,voltage").map_err(|e| AppError::new(2, format!("Failed to write trace CSV header: {e}")))?;
    for (t, v) in trace.times().iter().zip(trace.voltages()) {
        writeln!(out, "{t:e},{v:e}").map_err(|e| AppError::new(2, format!("Failed to write trace CSV row: {e}")))?;
    }
    out.flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush trace CSV: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MeasurementStatus;
    use crate::io::ingest::read_trace_csv;

    #[test]
    fn trace_csv_reads_back_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.csv");
        let trace = Trace::new(vec![0.0, 1e-5, 2e-5], vec![0.0, 0.17346, 0.3406]).unwrap();

        write_trace_csv(&path, &trace).unwrap();
        let back = read_trace_csv(&path).unwrap();
        assert_eq!(back.trace, trace);
    }

    #[test]
    fn measurement_json_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        let measurement = Measurement {
            status: MeasurementStatus::Exhausted,
            attempts: 3,
            final_period: 0.01,
            fit: None,
            capacitance: None,
            error_percent: None,
            tau_ratio: None,
            history: Vec::new(),
        };
        let target = Target {
            resistance: 1e4,
            capacitance: Some(1e-8),
        };
        let file = measurement_file(target, 3.0, 0.02, &MeasureConfig::default(), &measurement);

        write_measurement_json(&path, &file).unwrap();
        let back = read_measurement_json(&path).unwrap();
        assert_eq!(back.measurement, measurement);
        assert_eq!(back.target, target);
        assert!(back.tool.starts_with("rcm "));
    }
}
