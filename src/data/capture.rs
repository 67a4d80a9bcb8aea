//! Recorded trace source.
//!
//! Replays one captured transient (scope export, DAQ dump, simulator output)
//! for every request. The excitation parameters are ignored, so the controller
//! only changes which window of the capture it fits.

use std::path::Path;

use crate::data::{TraceRequest, TraceSource};
use crate::domain::Trace;
use crate::error::MeasureError;
use crate::io::ingest::read_trace_csv;

#[derive(Debug, Clone)]
pub struct CsvTraceSource {
    trace: Trace,
}

impl CsvTraceSource {
    pub fn open(path: &Path) -> Result<Self, MeasureError> {
        let ingested = read_trace_csv(path)?;
        tracing::info!(
            path = %path.display(),
            rows = ingested.rows_used,
            skipped = ingested.row_errors.len(),
            "loaded trace capture"
        );
        Ok(Self { trace: ingested.trace })
    }

    pub fn from_trace(trace: Trace) -> Self {
        Self { trace }
    }
}

impl TraceSource for CsvTraceSource {
    fn get_trace(&self, _request: &TraceRequest) -> Result<Trace, MeasureError> {
        Ok(self.trace.clone())
    }
}
