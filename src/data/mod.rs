//! Trace sources.
//!
//! A trace source turns an excitation request into a `Trace`. The controller
//! only sees the `TraceSource` trait, so a simulator, a recorded capture, or a
//! live instrument are interchangeable.

pub mod capture;
pub mod pulse;
pub mod sim;

pub use capture::CsvTraceSource;
pub use pulse::PulseSpec;
pub use sim::{RcSimulator, SimConfig};

use crate::domain::Trace;
use crate::error::MeasureError;

/// Excitation and circuit parameters for one trace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceRequest {
    pub resistance: f64,
    pub capacitance: Option<f64>,
    pub pulse_voltage: f64,
    pub period: f64,
}

/// Anything that can produce a charging transient on request.
///
/// Implementations should be stateless (or internally synchronised) so that
/// independent measurements can share one source across threads.
pub trait TraceSource {
    fn get_trace(&self, request: &TraceRequest) -> Result<Trace, MeasureError>;
}

impl<T: TraceSource + ?Sized> TraceSource for &T {
    fn get_trace(&self, request: &TraceRequest) -> Result<Trace, MeasureError> {
        (**self).get_trace(request)
    }
}
