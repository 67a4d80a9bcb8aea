//! Domain types used throughout the measurement pipeline.
//!
//! This module defines:
//!
//! - validated traces (`Trace`) and fit outputs (`FitResult`)
//! - measurement inputs (`Target`, `MeasureConfig`)
//! - per-attempt history and terminal results (`AttemptRecord`, `Measurement`)

pub mod types;

pub use types::*;
