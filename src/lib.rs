//! `rc-meter` library crate.
//!
//! The binary (`rcm`) is a thin wrapper around this library so that:
//!
//! - the convergence loop and fitter are testable without spawning processes
//! - trace sources can be swapped (simulator, capture file, instrument)
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod data;
pub mod debug;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod logging;
pub mod math;
pub mod measure;
pub mod models;
pub mod plot;
pub mod report;
