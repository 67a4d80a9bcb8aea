//! Input/output helpers.
//!
//! - trace CSV ingest + validation (`ingest`)
//! - measurement JSON and trace CSV exports (`export`)

pub mod export;
pub mod ingest;

pub use export::*;
pub use ingest::*;
