//! Convergence control for capacitance estimation.
//!
//! - `controller`: the per-attempt state machine and the estimation loop
//! - `strategy`: how the excitation period moves between attempts

pub mod controller;
pub mod strategy;

pub use controller::*;
pub use strategy::*;
