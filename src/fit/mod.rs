//! Charging-curve fitting.
//!
//! Responsibilities:
//!
//! - nonlinear least-squares fit of `(τ, V_max)` (`fitter`)
//! - log-spaced `τ` grids (`tau_grid`)
//! - grid-search seeding when no physical initial guess exists (`seed`)

pub mod fitter;
pub mod seed;
pub mod tau_grid;

pub use fitter::*;
pub use seed::*;
pub use tau_grid::*;
