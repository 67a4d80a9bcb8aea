//! RC charging model implementation.
//!
//! Kept as small, pure functions so that fitting/search code can stay generic.

pub mod charging;

pub use charging::*;
