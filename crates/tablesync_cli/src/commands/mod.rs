//! CLI command implementations.

pub mod classify;
pub mod status;
pub mod sync;
