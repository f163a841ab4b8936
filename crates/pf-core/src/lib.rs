//! Core types shared across the ProFit workspace.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::PoiEstimate;

/// Crate version string, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
