//! Likelihood construction and fit orchestration for ProFit.
//!
//! The minimization itself is delegated to argmin; this crate wraps it
//! behind an [`optimizer::ObjectiveFunction`] contract, builds the negative
//! log-likelihood from a workspace, and drives the multi-stage fit protocol
//! (point estimate, covariance pass, asymmetric-error pass).

pub mod errors;
pub mod fit;
pub mod minos;
pub mod nll;
pub mod optimizer;

pub use fit::{FitConfig, FitTool};
pub use nll::{NllFunction, NllOptions};
