//! Statistical workspace model for ProFit.
//!
//! A workspace is a flat namespace of real-valued parameters plus named
//! derived functions, density components, model configurations (the
//! observable/POI/nuisance/global-observable partitions), datasets and
//! snapshots. This crate owns the persisted JSON schema, the runtime
//! representation, the structural model checks and the pre-fit parameter
//! preparation (including the POI directive mini-language).

pub mod check;
pub mod prep;
pub mod schema;
pub mod workspace;

pub use check::check_model;
pub use prep::PoiDirective;
pub use workspace::{Dataset, Mean, ModelConfig, Parameter, Pdf, PdfKind, Workspace};
