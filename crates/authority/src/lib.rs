//! Authority responses: parsing and classification.
//!
//! Everything here is a pure function of the raw response text. The
//! pipelines persist the raw response first and only then ask this crate
//! what it means.

pub mod classifier;
pub mod parse;
pub mod query;

pub use classifier::{Classification, CodeTable, OperationKind, Outcome, StatusLine, classify};
pub use parse::ParseError;
pub use query::{QueryReport, ServiceState, extract_report};
