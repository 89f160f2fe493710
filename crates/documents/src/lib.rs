//! Fiscal document domain module: request model, canonical document, builder.

pub mod builder;
pub mod document;
pub mod request;
pub mod totals;
pub mod xml;

pub use builder::{BuildIssue, BuilderConfig, DocumentBuilder, default_authorized_reader};
pub use document::{
    CanonicalDocument, ContributionLine, DocumentStatus, DocumentTotals, IcmsLine, LineItem, Party,
    ProductLine, ReformLine, ReformTotals,
};
pub use request::DocumentRequest;
pub use totals::accumulate_reform;
pub use xml::{XmlError, render_document};
