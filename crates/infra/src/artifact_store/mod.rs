//! Artifact Store: keyed blob persistence for every file the pipelines
//! produce.
//!
//! Artifacts live in one namespace per kind. Their names are bit-exact (see
//! [`naming`]) because downstream tooling locates files by name.

pub mod fs;
pub mod in_memory;
pub mod naming;
pub mod r#trait;

use serde::Serialize;

pub use fs::FsArtifactStore;
pub use in_memory::InMemoryArtifactStore;
pub use r#trait::{ArtifactStore, ArtifactStoreError, PutOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Unsigned document as built.
    Generated,
    Signed,
    /// Proof of an authorized document (the idempotency marker).
    Authorized,
    /// Proof of a denied document.
    Denied,
    CancellationProof,
    CorrectionProof,
    VoidanceProof,
    /// Raw authority responses, exchanged requests and diagnostics.
    Response,
    RenderedDanfe,
    RenderedEvent,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 10] = [
        ArtifactKind::Generated,
        ArtifactKind::Signed,
        ArtifactKind::Authorized,
        ArtifactKind::Denied,
        ArtifactKind::CancellationProof,
        ArtifactKind::CorrectionProof,
        ArtifactKind::VoidanceProof,
        ArtifactKind::Response,
        ArtifactKind::RenderedDanfe,
        ArtifactKind::RenderedEvent,
    ];

    /// Directory of the kind, relative to the store root.
    pub fn namespace(self) -> &'static str {
        match self {
            ArtifactKind::Generated => "generated",
            ArtifactKind::Signed => "signed",
            ArtifactKind::Authorized => "authorized",
            ArtifactKind::Denied => "denied",
            ArtifactKind::CancellationProof => "events/cancellation",
            ArtifactKind::CorrectionProof => "events/correction",
            ArtifactKind::VoidanceProof => "events/voidance",
            ArtifactKind::Response => "responses",
            ArtifactKind::RenderedDanfe => "rendered-proof/danfe",
            ArtifactKind::RenderedEvent => "rendered-proof/events",
        }
    }
}

/// Address of one artifact: its kind and file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactRef {
    pub kind: ArtifactKind,
    pub name: String,
}

impl ArtifactRef {
    pub fn new(kind: ArtifactKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// `namespace/name`, the store-relative path.
    pub fn relative_path(&self) -> String {
        format!("{}/{}", self.kind.namespace(), self.name)
    }
}

impl core::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.relative_path())
    }
}

/// An artifact written during a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredArtifact {
    pub kind: ArtifactKind,
    pub location: String,
}
