use thiserror::Error;

use super::{ArtifactKind, ArtifactRef};

/// Outcome of a create-if-absent write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// The artifact did not exist and was written; carries its location.
    Created(String),
    /// Another writer got there first; the existing content is untouched.
    Existing(String),
}

/// Keyed artifact persistence.
///
/// Implementations must make `write` atomic (readers never observe a partial
/// file) and `put_if_absent` a single reserve-or-read-existing step.
pub trait ArtifactStore: Send + Sync {
    /// Size in bytes, or `None` when the artifact does not exist.
    fn size(&self, artifact: &ArtifactRef) -> Result<Option<u64>, ArtifactStoreError>;

    /// Whether the artifact exists and is larger than `min_bytes`.
    fn has_nontrivial(&self, artifact: &ArtifactRef, min_bytes: u64) -> Result<bool, ArtifactStoreError> {
        Ok(self.size(artifact)?.is_some_and(|size| size > min_bytes))
    }

    /// Write (or replace) the artifact and return its location.
    fn write(&self, artifact: &ArtifactRef, bytes: &[u8]) -> Result<String, ArtifactStoreError>;

    /// Write only when the artifact does not exist yet.
    fn put_if_absent(&self, artifact: &ArtifactRef, bytes: &[u8]) -> Result<PutOutcome, ArtifactStoreError>;

    fn read(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, ArtifactStoreError>;

    /// Every artifact of one kind, sorted by name.
    fn list_kind(&self, kind: ArtifactKind) -> Result<Vec<ArtifactRef>, ArtifactStoreError>;

    /// Location the artifact has (or would have) in this store.
    fn location(&self, artifact: &ArtifactRef) -> String;
}

#[derive(Debug, Error)]
pub enum ArtifactStoreError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("invalid artifact name: {0:?}")]
    InvalidName(String),

    #[error("i/o error on {location}: {message}")]
    Io { location: String, message: String },
}

impl ArtifactStoreError {
    pub fn io(location: impl Into<String>, err: impl core::fmt::Display) -> Self {
        Self::Io {
            location: location.into(),
            message: err.to_string(),
        }
    }
}

/// Names are single path components: no separators, no parent references.
pub(crate) fn check_name(artifact: &ArtifactRef) -> Result<(), ArtifactStoreError> {
    let name = artifact.name.as_str();
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(ArtifactStoreError::InvalidName(name.to_string()));
    }
    Ok(())
}
