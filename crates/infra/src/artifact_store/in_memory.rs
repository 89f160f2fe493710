use std::collections::HashMap;
use std::sync::RwLock;

use super::r#trait::{ArtifactStore, ArtifactStoreError, PutOutcome, check_name};
use super::{ArtifactKind, ArtifactRef};

/// In-memory artifact store.
///
/// Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    files: RwLock<HashMap<ArtifactRef, Vec<u8>>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored artifact, sorted by location.
    pub fn list(&self) -> Vec<ArtifactRef> {
        let files = self.files.read().unwrap();
        let mut refs: Vec<ArtifactRef> = files.keys().cloned().collect();
        refs.sort_by_key(|r| r.relative_path());
        refs
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn size(&self, artifact: &ArtifactRef) -> Result<Option<u64>, ArtifactStoreError> {
        check_name(artifact)?;
        let files = self.files.read().unwrap();
        Ok(files.get(artifact).map(|b| b.len() as u64))
    }

    fn write(&self, artifact: &ArtifactRef, bytes: &[u8]) -> Result<String, ArtifactStoreError> {
        check_name(artifact)?;
        let mut files = self.files.write().unwrap();
        files.insert(artifact.clone(), bytes.to_vec());
        Ok(self.location(artifact))
    }

    fn put_if_absent(&self, artifact: &ArtifactRef, bytes: &[u8]) -> Result<PutOutcome, ArtifactStoreError> {
        check_name(artifact)?;
        let mut files = self.files.write().unwrap();
        if files.contains_key(artifact) {
            return Ok(PutOutcome::Existing(self.location(artifact)));
        }
        files.insert(artifact.clone(), bytes.to_vec());
        Ok(PutOutcome::Created(self.location(artifact)))
    }

    fn read(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, ArtifactStoreError> {
        check_name(artifact)?;
        let files = self.files.read().unwrap();
        files
            .get(artifact)
            .cloned()
            .ok_or_else(|| ArtifactStoreError::NotFound(artifact.relative_path()))
    }

    fn list_kind(&self, kind: ArtifactKind) -> Result<Vec<ArtifactRef>, ArtifactStoreError> {
        Ok(self.list().into_iter().filter(|a| a.kind == kind).collect())
    }

    fn location(&self, artifact: &ArtifactRef) -> String {
        format!("mem://{}", artifact.relative_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_if_absent_and_list() {
        let store = InMemoryArtifactStore::new();
        let a = ArtifactRef::new(ArtifactKind::CancellationProof, "canc-1-procEvento.xml");
        assert_eq!(
            store.put_if_absent(&a, b"one").unwrap(),
            PutOutcome::Created("mem://events/cancellation/canc-1-procEvento.xml".to_string())
        );
        assert!(matches!(store.put_if_absent(&a, b"two").unwrap(), PutOutcome::Existing(_)));
        assert_eq!(store.read(&a).unwrap(), b"one");
        assert_eq!(store.list(), vec![a.clone()]);
        assert_eq!(store.list_kind(ArtifactKind::CancellationProof).unwrap(), vec![a]);
        assert!(store.list_kind(ArtifactKind::Authorized).unwrap().is_empty());
    }
}
