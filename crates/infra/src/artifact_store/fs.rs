use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::debug;

use super::r#trait::{ArtifactStore, ArtifactStoreError, PutOutcome, check_name};
use super::{ArtifactKind, ArtifactRef};

/// File-system artifact store rooted at one directory, one sub-directory per
/// artifact kind.
///
/// Writes go to a temporary file in the target directory and are then
/// renamed (or hard-linked, for `put_if_absent`) into place, so a file is
/// either absent or complete. Calls made from a multi-threaded tokio worker
/// run under `block_in_place`.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Open the store, creating every namespace directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ArtifactStoreError> {
        let root = root.into();
        for kind in ArtifactKind::ALL {
            let dir = root.join(kind.namespace());
            fs::create_dir_all(&dir).map_err(|e| ArtifactStoreError::io(dir.display().to_string(), e))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, artifact: &ArtifactRef) -> PathBuf {
        self.root.join(artifact.kind.namespace()).join(&artifact.name)
    }

    fn staged(&self, artifact: &ArtifactRef, bytes: &[u8]) -> Result<(NamedTempFile, PathBuf), ArtifactStoreError> {
        check_name(artifact)?;
        let path = self.path(artifact);
        let dir = self.root.join(artifact.kind.namespace());
        let location = path.display().to_string();
        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| ArtifactStoreError::io(&location, e))?;
        tmp.write_all(bytes).map_err(|e| ArtifactStoreError::io(&location, e))?;
        tmp.as_file().sync_all().map_err(|e| ArtifactStoreError::io(&location, e))?;
        Ok((tmp, path))
    }
}

/// Run blocking file work, handing the worker's other tasks off first when
/// called from a multi-threaded runtime.
fn blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => tokio::task::block_in_place(f),
        _ => f(),
    }
}

impl ArtifactStore for FsArtifactStore {
    fn size(&self, artifact: &ArtifactRef) -> Result<Option<u64>, ArtifactStoreError> {
        check_name(artifact)?;
        let path = self.path(artifact);
        match blocking(|| fs::metadata(&path)) {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ArtifactStoreError::io(path.display().to_string(), e)),
        }
    }

    fn write(&self, artifact: &ArtifactRef, bytes: &[u8]) -> Result<String, ArtifactStoreError> {
        let location = blocking(|| {
            let (tmp, path) = self.staged(artifact, bytes)?;
            let location = path.display().to_string();
            tmp.persist(&path)
                .map_err(|e| ArtifactStoreError::io(&location, e.error))?;
            Ok::<_, ArtifactStoreError>(location)
        })?;
        debug!(artifact = %artifact, bytes = bytes.len(), "artifact written");
        Ok(location)
    }

    fn put_if_absent(&self, artifact: &ArtifactRef, bytes: &[u8]) -> Result<PutOutcome, ArtifactStoreError> {
        let (tmp, path) = blocking(|| self.staged(artifact, bytes))?;
        let location = path.display().to_string();
        match blocking(|| tmp.persist_noclobber(&path)) {
            Ok(_) => {
                debug!(artifact = %artifact, bytes = bytes.len(), "artifact created");
                Ok(PutOutcome::Created(location))
            }
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                debug!(artifact = %artifact, "artifact already present");
                Ok(PutOutcome::Existing(location))
            }
            Err(e) => Err(ArtifactStoreError::io(&location, e.error)),
        }
    }

    fn read(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, ArtifactStoreError> {
        check_name(artifact)?;
        let path = self.path(artifact);
        blocking(|| fs::read(&path)).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ArtifactStoreError::NotFound(artifact.relative_path()),
            _ => ArtifactStoreError::io(path.display().to_string(), e),
        })
    }

    fn list_kind(&self, kind: ArtifactKind) -> Result<Vec<ArtifactRef>, ArtifactStoreError> {
        let dir = self.root.join(kind.namespace());
        let location = dir.display().to_string();
        let mut refs = blocking(|| {
            let mut refs = Vec::new();
            for entry in fs::read_dir(&dir).map_err(|e| ArtifactStoreError::io(&location, e))? {
                let entry = entry.map_err(|e| ArtifactStoreError::io(&location, e))?;
                let is_file = entry.file_type().map_err(|e| ArtifactStoreError::io(&location, e))?.is_file();
                // Staged writes are dot-prefixed temporaries.
                match entry.file_name().into_string() {
                    Ok(name) if is_file && !name.starts_with('.') => refs.push(ArtifactRef::new(kind, name)),
                    _ => {}
                }
            }
            Ok::<_, ArtifactStoreError>(refs)
        })?;
        refs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(refs)
    }

    fn location(&self, artifact: &ArtifactRef) -> String {
        self.path(artifact).display().to_string()
    }
}
