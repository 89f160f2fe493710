//! Infrastructure layer: configuration, artifact persistence, the fiscal
//! toolkit boundary and the pipelines that orchestrate them.

pub mod artifact_store;
pub mod config;
pub mod locks;
pub mod pipeline;
pub mod toolkit;

pub use artifact_store::{
    ArtifactKind, ArtifactRef, ArtifactStore, ArtifactStoreError, FsArtifactStore, InMemoryArtifactStore,
    PutOutcome,
};
pub use config::{ConfigError, Environment, FiscalConfig};
pub use locks::KeyLocks;
pub use pipeline::{
    BatchOrchestrator, BatchReport, DanfeError, DocumentPipeline, EventPipeline, EventResult, Pipelines,
    QueryResult, QueryService, QueryStatus, ResultStatus, Stage, SubmissionResult,
};
pub use toolkit::{FiscalToolkit, ProcessToolkit, ScriptedToolkit, ToolkitCapabilities, ToolkitError};
