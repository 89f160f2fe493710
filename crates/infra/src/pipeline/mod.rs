//! Orchestration of documents and events through the toolkit.
//!
//! Pipelines never return `Err` for a domain outcome. Every run ends in a
//! typed result whose `status` is one of [`ResultStatus`], with the stage
//! that failed (if any), every artifact written and a transcript of the raw
//! toolkit output, so callers can trust the classification or re-derive it.

pub mod batch;
pub mod document;
pub mod event;
pub mod query;

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use fiscalflow_authority::{Classification, Outcome};
use fiscalflow_documents::DocumentBuilder;

use crate::artifact_store::{ArtifactRef, ArtifactStore, ArtifactStoreError, StoredArtifact, naming};
use crate::config::FiscalConfig;
use crate::locks::KeyLocks;
use crate::toolkit::{FiscalToolkit, ToolkitError};

pub use batch::{BatchConfig, BatchItem, BatchOrchestrator, BatchReport};
pub use document::{DanfeError, DocumentPipeline, DocumentSettings, SubmissionResult};
pub use event::{EventPipeline, EventResult, EventSettings};
pub use query::{QueryResult, QueryService, QueryStatus};

/// Machine-classifiable outcome of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Authorized,
    Denied,
    Registered,
    RegisteredUnlinked,
    Duplicate,
    /// The authority understood the request and declined it.
    Rejected,
    /// Caller input was malformed or out of range; nothing was transmitted.
    ValidationError,
    /// The document could not be assembled; nothing was signed.
    BuildError,
    /// Toolkit, transport, response or storage failure; retrying may help.
    TechnicalError,
}

impl ResultStatus {
    pub fn is_success(self) -> bool {
        matches!(
            self,
            ResultStatus::Authorized
                | ResultStatus::Registered
                | ResultStatus::RegisteredUnlinked
                | ResultStatus::Duplicate
        )
    }
}

impl From<Outcome> for ResultStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Authorized => ResultStatus::Authorized,
            Outcome::Denied => ResultStatus::Denied,
            Outcome::Registered => ResultStatus::Registered,
            Outcome::RegisteredUnlinked => ResultStatus::RegisteredUnlinked,
            Outcome::Duplicate => ResultStatus::Duplicate,
            Outcome::Rejected => ResultStatus::Rejected,
            Outcome::TechnicalError => ResultStatus::TechnicalError,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Parse,
    Validation,
    Idempotency,
    Build,
    Sign,
    SchemaValidation,
    Transmit,
    Classify,
    Proof,
    Persist,
    Render,
    Query,
    Batch,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Parse => "parse",
            Stage::Validation => "validation",
            Stage::Idempotency => "idempotency",
            Stage::Build => "build",
            Stage::Sign => "sign",
            Stage::SchemaValidation => "xsd",
            Stage::Transmit => "transmit",
            Stage::Classify => "classify",
            Stage::Proof => "proof",
            Stage::Persist => "persist",
            Stage::Render => "render",
            Stage::Query => "query",
            Stage::Batch => "batch",
        }
    }
}

impl core::fmt::Display for Stage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened during a run, in order, with the toolkit's raw output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Transcript {
    pub entries: Vec<TranscriptEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub stage: Stage,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl Transcript {
    pub fn note(&mut self, stage: Stage, message: impl Into<String>) {
        self.entries.push(TranscriptEntry {
            stage,
            message: message.into(),
            raw: None,
        });
    }

    pub fn raw(&mut self, stage: Stage, message: impl Into<String>, raw: impl Into<String>) {
        self.entries.push(TranscriptEntry {
            stage,
            message: message.into(),
            raw: Some(raw.into()),
        });
    }

    /// Raw output recorded for a stage, if any.
    #[cfg(test)]
    pub fn raw_for(&self, stage: Stage) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.stage == stage && e.raw.is_some())
            .and_then(|e| e.raw.as_deref())
    }
}

/// A stage that ended the run early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Failure {
    pub status: ResultStatus,
    pub stage: Stage,
    pub message: String,
}

impl Failure {
    pub fn new(status: ResultStatus, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            status,
            stage,
            message: message.into(),
        }
    }

    pub fn technical(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(ResultStatus::TechnicalError, stage, message)
    }

    pub fn validation(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(ResultStatus::ValidationError, stage, message)
    }
}

impl From<ArtifactStoreError> for Failure {
    fn from(err: ArtifactStoreError) -> Self {
        Failure::technical(Stage::Persist, err.to_string())
    }
}

/// Artifacts written and transcript collected during one run.
#[derive(Debug, Default)]
pub(crate) struct Trail {
    pub artifacts: Vec<StoredArtifact>,
    pub transcript: Transcript,
}

impl Trail {
    /// Write and record an artifact.
    pub fn keep(
        &mut self,
        store: &dyn ArtifactStore,
        artifact: &ArtifactRef,
        bytes: &[u8],
    ) -> Result<String, Failure> {
        let location = store.write(artifact, bytes)?;
        self.record(artifact, location.clone());
        Ok(location)
    }

    pub fn record(&mut self, artifact: &ArtifactRef, location: String) {
        self.artifacts.push(StoredArtifact {
            kind: artifact.kind,
            location,
        });
    }

    /// Write an artifact whose loss must not change the outcome; a failure
    /// is noted in the transcript instead.
    pub fn keep_quietly(
        &mut self,
        store: &dyn ArtifactStore,
        artifact: &ArtifactRef,
        bytes: &[u8],
    ) -> Option<String> {
        match self.keep(store, artifact, bytes) {
            Ok(location) => Some(location),
            Err(failure) => {
                warn!(artifact = %artifact, error = %failure.message, "artifact not persisted");
                self.transcript
                    .note(Stage::Persist, format!("{artifact} not persisted: {}", failure.message));
                None
            }
        }
    }

    /// Persist the text of a toolkit failure and turn it into a technical
    /// failure of `stage`.
    pub fn toolkit_failure(
        &mut self,
        store: &dyn ArtifactStore,
        stage: Stage,
        subject: &str,
        err: ToolkitError,
    ) -> Failure {
        let message = err.to_string();
        self.transcript
            .raw(stage, format!("toolkit {stage} failed"), message.clone());
        let artifact = naming::diagnostic(stage.as_str(), subject, &naming::timestamp());
        self.keep_quietly(store, &artifact, message.as_bytes());
        Failure::technical(stage, message)
    }
}

/// Human-readable summary of a classification.
pub(crate) fn describe(classification: &Classification) -> String {
    match (classification.status(), &classification.detail) {
        (Some(line), _) => format!("{} - {}", line.code, line.reason),
        (None, Some(detail)) => detail.clone(),
        (None, None) => format!("{:?}", classification.outcome),
    }
}

/// Every service the HTTP layer needs, wired from one configuration.
#[derive(Clone)]
pub struct Pipelines {
    pub documents: Arc<DocumentPipeline>,
    pub events: Arc<EventPipeline>,
    pub batch: Arc<BatchOrchestrator>,
    pub queries: Arc<QueryService>,
}

impl Pipelines {
    pub fn new(config: &FiscalConfig, toolkit: Arc<dyn FiscalToolkit>, store: Arc<dyn ArtifactStore>) -> Self {
        let locks = KeyLocks::new();
        let documents = Arc::new(
            DocumentPipeline::new(
                DocumentBuilder::new(config.builder_config()),
                toolkit.clone(),
                store.clone(),
                DocumentSettings::default()
                    .with_doc_prefix(config.doc_prefix.clone())
                    .with_min_proof_bytes(config.min_document_proof_bytes),
            )
            .with_locks(locks.clone()),
        );
        let events = Arc::new(
            EventPipeline::new(
                toolkit.clone(),
                store.clone(),
                EventSettings::from_config(config),
            )
            .with_locks(locks),
        );
        let batch = Arc::new(BatchOrchestrator::new(
            documents.clone(),
            store.clone(),
            BatchConfig::default().with_max_concurrent(config.max_concurrent),
        ));
        let queries = Arc::new(QueryService::new(toolkit, store, config.jurisdiction.clone()));
        Self {
            documents,
            events,
            batch,
            queries,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use serde_json::{Value, json};

    /// Key of `document(123, Some("12345678"))`.
    pub const KEY_123: &str = "29250141986662000160550010000001231123456781";

    /// A complete, buildable document request numbered `number`.
    pub fn document(number: u32, numeric_code: Option<&str>) -> Value {
        let mut ide = json!({
            "cUF": 29, "natOp": "VENDA", "mod": 55, "serie": 1, "nNF": number,
            "dhEmi": "2025-01-15T10:00:00-03:00", "tpNF": 1, "idDest": 1, "cMunFG": 2927408,
            "tpImp": 1, "tpEmis": 1, "finNFe": 1, "indFinal": 1, "indPres": 1, "procEmi": 0,
            "verProc": "1.0"
        });
        if let Some(code) = numeric_code {
            ide["cNF"] = json!(code);
        }
        json!({
            "ide": ide,
            "emit": {
                "CNPJ": "41986662000160", "xNome": "EMITENTE LTDA", "IE": "123456789", "CRT": 3,
                "enderEmit": {"xLgr": "Rua A", "nro": "1", "xBairro": "Centro", "cMun": 2927408,
                              "xMun": "Salvador", "UF": "BA", "CEP": "40000000"}
            },
            "dest": {"CNPJ": "11222333000181", "xNome": "CLIENTE", "indIEDest": 9},
            "itens": [
                {"nItem": 1, "prod": {"cProd": "A", "xProd": "Produto A", "NCM": "22021000",
                  "CFOP": 5102, "uCom": "UN", "qCom": 3, "vUnCom": 0.1, "vProd": 0.3},
                 "imposto": {"ICMS": {"orig": 0, "CST": "00", "vBC": 0.3, "pICMS": 18, "vICMS": 0.05},
                   "IBSCBS": {"CST": "000", "cClassTrib": "000001", "vBC": 0.3,
                      "gIBSUF": {"pIBSUF": 0.1, "vIBSUF": 0.01},
                      "gCBS": {"pCBS": 0.9, "vCBS": 0.01}}}}
            ],
            "totais": {"ICMSTot": {"vBC": 0.3, "vICMS": 0.05, "vProd": 0.3, "vNF": 0.3}}
        })
    }
}
