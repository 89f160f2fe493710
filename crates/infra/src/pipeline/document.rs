//! Document Pipeline.
//!
//! Drives one document request to an authority decision:
//!
//! ```text
//! request
//!   ↓
//! 0. Idempotency: proof already stored for the key? → cached result
//!   ↓
//! 1. Build canonical document + unsigned XML      (fails → BuildError)
//!   ↓
//! 2. Sign, persist signed artifact                (fails → TechnicalError)
//!   ↓
//! 3. Schema validation, if the toolkit offers it  (fails → ValidationError)
//!   ↓
//! 4. Transmit under a fresh lot id, persist the raw response
//!   ↓
//! 5. Classify
//!   ↓
//! 6. Authorized/Denied: build the proof and store it create-if-absent
//!   ↓
//! 7. Authorized: render the DANFE (best-effort)
//! ```
//!
//! The whole run holds the per-key lock, so the idempotency check and the
//! proof write of one key never interleave with another attempt. Nothing is
//! retried here; retry decisions belong to the caller.
//!
//! A run that was decided by the authority but ended without a proof can be
//! finished later with [`DocumentPipeline::rebuild_proof`], which works from
//! the signed document and the lot responses already stored.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use fiscalflow_authority::{Classification, OperationKind, Outcome, classify};
use fiscalflow_core::{DocumentKey, LotId};
use fiscalflow_documents::{
    BuildIssue, CanonicalDocument, DocumentBuilder, DocumentRequest, DocumentStatus, render_document,
};

use super::{Failure, ResultStatus, Stage, Trail, Transcript, describe};
use crate::artifact_store::{
    ArtifactKind, ArtifactRef, ArtifactStore, ArtifactStoreError, PutOutcome, StoredArtifact, naming,
};
use crate::locks::{KeyGuard, KeyLocks};
use crate::toolkit::{FiscalToolkit, RenderConfig, ToolkitCapabilities};

/// Rendered DANFEs at or below this size are considered broken.
pub const MIN_RENDER_BYTES: u64 = 1024;

#[derive(Debug, Clone)]
pub struct DocumentSettings {
    /// File name prefix of document artifacts (`NFe`).
    pub doc_prefix: String,
    /// A stored proof must be larger than this to count as present.
    pub min_proof_bytes: u64,
    pub min_render_bytes: u64,
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            doc_prefix: "NFe".to_string(),
            min_proof_bytes: 200,
            min_render_bytes: MIN_RENDER_BYTES,
        }
    }
}

impl DocumentSettings {
    pub fn with_doc_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.doc_prefix = prefix.into();
        self
    }

    pub fn with_min_proof_bytes(mut self, bytes: u64) -> Self {
        self.min_proof_bytes = bytes;
        self
    }
}

/// Outcome of one document submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionResult {
    pub status: ResultStatus,
    /// Stage that ended the run, when it did not reach a decision.
    pub failed_stage: Option<Stage>,
    pub key: Option<DocumentKey>,
    pub lot_id: Option<LotId>,
    /// Answered from a stored proof without transmitting.
    pub cached: bool,
    pub classification: Option<Classification>,
    pub artifacts: Vec<StoredArtifact>,
    pub issues: Vec<BuildIssue>,
    /// Fields read as zero because they were not numeric.
    pub coerced_fields: Vec<String>,
    /// DANFE rendering failure; never changes `status`.
    pub render_error: Option<String>,
    pub message: String,
    pub transcript: Transcript,
}

impl SubmissionResult {
    pub(crate) fn failed(status: ResultStatus, stage: Stage, message: impl Into<String>) -> Self {
        Attempt::default().finish(Err(Failure::new(status, stage, message)))
    }

    pub fn artifact(&self, kind: ArtifactKind) -> Option<&str> {
        self.artifacts
            .iter()
            .rev()
            .find(|a| a.kind == kind)
            .map(|a| a.location.as_str())
    }

    /// Stored proof (authorized or denied).
    pub fn proof_path(&self) -> Option<&str> {
        self.artifact(ArtifactKind::Authorized)
            .or_else(|| self.artifact(ArtifactKind::Denied))
    }
}

#[derive(Debug, Error)]
pub enum DanfeError {
    #[error("no authorized proof stored for {0}")]
    NoProof(DocumentKey),

    #[error("DANFE not rendered: {0}")]
    Render(String),

    #[error(transparent)]
    Store(#[from] ArtifactStoreError),
}

#[derive(Debug)]
struct Decision {
    status: ResultStatus,
    message: String,
}

#[derive(Debug, Default)]
struct Attempt {
    key: Option<DocumentKey>,
    lot_id: Option<LotId>,
    cached: bool,
    classification: Option<Classification>,
    issues: Vec<BuildIssue>,
    coerced_fields: Vec<String>,
    render_error: Option<String>,
    trail: Trail,
}

impl Attempt {
    fn finish(self, run: Result<Decision, Failure>) -> SubmissionResult {
        let (status, failed_stage, message) = match run {
            Ok(d) => (d.status, None, d.message),
            Err(f) => (f.status, Some(f.stage), f.message),
        };
        SubmissionResult {
            status,
            failed_stage,
            key: self.key,
            lot_id: self.lot_id,
            cached: self.cached,
            classification: self.classification,
            artifacts: self.trail.artifacts,
            issues: self.issues,
            coerced_fields: self.coerced_fields,
            render_error: self.render_error,
            message,
            transcript: self.trail.transcript,
        }
    }
}

pub struct DocumentPipeline {
    builder: DocumentBuilder,
    toolkit: Arc<dyn FiscalToolkit>,
    store: Arc<dyn ArtifactStore>,
    locks: KeyLocks,
    capabilities: ToolkitCapabilities,
    settings: DocumentSettings,
}

impl DocumentPipeline {
    pub fn new(
        builder: DocumentBuilder,
        toolkit: Arc<dyn FiscalToolkit>,
        store: Arc<dyn ArtifactStore>,
        settings: DocumentSettings,
    ) -> Self {
        let capabilities = toolkit.capabilities();
        Self {
            builder,
            toolkit,
            store,
            locks: KeyLocks::new(),
            capabilities,
            settings,
        }
    }

    /// Share locks with other pipelines.
    pub fn with_locks(mut self, locks: KeyLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Submit a raw JSON request.
    pub async fn submit_value(&self, value: Value) -> SubmissionResult {
        if !value.is_object() {
            return SubmissionResult::failed(
                ResultStatus::BuildError,
                Stage::Parse,
                "document must be a JSON object",
            );
        }
        match DocumentRequest::from_value(value) {
            Ok(request) => self.submit(&request).await,
            Err(e) => SubmissionResult::failed(
                ResultStatus::BuildError,
                Stage::Parse,
                format!("invalid document request: {e}"),
            ),
        }
    }

    pub async fn submit(&self, request: &DocumentRequest) -> SubmissionResult {
        let mut attempt = Attempt::default();
        let run = self.run(request, &mut attempt).await;
        let result = attempt.finish(run);

        let key = result.key.as_ref().map(DocumentKey::as_str).unwrap_or("-");
        match result.status {
            ResultStatus::Authorized | ResultStatus::Denied => info!(
                key,
                outcome = ?result.status,
                cached = result.cached,
                "document decided: {}",
                result.message
            ),
            status => warn!(
                key,
                outcome = ?status,
                stage = result.failed_stage.map(Stage::as_str).unwrap_or("-"),
                "document not accepted: {}",
                result.message
            ),
        }
        result
    }

    async fn run(&self, request: &DocumentRequest, attempt: &mut Attempt) -> Result<Decision, Failure> {
        let declared = self.builder.derive_key(request);
        let mut _guard: Option<KeyGuard> = None;
        if let Some(key) = &declared {
            _guard = Some(self.locks.acquire(key.as_str()).await);
            attempt.key = Some(key.clone());
            if let Some(cached) = self.cached(key, attempt)? {
                return Ok(cached);
            }
        }

        let mut document = self.builder.build(request).map_err(|issues| {
            let message = issues
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            attempt.issues = issues;
            Failure::new(ResultStatus::BuildError, Stage::Build, message)
        })?;
        let key = document.key.clone();
        attempt.key = Some(key.clone());
        attempt.coerced_fields = document.coerced_fields.clone();
        if declared.as_ref() != Some(&key) {
            _guard = Some(self.locks.acquire(key.as_str()).await);
            if let Some(cached) = self.cached(&key, attempt)? {
                return Ok(cached);
            }
        }
        debug!(key = %key, stage = "build", items = document.items.len(), "document built");

        let prefix = self.settings.doc_prefix.as_str();
        let store = self.store.as_ref();
        let xml = render_document(&document).map_err(|e| Failure::new(ResultStatus::BuildError, Stage::Build, e.to_string()))?;
        attempt.trail.keep(store, &naming::generated(prefix, &key), xml.as_bytes())?;

        let signed = match self.toolkit.sign(&xml).await {
            Ok(signed) => signed,
            Err(e) => return Err(attempt.trail.toolkit_failure(store, Stage::Sign, key.as_str(), e)),
        };
        advance(&mut document, DocumentStatus::Signed)?;
        attempt.trail.keep(store, &naming::signed(prefix, &key), signed.as_bytes())?;
        attempt.trail.transcript.note(Stage::Sign, "document signed");
        debug!(key = %key, stage = "sign", "document signed");

        if self.capabilities.schema_validation {
            if let Err(e) = self.toolkit.validate(&signed).await {
                let failure = attempt.trail.toolkit_failure(store, Stage::SchemaValidation, key.as_str(), e);
                return Err(Failure::validation(Stage::SchemaValidation, failure.message));
            }
            attempt.trail.transcript.note(Stage::SchemaValidation, "schema valid");
        }

        let lot = LotId::generate();
        attempt.lot_id = Some(lot.clone());
        let raw = match self.toolkit.transmit_lot(std::slice::from_ref(&signed), &lot, true).await {
            Ok(raw) => raw,
            Err(e) => return Err(attempt.trail.toolkit_failure(store, Stage::Transmit, key.as_str(), e)),
        };
        advance(&mut document, DocumentStatus::Transmitted)?;
        attempt.trail.transcript.raw(Stage::Transmit, format!("lot {lot} answered"), raw.as_str());
        attempt
            .trail
            .keep_quietly(store, &naming::lot_response(&lot, &naming::timestamp()), raw.as_bytes());
        debug!(key = %key, lot_id = %lot, stage = "transmit", "lot answered");

        let classification = classify(&raw, OperationKind::DocumentTransmission);
        let message = describe(&classification);
        let outcome = classification.outcome;
        attempt.classification = Some(classification);
        debug!(key = %key, stage = "classify", outcome = ?outcome, "response classified");

        match outcome {
            Outcome::Authorized => {
                advance(&mut document, DocumentStatus::Authorized)?;
                let proof = self
                    .store_proof(attempt, &key, &signed, &raw, naming::authorized_proof(prefix, &key))
                    .await?;
                self.render_danfe(attempt, &key, &proof).await;
                Ok(Decision {
                    status: ResultStatus::Authorized,
                    message,
                })
            }
            Outcome::Denied => {
                advance(&mut document, DocumentStatus::Denied)?;
                // Denial stands even when its proof cannot be kept.
                if let Err(failure) = self
                    .store_proof(attempt, &key, &signed, &raw, naming::denied_proof(prefix, &key))
                    .await
                {
                    warn!(key = %key, error = %failure.message, "denied proof not stored");
                }
                Ok(Decision {
                    status: ResultStatus::Denied,
                    message,
                })
            }
            Outcome::Rejected => {
                advance(&mut document, DocumentStatus::Rejected)?;
                Ok(Decision {
                    status: ResultStatus::Rejected,
                    message,
                })
            }
            _ => Err(Failure::technical(Stage::Classify, message)),
        }
    }

    /// Finish a decided document whose proof was never stored, from the
    /// signed document and the newest stored lot response deciding its key.
    /// Nothing is transmitted.
    pub async fn rebuild_proof(&self, key: &DocumentKey) -> SubmissionResult {
        let mut attempt = Attempt {
            key: Some(key.clone()),
            ..Attempt::default()
        };
        let run = self.rebuild(key, &mut attempt).await;
        let result = attempt.finish(run);
        match result.status {
            ResultStatus::Authorized | ResultStatus::Denied => info!(
                key = %key,
                outcome = ?result.status,
                cached = result.cached,
                "proof rebuilt: {}",
                result.message
            ),
            status => warn!(key = %key, outcome = ?status, "proof not rebuilt: {}", result.message),
        }
        result
    }

    async fn rebuild(&self, key: &DocumentKey, attempt: &mut Attempt) -> Result<Decision, Failure> {
        let _guard = self.locks.acquire(key.as_str()).await;
        if let Some(cached) = self.cached(key, attempt)? {
            return Ok(cached);
        }

        let prefix = self.settings.doc_prefix.as_str();
        let store = self.store.as_ref();
        let signed_ref = naming::signed(prefix, key);
        let signed = match store.read(&signed_ref) {
            Ok(bytes) => String::from_utf8(bytes)
                .map_err(|e| Failure::technical(Stage::Proof, format!("{signed_ref} is not UTF-8: {e}")))?,
            Err(ArtifactStoreError::NotFound(_)) => {
                return Err(Failure::technical(
                    Stage::Proof,
                    format!("no signed document stored for {key}"),
                ));
            }
            Err(e) => return Err(e.into()),
        };
        attempt.trail.record(&signed_ref, store.location(&signed_ref));

        let Some((response_ref, raw, classification)) = self.stored_decision(key)? else {
            return Err(Failure::technical(
                Stage::Proof,
                format!("no stored lot response decides {key}"),
            ));
        };
        attempt.trail.record(&response_ref, store.location(&response_ref));
        attempt
            .trail
            .transcript
            .raw(Stage::Classify, format!("{response_ref} decides the key"), raw.as_str());
        let message = describe(&classification);
        let outcome = classification.outcome;
        attempt.classification = Some(classification);

        if outcome == Outcome::Authorized {
            let proof = self
                .store_proof(attempt, key, &signed, &raw, naming::authorized_proof(prefix, key))
                .await?;
            self.render_danfe(attempt, key, &proof).await;
            Ok(Decision {
                status: ResultStatus::Authorized,
                message,
            })
        } else {
            self.store_proof(attempt, key, &signed, &raw, naming::denied_proof(prefix, key))
                .await?;
            Ok(Decision {
                status: ResultStatus::Denied,
                message,
            })
        }
    }

    /// Newest stored lot response that authorizes or denies `key`.
    fn stored_decision(&self, key: &DocumentKey) -> Result<Option<(ArtifactRef, String, Classification)>, Failure> {
        let mut responses: Vec<(String, ArtifactRef)> = self
            .store
            .list_kind(ArtifactKind::Response)?
            .into_iter()
            .filter_map(|artifact| {
                let ts = naming::lot_response_timestamp(&artifact.name)?.to_string();
                Some((ts, artifact))
            })
            .collect();
        responses.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, artifact) in responses {
            let raw = String::from_utf8_lossy(&self.store.read(&artifact)?).into_owned();
            if !raw.contains(key.as_str()) {
                continue;
            }
            let classification = classify(&raw, OperationKind::DocumentTransmission);
            let decides = classification.key.as_deref() == Some(key.as_str())
                && matches!(classification.outcome, Outcome::Authorized | Outcome::Denied);
            if decides {
                return Ok(Some((artifact, raw, classification)));
            }
        }
        Ok(None)
    }

    /// DANFE of an authorized document: the stored render when there is one,
    /// otherwise rendered now from the stored proof and kept.
    pub async fn danfe(&self, key: &DocumentKey) -> Result<Vec<u8>, DanfeError> {
        let store = self.store.as_ref();
        let artifact = naming::danfe(key);
        if store.has_nontrivial(&artifact, self.settings.min_render_bytes)? {
            return Ok(store.read(&artifact)?);
        }

        let proof_ref = naming::authorized_proof(&self.settings.doc_prefix, key);
        if !store.has_nontrivial(&proof_ref, self.settings.min_proof_bytes)? {
            return Err(DanfeError::NoProof(key.clone()));
        }
        let proof = String::from_utf8_lossy(&store.read(&proof_ref)?).into_owned();
        let pdf = self
            .toolkit
            .render_proof(&proof, &RenderConfig::danfe())
            .await
            .map_err(|e| DanfeError::Render(e.to_string()))?;
        if (pdf.len() as u64) <= self.settings.min_render_bytes {
            return Err(DanfeError::Render(format!("rendered DANFE has only {} bytes", pdf.len())));
        }
        match store.write(&artifact, &pdf) {
            Ok(location) => info!(key = %key, location = %location, "DANFE rendered on demand"),
            Err(e) => warn!(key = %key, error = %e, "DANFE rendered but not stored"),
        }
        Ok(pdf)
    }

    /// Stored decision for `key`, if any.
    fn cached(&self, key: &DocumentKey, attempt: &mut Attempt) -> Result<Option<Decision>, Failure> {
        let prefix = self.settings.doc_prefix.as_str();
        let candidates = [
            (naming::authorized_proof(prefix, key), ResultStatus::Authorized),
            (naming::denied_proof(prefix, key), ResultStatus::Denied),
        ];
        for (proof, status) in candidates {
            let present = self
                .store
                .has_nontrivial(&proof, self.settings.min_proof_bytes)
                .map_err(|e| Failure::technical(Stage::Idempotency, e.to_string()))?;
            if present {
                debug!(key = %key, stage = "idempotency", outcome = ?status, "proof already stored");
                attempt.cached = true;
                attempt.trail.record(&proof, self.store.location(&proof));
                attempt
                    .trail
                    .transcript
                    .note(Stage::Idempotency, format!("{proof} already stored, not transmitted"));
                return Ok(Some(Decision {
                    status,
                    message: "proof already stored".to_string(),
                }));
            }
        }
        Ok(None)
    }

    async fn store_proof(
        &self,
        attempt: &mut Attempt,
        key: &DocumentKey,
        signed: &str,
        response: &str,
        artifact: ArtifactRef,
    ) -> Result<String, Failure> {
        let store = self.store.as_ref();
        let proof = match self.toolkit.build_proof(signed, response).await {
            Ok(proof) => proof,
            Err(e) => return Err(attempt.trail.toolkit_failure(store, Stage::Proof, key.as_str(), e)),
        };
        if (proof.len() as u64) <= self.settings.min_proof_bytes {
            attempt.trail.keep_quietly(
                store,
                &naming::suspicious_proof(key.as_str(), &naming::timestamp()),
                proof.as_bytes(),
            );
            return Err(Failure::technical(
                Stage::Proof,
                format!(
                    "proof has {} bytes, expected more than {}",
                    proof.len(),
                    self.settings.min_proof_bytes
                ),
            ));
        }
        match store.put_if_absent(&artifact, proof.as_bytes())? {
            PutOutcome::Created(location) => attempt.trail.record(&artifact, location),
            PutOutcome::Existing(location) => {
                if store.has_nontrivial(&artifact, self.settings.min_proof_bytes)? {
                    attempt
                        .trail
                        .transcript
                        .note(Stage::Proof, format!("{artifact} already present, kept"));
                    attempt.trail.record(&artifact, location);
                } else {
                    attempt
                        .trail
                        .transcript
                        .note(Stage::Proof, format!("{artifact} was truncated, replaced"));
                    attempt.trail.keep(store, &artifact, proof.as_bytes())?;
                }
            }
        }
        debug!(key = %key, stage = "proof", artifact = %artifact, "proof stored");
        Ok(proof)
    }

    async fn render_danfe(&self, attempt: &mut Attempt, key: &DocumentKey, proof: &str) {
        let store = self.store.as_ref();
        let artifact = naming::danfe(key);
        if let Ok(true) = store.has_nontrivial(&artifact, self.settings.min_render_bytes) {
            attempt.trail.record(&artifact, store.location(&artifact));
            return;
        }
        match self.toolkit.render_proof(proof, &RenderConfig::danfe()).await {
            Ok(pdf) if (pdf.len() as u64) > self.settings.min_render_bytes => {
                if attempt.trail.keep_quietly(store, &artifact, &pdf).is_none() {
                    attempt.render_error = Some(format!("{artifact} could not be written"));
                }
            }
            Ok(pdf) => {
                attempt.render_error = Some(format!("rendered DANFE has only {} bytes", pdf.len()));
            }
            Err(e) => {
                warn!(key = %key, error = %e, "DANFE not rendered");
                let failure = attempt.trail.toolkit_failure(store, Stage::Render, key.as_str(), e);
                attempt.render_error = Some(failure.message);
            }
        }
    }
}

fn advance(document: &mut CanonicalDocument, next: DocumentStatus) -> Result<(), Failure> {
    document
        .advance(next)
        .map_err(|e| Failure::technical(Stage::Classify, e.to_string()))
}
