//! Event Pipeline.
//!
//! ```text
//! EventRequest
//!   ↓
//! 1. Validate payload                 (fails → ValidationError, nothing sent)
//!   ↓
//! 2. Idempotency: proof stored?       → cached success
//!   ↓
//! 3. Transmit (event or range voidance), persist the raw response
//!   ↓
//! 4. Classify with the event (or voidance) code table
//!   ↓
//! 5. Success: build proof from request + response, store create-if-absent,
//!    then render the printable record (best-effort)
//!    Otherwise: persist the raw request next to the response and report
//! ```
//!
//! Events cannot be safely repeated at the authority, so the proof check and
//! the proof write run under the per-proof lock.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use fiscalflow_authority::{Classification, OperationKind, Outcome, classify};
use fiscalflow_core::Lifecycle;
use fiscalflow_events::{EventRequest, EventStatus, EventType, FiscalEvent, VoidanceId};

use super::{Failure, ResultStatus, Stage, Trail, Transcript, describe};
use crate::artifact_store::{ArtifactRef, ArtifactStore, PutOutcome, StoredArtifact, naming};
use crate::config::FiscalConfig;
use crate::locks::KeyLocks;
use crate::toolkit::{FiscalToolkit, RenderConfig, ToolkitCapabilities, VoidRangeCall};

#[derive(Debug, Clone)]
pub struct EventSettings {
    /// IBGE state code (cUF), part of the voidance id.
    pub jurisdiction_code: u8,
    pub issuer_cnpj: String,
    pub model: u8,
    /// `tpAmb` passed to range voidance.
    pub environment: u8,
    /// A stored proof must be larger than this to count as present.
    pub min_proof_bytes: u64,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            jurisdiction_code: 29,
            issuer_cnpj: String::new(),
            model: 55,
            environment: 2,
            min_proof_bytes: 50,
        }
    }
}

impl EventSettings {
    pub fn from_config(config: &FiscalConfig) -> Self {
        Self {
            jurisdiction_code: config.jurisdiction_code,
            issuer_cnpj: config.issuer_cnpj.clone(),
            model: config.model,
            environment: config.environment.code(),
            min_proof_bytes: config.min_event_proof_bytes,
        }
    }

    pub fn with_issuer_cnpj(mut self, cnpj: impl Into<String>) -> Self {
        self.issuer_cnpj = cnpj.into();
        self
    }
}

/// Outcome of one event submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventResult {
    pub status: ResultStatus,
    pub failed_stage: Option<Stage>,
    pub event_type: EventType,
    /// Document key, or the voidance id.
    pub subject: Option<String>,
    pub sequence: Option<u16>,
    pub cached: bool,
    pub classification: Option<Classification>,
    pub proof_path: Option<String>,
    pub rendered_proof_path: Option<String>,
    /// Rendering failure; never changes `status`.
    pub render_error: Option<String>,
    pub artifacts: Vec<StoredArtifact>,
    pub message: String,
    pub transcript: Transcript,
}

struct Decision {
    status: ResultStatus,
    message: String,
}

struct Attempt {
    event_type: EventType,
    subject: Option<String>,
    sequence: Option<u16>,
    cached: bool,
    classification: Option<Classification>,
    proof_path: Option<String>,
    rendered_proof_path: Option<String>,
    render_error: Option<String>,
    trail: Trail,
}

impl Attempt {
    fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            subject: None,
            sequence: None,
            cached: false,
            classification: None,
            proof_path: None,
            rendered_proof_path: None,
            render_error: None,
            trail: Trail::default(),
        }
    }

    fn finish(self, run: Result<Decision, Failure>) -> EventResult {
        let (status, failed_stage, message) = match run {
            Ok(d) => (d.status, None, d.message),
            Err(f) => (f.status, Some(f.stage), f.message),
        };
        EventResult {
            status,
            failed_stage,
            event_type: self.event_type,
            subject: self.subject,
            sequence: self.sequence,
            cached: self.cached,
            classification: self.classification,
            proof_path: self.proof_path,
            rendered_proof_path: self.rendered_proof_path,
            render_error: self.render_error,
            artifacts: self.trail.artifacts,
            message,
            transcript: self.trail.transcript,
        }
    }
}

/// Where an event's artifacts go.
struct Target {
    operation: OperationKind,
    proof: ArtifactRef,
    /// Stem shared by the exchange and diagnostic artifacts.
    stem: String,
    subject: String,
    /// Printable record and the event code it is rendered with.
    render: Option<(ArtifactRef, &'static str)>,
}

pub struct EventPipeline {
    toolkit: Arc<dyn FiscalToolkit>,
    store: Arc<dyn ArtifactStore>,
    locks: KeyLocks,
    capabilities: ToolkitCapabilities,
    settings: EventSettings,
}

impl EventPipeline {
    pub fn new(toolkit: Arc<dyn FiscalToolkit>, store: Arc<dyn ArtifactStore>, settings: EventSettings) -> Self {
        let capabilities = toolkit.capabilities();
        Self {
            toolkit,
            store,
            locks: KeyLocks::new(),
            capabilities,
            settings,
        }
    }

    pub fn with_locks(mut self, locks: KeyLocks) -> Self {
        self.locks = locks;
        self
    }

    pub async fn submit_event(&self, request: &EventRequest) -> EventResult {
        let mut attempt = Attempt::new(request.event_type());
        let run = self.run(request, &mut attempt).await;
        let result = attempt.finish(run);

        let subject = result.subject.as_deref().unwrap_or("-");
        if result.status.is_success() {
            info!(
                event_type = %result.event_type,
                subject,
                outcome = ?result.status,
                cached = result.cached,
                "event registered: {}",
                result.message
            );
        } else {
            warn!(
                event_type = %result.event_type,
                subject,
                outcome = ?result.status,
                stage = result.failed_stage.map(Stage::as_str).unwrap_or("-"),
                "event not registered: {}",
                result.message
            );
        }
        result
    }

    async fn run(&self, request: &EventRequest, attempt: &mut Attempt) -> Result<Decision, Failure> {
        let event = request
            .validate()
            .map_err(|e| Failure::validation(Stage::Validation, e.to_string()))?;
        if let FiscalEvent::RangeVoidance(v) = &event {
            let current = (Utc::now().year() % 100) as u8;
            if !self.capabilities.void_range_arity.accepts_year() && v.year != current {
                return Err(Failure::validation(
                    Stage::Validation,
                    format!("the toolkit only voids ranges of the current year ({current:02})"),
                ));
            }
        }
        let target = self.target(&event);
        attempt.subject = Some(target.subject.clone());
        attempt.sequence = Some(event.sequence());

        let _guard = self.locks.acquire(&target.proof.relative_path()).await;
        let store = self.store.as_ref();
        let present = store
            .has_nontrivial(&target.proof, self.settings.min_proof_bytes)
            .map_err(|e| Failure::technical(Stage::Idempotency, e.to_string()))?;
        if present {
            let location = store.location(&target.proof);
            attempt.cached = true;
            attempt.proof_path = Some(location.clone());
            attempt.trail.record(&target.proof, location);
            attempt
                .trail
                .transcript
                .note(Stage::Idempotency, format!("{} already stored, not transmitted", target.proof));
            return Ok(Decision {
                status: ResultStatus::Registered,
                message: "event already registered".to_string(),
            });
        }

        let sent = match &event {
            FiscalEvent::RangeVoidance(v) => {
                let call = VoidRangeCall::shaped(self.capabilities.void_range_arity, v, self.settings.environment);
                self.toolkit.void_range(&call).await
            }
            _ => self.toolkit.transmit_event(&event).await,
        };
        let exchange = match sent {
            Ok(exchange) => exchange,
            Err(e) => return Err(attempt.trail.toolkit_failure(store, Stage::Transmit, &target.stem, e)),
        };
        let state = transition(EventStatus::Requested, EventStatus::Transmitted)?;
        debug!(subject = %target.subject, event_type = %event.event_type(), stage = "transmit", "event answered");
        let ts = naming::timestamp();
        attempt
            .trail
            .transcript
            .raw(Stage::Transmit, format!("{} answered", event.event_type()), exchange.response.as_str());
        attempt
            .trail
            .keep_quietly(store, &naming::event_response(&target.stem, &ts), exchange.response.as_bytes());

        let classification = classify(&exchange.response, target.operation);
        let message = describe(&classification);
        let outcome = classification.outcome;
        attempt.classification = Some(classification);
        debug!(subject = %target.subject, stage = "classify", outcome = ?outcome, "event response classified");

        if !outcome.is_success() {
            if !exchange.request.is_empty() {
                attempt
                    .trail
                    .keep_quietly(store, &naming::event_request(&target.stem, &ts), exchange.request.as_bytes());
            }
            return match outcome {
                Outcome::Rejected => {
                    transition(state, EventStatus::Rejected)?;
                    Ok(Decision {
                        status: ResultStatus::Rejected,
                        message,
                    })
                }
                _ => Err(Failure::technical(Stage::Classify, message)),
            };
        }
        transition(state, registered_state(outcome))?;

        if exchange.request.trim().is_empty() {
            return Err(Failure::technical(
                Stage::Proof,
                "toolkit returned no request to build the proof from",
            ));
        }
        let proof = match self.toolkit.build_proof(&exchange.request, &exchange.response).await {
            Ok(proof) => proof,
            Err(e) => return Err(attempt.trail.toolkit_failure(store, Stage::Proof, &target.stem, e)),
        };
        if (proof.len() as u64) <= self.settings.min_proof_bytes {
            attempt
                .trail
                .keep_quietly(store, &naming::suspicious_proof(&target.stem, &ts), proof.as_bytes());
            attempt
                .trail
                .keep_quietly(store, &naming::event_request(&target.stem, &ts), exchange.request.as_bytes());
            return Err(Failure::technical(
                Stage::Proof,
                format!("proof has {} bytes, expected more than {}", proof.len(), self.settings.min_proof_bytes),
            ));
        }
        let location = match store.put_if_absent(&target.proof, proof.as_bytes())? {
            PutOutcome::Created(location) => {
                attempt.trail.record(&target.proof, location.clone());
                location
            }
            PutOutcome::Existing(location) => {
                if store.has_nontrivial(&target.proof, self.settings.min_proof_bytes)? {
                    attempt
                        .trail
                        .transcript
                        .note(Stage::Proof, format!("{} already present, kept", target.proof));
                    attempt.trail.record(&target.proof, location.clone());
                    location
                } else {
                    attempt
                        .trail
                        .transcript
                        .note(Stage::Proof, format!("{} was truncated, replaced", target.proof));
                    attempt.trail.keep(store, &target.proof, proof.as_bytes())?
                }
            }
        };
        debug!(subject = %target.subject, stage = "proof", artifact = %target.proof, "event proof stored");
        attempt.proof_path = Some(location);

        if let Some((rendered, code)) = &target.render {
            match self.toolkit.render_proof(&proof, &RenderConfig::event(code)).await {
                Ok(pdf) if !pdf.is_empty() => match attempt.trail.keep(store, rendered, &pdf) {
                    Ok(location) => attempt.rendered_proof_path = Some(location),
                    Err(failure) => attempt.render_error = Some(failure.message),
                },
                Ok(_) => attempt.render_error = Some("renderer produced no output".to_string()),
                Err(e) => {
                    let failure = attempt.trail.toolkit_failure(store, Stage::Render, &target.stem, e);
                    attempt.render_error = Some(failure.message);
                }
            }
        }

        Ok(Decision {
            status: ResultStatus::from(outcome),
            message,
        })
    }

    fn target(&self, event: &FiscalEvent) -> Target {
        match event {
            FiscalEvent::Cancellation(c) => {
                let stem = format!("canc-{}", c.key);
                Target {
                    operation: OperationKind::EventTransmission,
                    proof: naming::cancellation_proof(&c.key),
                    render: Some((naming::rendered_event(&stem), EventType::Cancellation.code().unwrap_or_default())),
                    subject: c.key.to_string(),
                    stem,
                }
            }
            FiscalEvent::CorrectionNote(c) => {
                let stem = format!("cce-{}-{:03}", c.key, c.sequence);
                Target {
                    operation: OperationKind::EventTransmission,
                    proof: naming::correction_proof(&c.key, c.sequence),
                    render: Some((naming::rendered_event(&stem), EventType::CorrectionNote.code().unwrap_or_default())),
                    subject: c.key.to_string(),
                    stem,
                }
            }
            FiscalEvent::RangeVoidance(v) => {
                let id = VoidanceId::new(
                    self.settings.jurisdiction_code,
                    &self.settings.issuer_cnpj,
                    self.settings.model,
                    v,
                );
                Target {
                    operation: OperationKind::RangeVoidance,
                    proof: naming::voidance_proof(&id),
                    render: None,
                    subject: id.to_string(),
                    stem: format!("inut-{id}"),
                }
            }
        }
    }
}

fn registered_state(outcome: Outcome) -> EventStatus {
    match outcome {
        Outcome::RegisteredUnlinked => EventStatus::RegisteredUnlinked,
        Outcome::Duplicate => EventStatus::Duplicate,
        _ => EventStatus::Registered,
    }
}

fn transition(from: EventStatus, to: EventStatus) -> Result<EventStatus, Failure> {
    from.transition(to)
        .map_err(|e| Failure::technical(Stage::Classify, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact_store::{ArtifactKind, InMemoryArtifactStore};
    use crate::toolkit::scripted::responses;
    use crate::toolkit::{ScriptedToolkit, ToolkitCall, ToolkitError, VoidRangeArity};

    const KEY: &str = "29250141986662000160550010000001231123456781";

    fn setup_with(capabilities: ToolkitCapabilities) -> (Arc<ScriptedToolkit>, Arc<InMemoryArtifactStore>, EventPipeline) {
        let toolkit = Arc::new(ScriptedToolkit::new().with_capabilities(capabilities));
        let store = Arc::new(InMemoryArtifactStore::new());
        let p = EventPipeline::new(
            toolkit.clone(),
            store.clone(),
            EventSettings::default().with_issuer_cnpj("41986662000160"),
        );
        (toolkit, store, p)
    }

    fn setup() -> (Arc<ScriptedToolkit>, Arc<InMemoryArtifactStore>, EventPipeline) {
        setup_with(ToolkitCapabilities::full())
    }

    fn cancel() -> EventRequest {
        EventRequest::Cancellation {
            key: KEY.to_string(),
            protocol: "129250000000001".to_string(),
            justification: None,
        }
    }

    fn cce(sequence: i64, text: &str) -> EventRequest {
        EventRequest::CorrectionNote {
            key: KEY.to_string(),
            sequence,
            text: text.to_string(),
        }
    }

    fn voidance(year: Option<i64>) -> EventRequest {
        EventRequest::RangeVoidance {
            year,
            series: 1,
            start: 10,
            end: 12,
            justification: None,
        }
    }

    #[tokio::test]
    async fn cancellation_registers_and_renders() {
        let (toolkit, _store, p) = setup();
        let result = p.submit_event(&cancel()).await;

        assert_eq!(result.status, ResultStatus::Registered, "{}", result.message);
        assert_eq!(result.subject.as_deref(), Some(KEY));
        assert_eq!(
            result.proof_path.as_deref(),
            Some(format!("mem://events/cancellation/canc-{KEY}-procEvento.xml").as_str())
        );
        assert_eq!(
            result.rendered_proof_path.as_deref(),
            Some(format!("mem://rendered-proof/events/canc-{KEY}.pdf").as_str())
        );
        assert!(result.render_error.is_none());
        assert!(toolkit.calls().contains(&ToolkitCall::TransmitEvent {
            event_type: EventType::Cancellation,
            key: Some(KEY.to_string()),
            sequence: 1,
        }));
    }

    #[tokio::test]
    async fn stored_proof_short_circuits() {
        let (toolkit, _store, p) = setup();
        assert_eq!(p.submit_event(&cancel()).await.status, ResultStatus::Registered);
        let again = p.submit_event(&cancel()).await;
        assert_eq!(again.status, ResultStatus::Registered);
        assert!(again.cached);
        assert_eq!(toolkit.transmissions(), 1);
    }

    #[tokio::test]
    async fn truncated_proof_is_replaced() {
        let (toolkit, store, p) = setup();
        let proof = naming::cancellation_proof(&KEY.parse().unwrap());
        store.write(&proof, b"<procEvent").unwrap();

        let result = p.submit_event(&cancel()).await;
        assert_eq!(result.status, ResultStatus::Registered, "{}", result.message);
        assert!(!result.cached);
        assert_eq!(toolkit.transmissions(), 1);
        assert!(store.read(&proof).unwrap().len() > 50);
        assert_eq!(result.proof_path, Some(store.location(&proof)));

        // The replacement now answers retries.
        let again = p.submit_event(&cancel()).await;
        assert!(again.cached);
        assert_eq!(toolkit.transmissions(), 1);
    }

    #[tokio::test]
    async fn unreadable_response_keeps_request_and_response() {
        let (toolkit, store, p) = setup();
        toolkit.reply_to_event(Ok("<html>504 Gateway Timeout".to_string()));
        let result = p.submit_event(&cancel()).await;

        assert_eq!(result.status, ResultStatus::TechnicalError);
        assert_eq!(result.failed_stage, Some(Stage::Classify));
        assert!(result.proof_path.is_none());
        let names: Vec<String> = store.list().into_iter().map(|a| a.name).collect();
        assert!(names.iter().any(|n| n.starts_with(&format!("req-canc-{KEY}-"))), "{names:?}");
        assert!(names.iter().any(|n| n.starts_with(&format!("ret-canc-{KEY}-"))), "{names:?}");
        assert!(!names.iter().any(|n| n.ends_with("-procEvento.xml")), "{names:?}");
    }

    #[tokio::test]
    async fn correction_proof_is_per_sequence() {
        let (toolkit, _store, p) = setup();
        let text = "Correcao do endereco do destinatario";
        let first = p.submit_event(&cce(1, text)).await;
        let second = p.submit_event(&cce(2, text)).await;
        assert!(first.proof_path.unwrap().ends_with(&format!("cce-{KEY}-001-procEvento.xml")));
        assert!(second.proof_path.unwrap().ends_with(&format!("cce-{KEY}-002-procEvento.xml")));
        assert!(second.rendered_proof_path.unwrap().ends_with(&format!("cce-{KEY}-002.pdf")));
        assert_eq!(toolkit.transmissions(), 2);
    }

    #[tokio::test]
    async fn invalid_payload_is_never_transmitted() {
        let (toolkit, store, p) = setup();
        for request in [cce(0, "Correcao do endereco do destinatario"), cce(1000, "Correcao do endereco"), cce(1, "curto demais")] {
            let result = p.submit_event(&request).await;
            assert_eq!(result.status, ResultStatus::ValidationError);
            assert_eq!(result.failed_stage, Some(Stage::Validation));
        }
        assert!(toolkit.calls().is_empty());
        assert!(store.list().is_empty());
    }

    #[tokio::test]
    async fn duplicate_and_unlinked_are_successes() {
        let (toolkit, _store, p) = setup();
        toolkit.reply_to_event(Ok(responses::event(573)));
        let dup = p.submit_event(&cancel()).await;
        assert_eq!(dup.status, ResultStatus::Duplicate);
        assert!(dup.proof_path.is_some());

        toolkit.reply_to_event(Ok(responses::event(136)));
        let unlinked = p.submit_event(&cce(3, "Correcao do endereco do destinatario")).await;
        assert_eq!(unlinked.status, ResultStatus::RegisteredUnlinked);
    }

    #[tokio::test]
    async fn rejection_keeps_request_and_response() {
        let (toolkit, store, p) = setup();
        toolkit.reply_to_event(Ok(responses::event(301)));
        let result = p.submit_event(&cancel()).await;

        assert_eq!(result.status, ResultStatus::Rejected);
        assert!(result.proof_path.is_none());
        assert!(!toolkit.calls().contains(&ToolkitCall::BuildProof));
        let names: Vec<String> = store.list().into_iter().map(|a| a.name).collect();
        assert!(names.iter().any(|n| n.starts_with(&format!("req-canc-{KEY}-"))), "{names:?}");
        assert!(names.iter().any(|n| n.starts_with(&format!("ret-canc-{KEY}-"))), "{names:?}");
    }

    #[tokio::test]
    async fn transport_failure_is_technical() {
        let (toolkit, _store, p) = setup();
        toolkit.reply_to_event(Err(ToolkitError::failed("transmit_event", "timeout")));
        let result = p.submit_event(&cancel()).await;
        assert_eq!(result.status, ResultStatus::TechnicalError);
        assert_eq!(result.failed_stage, Some(Stage::Transmit));
        assert!(result.artifacts.iter().any(|a| a.location.contains("erro-transmit-canc-")));
    }

    #[tokio::test]
    async fn render_failure_is_reported_separately() {
        let (toolkit, _store, p) = setup();
        toolkit.fail_rendering("no template");
        let result = p.submit_event(&cancel()).await;
        assert_eq!(result.status, ResultStatus::Registered);
        assert!(result.proof_path.is_some());
        assert!(result.rendered_proof_path.is_none());
        assert!(result.render_error.unwrap().contains("no template"));
    }

    #[tokio::test]
    async fn tiny_proof_is_technical() {
        let (toolkit, store, p) = setup();
        toolkit.shrink_proofs();
        let result = p.submit_event(&cancel()).await;
        assert_eq!(result.status, ResultStatus::TechnicalError);
        assert_eq!(result.failed_stage, Some(Stage::Proof));
        assert!(store.list().iter().any(|a| a.name.starts_with(&format!("proc-canc-{KEY}-gerado-"))));
        // Nothing blocks a later retry.
        assert!(!store.list().iter().any(|a| a.kind == ArtifactKind::CancellationProof));
    }

    #[tokio::test]
    async fn voidance_uses_the_voidance_table_and_id() {
        let (toolkit, _store, p) = setup();
        let result = p.submit_event(&voidance(Some(25))).await;
        assert_eq!(result.status, ResultStatus::Registered, "{}", result.message);
        assert_eq!(result.subject.as_deref(), Some("ID29254198666200016055001000000010000000012"));
        assert!(result.proof_path.unwrap().ends_with(
            "events/voidance/inut-ID29254198666200016055001000000010000000012-procInut.xml"
        ));
        assert!(result.rendered_proof_path.is_none());

        let calls = toolkit.calls();
        let Some(ToolkitCall::VoidRange(call)) = calls.iter().find(|c| matches!(c, ToolkitCall::VoidRange(_))) else {
            panic!("no voidance call in {calls:?}");
        };
        assert_eq!((call.environment, call.year), (Some(2), Some(25)));

        toolkit.reply_to_void(Ok(responses::voidance(563)));
        let dup = p.submit_event(&voidance(Some(24))).await;
        assert_eq!(dup.status, ResultStatus::Duplicate);

        toolkit.reply_to_void(Ok(responses::voidance(241)));
        let rejected = p.submit_event(&voidance(Some(23))).await;
        assert_eq!(rejected.status, ResultStatus::Rejected);
    }

    #[tokio::test]
    async fn voidance_call_is_shaped_by_capability() {
        let (toolkit, _store, p) = setup_with(ToolkitCapabilities {
            schema_validation: false,
            void_range_arity: VoidRangeArity::Minimal,
        });
        let result = p.submit_event(&voidance(None)).await;
        assert_eq!(result.status, ResultStatus::Registered);
        let calls = toolkit.calls();
        let Some(ToolkitCall::VoidRange(call)) = calls.iter().find(|c| matches!(c, ToolkitCall::VoidRange(_))) else {
            panic!("no voidance call in {calls:?}");
        };
        assert_eq!((call.environment, call.year), (None, None));

        // A past year cannot be expressed to this toolkit.
        let past = p.submit_event(&voidance(Some(1))).await;
        assert_eq!(past.status, ResultStatus::ValidationError);
    }
}
