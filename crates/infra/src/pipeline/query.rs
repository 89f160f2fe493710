//! Read-only queries against the authority: document situation by key and
//! service status by state. Raw responses are kept under `responses/`.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use fiscalflow_authority::{QueryReport, ServiceState, extract_report};
use fiscalflow_core::DocumentKey;

use super::{Failure, Stage, Trail, Transcript};
use crate::artifact_store::{ArtifactRef, ArtifactStore, StoredArtifact, naming};
use crate::toolkit::{FiscalToolkit, ToolkitError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    /// Key query answered; see the report for the situation.
    Answered,
    InOperation,
    Unavailable,
    TechnicalError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryResult {
    pub status: QueryStatus,
    pub report: Option<QueryReport>,
    pub response_path: Option<String>,
    pub artifacts: Vec<StoredArtifact>,
    pub message: String,
    pub transcript: Transcript,
}

impl QueryResult {
    fn finish(trail: Trail, response_path: Option<String>, run: Result<(QueryStatus, QueryReport), Failure>) -> Self {
        let (status, report, message) = match run {
            Ok((status, report)) => {
                let message = match &report.status {
                    Some(line) => format!("{} - {}", line.code, line.reason),
                    None => "response carries no status".to_string(),
                };
                (status, Some(report), message)
            }
            Err(f) => (QueryStatus::TechnicalError, None, f.message),
        };
        Self {
            status,
            report,
            response_path,
            artifacts: trail.artifacts,
            message,
            transcript: trail.transcript,
        }
    }
}

pub struct QueryService {
    toolkit: Arc<dyn FiscalToolkit>,
    store: Arc<dyn ArtifactStore>,
    /// State queried when the caller names none.
    jurisdiction: String,
}

impl QueryService {
    pub fn new(toolkit: Arc<dyn FiscalToolkit>, store: Arc<dyn ArtifactStore>, jurisdiction: impl Into<String>) -> Self {
        Self {
            toolkit,
            store,
            jurisdiction: jurisdiction.into(),
        }
    }

    /// Situation of a document at the authority.
    pub async fn query_key(&self, key: &DocumentKey) -> QueryResult {
        let sent = self.toolkit.query_by_key(key).await;
        let result = self.answer(sent, key.as_str(), naming::key_query_response(key), |_| QueryStatus::Answered);
        info!(key = %key, outcome = ?result.status, "key query: {}", result.message);
        result
    }

    /// Whether the authority service of `jurisdiction` (or the configured
    /// state) is in operation.
    pub async fn service_status(&self, jurisdiction: Option<&str>) -> QueryResult {
        let uf = jurisdiction
            .map(str::trim)
            .filter(|j| !j.is_empty())
            .unwrap_or(self.jurisdiction.as_str())
            .to_ascii_uppercase();
        let sent = self.toolkit.query_service_status(&uf).await;
        let artifact = naming::status_response(&uf, &naming::timestamp());
        let result = self.answer(sent, &format!("status-{uf}"), artifact, |report| match report.service_state() {
            ServiceState::InOperation => QueryStatus::InOperation,
            ServiceState::Unavailable => QueryStatus::Unavailable,
        });
        if result.status == QueryStatus::InOperation {
            info!(jurisdiction = %uf, "service in operation");
        } else {
            warn!(jurisdiction = %uf, outcome = ?result.status, "service not in operation: {}", result.message);
        }
        result
    }

    fn answer(
        &self,
        sent: Result<String, ToolkitError>,
        subject: &str,
        artifact: ArtifactRef,
        status_of: impl FnOnce(&QueryReport) -> QueryStatus,
    ) -> QueryResult {
        let store = self.store.as_ref();
        let mut trail = Trail::default();
        let raw = match sent {
            Ok(raw) => raw,
            Err(e) => {
                let failure = trail.toolkit_failure(store, Stage::Query, subject, e);
                return QueryResult::finish(trail, None, Err(failure));
            }
        };
        trail.transcript.raw(Stage::Query, "authority answered", raw.as_str());
        let response_path = trail.keep_quietly(store, &artifact, raw.as_bytes());
        let run = extract_report(&raw)
            .map(|report| (status_of(&report), report))
            .map_err(|e| Failure::technical(Stage::Query, format!("unreadable query response: {e}")));
        QueryResult::finish(trail, response_path, run)
    }
}
