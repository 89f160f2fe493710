//! Batch Orchestrator.
//!
//! Runs the Document Pipeline over an ordered list of requests with a bounded
//! worker pool. Items start in submission order and results are collected in
//! the same order; one item's failure (even a panic) never stops the others.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{error, info};

use fiscalflow_core::BatchId;

use super::document::{DocumentPipeline, SubmissionResult};
use super::{ResultStatus, Stage};
use crate::artifact_store::{ArtifactStore, naming};

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Documents in flight at once.
    pub max_concurrent: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { max_concurrent: 4 }
    }
}

impl BatchConfig {
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItem {
    /// Zero-based position in the submitted list.
    pub position: usize,
    #[serde(flatten)]
    pub result: SubmissionResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub batch_id: BatchId,
    pub total: usize,
    pub authorized: usize,
    pub denied: usize,
    pub rejected: usize,
    /// Everything that reached no authority decision.
    pub errors: usize,
    pub items: Vec<BatchItem>,
    /// Where the report itself was persisted, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_path: Option<String>,
}

impl BatchReport {
    fn tally(batch_id: BatchId, items: Vec<BatchItem>) -> Self {
        let count = |status: ResultStatus| items.iter().filter(|i| i.result.status == status).count();
        let authorized = count(ResultStatus::Authorized);
        let denied = count(ResultStatus::Denied);
        let rejected = count(ResultStatus::Rejected);
        Self {
            batch_id,
            total: items.len(),
            authorized,
            denied,
            rejected,
            errors: items.len() - authorized - denied - rejected,
            items,
            report_path: None,
        }
    }

    pub fn any_authorized(&self) -> bool {
        self.authorized > 0
    }
}

pub struct BatchOrchestrator {
    documents: Arc<DocumentPipeline>,
    store: Arc<dyn ArtifactStore>,
    config: BatchConfig,
}

impl BatchOrchestrator {
    pub fn new(documents: Arc<DocumentPipeline>, store: Arc<dyn ArtifactStore>, config: BatchConfig) -> Self {
        Self {
            documents,
            store,
            config,
        }
    }

    pub async fn submit_batch(&self, requests: Vec<Value>) -> BatchReport {
        let batch_id = BatchId::new();
        let total = requests.len();
        info!(batch_id = %batch_id, total, "batch started");

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut handles = Vec::with_capacity(total);
        for request in requests {
            // Taking the permit here keeps start order equal to submission order.
            let permit = semaphore.clone().acquire_owned().await.ok();
            let documents = self.documents.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                documents.submit_value(request).await
            }));
        }

        let mut items = Vec::with_capacity(total);
        for (position, handle) in handles.into_iter().enumerate() {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!(batch_id = %batch_id, position, error = %e, "batch item aborted");
                    SubmissionResult::failed(
                        ResultStatus::TechnicalError,
                        Stage::Batch,
                        format!("item aborted: {e}"),
                    )
                }
            };
            items.push(BatchItem { position, result });
        }

        let mut report = BatchReport::tally(batch_id, items);
        report.report_path = self.persist(&report);
        info!(
            batch_id = %batch_id,
            total = report.total,
            authorized = report.authorized,
            denied = report.denied,
            rejected = report.rejected,
            errors = report.errors,
            "batch finished"
        );
        report
    }

    fn persist(&self, report: &BatchReport) -> Option<String> {
        let artifact = naming::batch_report(&naming::timestamp(), &report.batch_id.to_string());
        let body = match serde_json::to_vec_pretty(report) {
            Ok(body) => body,
            Err(e) => {
                error!(batch_id = %report.batch_id, error = %e, "batch report not serializable");
                return None;
            }
        };
        match self.store.write(&artifact, &body) {
            Ok(location) => Some(location),
            Err(e) => {
                error!(batch_id = %report.batch_id, artifact = %artifact, error = %e, "batch report not persisted");
                None
            }
        }
    }
}
