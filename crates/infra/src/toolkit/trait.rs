use async_trait::async_trait;
use thiserror::Error;

use fiscalflow_core::{DocumentKey, LotId};
use fiscalflow_events::FiscalEvent;

use super::{Exchange, RenderConfig, ToolkitCapabilities, VoidRangeCall};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolkitError {
    #[error("cannot start toolkit: {0}")]
    Spawn(String),

    #[error("toolkit i/o failed: {0}")]
    Io(String),

    #[error("toolkit protocol error: {0}")]
    Protocol(String),

    #[error("{operation} failed: {message}")]
    Failed {
        operation: &'static str,
        message: String,
    },
}

impl ToolkitError {
    pub fn failed(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Failed {
            operation,
            message: message.into(),
        }
    }
}

/// Operations the pipelines consume from the external fiscal toolkit.
///
/// Calls that reach the authority block until a response (or an error) comes
/// back; they are never cancelled mid-flight.
#[async_trait]
pub trait FiscalToolkit: Send + Sync {
    /// Capabilities reported when the toolkit was connected.
    fn capabilities(&self) -> ToolkitCapabilities;

    async fn sign(&self, xml: &str) -> Result<String, ToolkitError>;

    /// Schema validation; only called when advertised.
    async fn validate(&self, signed: &str) -> Result<(), ToolkitError>;

    async fn transmit_lot(
        &self,
        documents: &[String],
        lot: &LotId,
        synchronous: bool,
    ) -> Result<String, ToolkitError>;

    /// Transmit a cancellation or correction note.
    async fn transmit_event(&self, event: &FiscalEvent) -> Result<Exchange, ToolkitError>;

    /// Join a signed document (or an event request) with the authority's
    /// response into the proof envelope.
    async fn build_proof(&self, signed_or_request: &str, response: &str) -> Result<String, ToolkitError>;

    async fn render_proof(&self, proof: &str, config: &RenderConfig) -> Result<Vec<u8>, ToolkitError>;

    async fn query_by_key(&self, key: &DocumentKey) -> Result<String, ToolkitError>;

    async fn query_service_status(&self, jurisdiction: &str) -> Result<String, ToolkitError>;

    async fn void_range(&self, call: &VoidRangeCall) -> Result<Exchange, ToolkitError>;
}
