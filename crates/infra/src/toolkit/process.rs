//! Subprocess adapter for the external toolkit.
//!
//! Each operation runs the configured command once. The request is a single
//! JSON object on stdin (`{"op": "...", ...arguments}`) and the reply a
//! single JSON object on stdout:
//!
//! ```text
//! {"ok": true,  "result": <string | object>}
//! {"ok": false, "error": "message"}
//! ```
//!
//! Rendered PDFs are not passed through stdout: the request carries an
//! `output` path and the toolkit writes the bytes there.

use std::process::{Output, Stdio};
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use fiscalflow_core::{DocumentKey, LotId};
use fiscalflow_events::FiscalEvent;

use super::r#trait::{FiscalToolkit, ToolkitError};
use super::{Exchange, RenderConfig, ToolkitCapabilities, VoidRangeArity, VoidRangeCall};

#[derive(Debug, Deserialize)]
struct Reply {
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CapabilityReply {
    #[serde(default)]
    schema_validation: bool,
    #[serde(default)]
    void_range_arity: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct ProcessToolkit {
    program: String,
    args: Vec<String>,
    capabilities: ToolkitCapabilities,
}

impl ProcessToolkit {
    /// Start talking to the toolkit and ask for its capabilities once.
    ///
    /// A toolkit that cannot be started is an error. One that does not
    /// understand the question is assumed to have minimal capabilities.
    pub async fn connect(program: impl Into<String>, args: Vec<String>) -> Result<Self, ToolkitError> {
        let mut toolkit = Self {
            program: program.into(),
            args,
            capabilities: ToolkitCapabilities::minimal(),
        };
        match toolkit.call("capabilities", json!({})).await {
            Ok(value) => {
                let reply: CapabilityReply = serde_json::from_value(value)
                    .map_err(|e| ToolkitError::Protocol(format!("capabilities: {e}")))?;
                toolkit.capabilities = ToolkitCapabilities {
                    schema_validation: reply.schema_validation,
                    void_range_arity: reply
                        .void_range_arity
                        .and_then(VoidRangeArity::from_arg_count)
                        .unwrap_or(VoidRangeArity::Minimal),
                };
            }
            Err(ToolkitError::Failed { message, .. }) => {
                warn!(error = %message, "toolkit did not report capabilities, assuming minimal");
            }
            Err(e) => return Err(e),
        }
        debug!(program = %toolkit.program, capabilities = ?toolkit.capabilities, "toolkit connected");
        Ok(toolkit)
    }

    async fn call(&self, operation: &'static str, arguments: Value) -> Result<Value, ToolkitError> {
        let mut request = json!({ "op": operation });
        if let (Some(target), Value::Object(fields)) = (request.as_object_mut(), arguments) {
            target.extend(fields);
        }
        let body = serde_json::to_vec(&request).map_err(|e| ToolkitError::Protocol(e.to_string()))?;

        let started = Instant::now();
        let output = if reaches_authority(operation) {
            // Runs to completion even if the caller goes away.
            let exchange = run(self.program.clone(), self.args.clone(), body, false);
            tokio::spawn(exchange)
                .await
                .map_err(|e| ToolkitError::Io(format!("{operation}: {e}")))??
        } else {
            run(self.program.clone(), self.args.clone(), body, true).await?
        };
        debug!(operation, elapsed_ms = started.elapsed().as_millis() as u64, "toolkit call finished");

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() };
            return Err(ToolkitError::failed(
                operation,
                format!("exit status {}: {message}", output.status),
            ));
        }

        let reply: Reply = serde_json::from_str(stdout.trim())
            .map_err(|e| ToolkitError::Protocol(format!("{operation}: {e}")))?;
        if reply.ok {
            Ok(reply.result)
        } else {
            Err(ToolkitError::failed(
                operation,
                reply.error.unwrap_or_else(|| "no error message".to_string()),
            ))
        }
    }

    async fn call_text(&self, operation: &'static str, arguments: Value) -> Result<String, ToolkitError> {
        match self.call(operation, arguments).await? {
            Value::String(s) => Ok(s),
            other => Err(ToolkitError::Protocol(format!(
                "{operation}: expected a string result, got {other}"
            ))),
        }
    }

    async fn call_exchange(&self, operation: &'static str, arguments: Value) -> Result<Exchange, ToolkitError> {
        let value = self.call(operation, arguments).await?;
        serde_json::from_value(value).map_err(|e| ToolkitError::Protocol(format!("{operation}: {e}")))
    }
}

/// Operations whose request reaches the authority.
fn reaches_authority(operation: &str) -> bool {
    matches!(operation, "transmit_lot" | "transmit_event" | "void_range")
}

/// Run the toolkit once. Stdin is fed from its own task while stdout and
/// stderr are drained.
async fn run(program: String, args: Vec<String>, body: Vec<u8>, kill_on_drop: bool) -> Result<Output, ToolkitError> {
    let mut child = Command::new(&program)
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(kill_on_drop)
        .spawn()
        .map_err(|e| ToolkitError::Spawn(format!("{program}: {e}")))?;

    let stdin = child.stdin.take();
    let feeder = tokio::spawn(async move {
        if let Some(mut stdin) = stdin {
            stdin.write_all(&body).await?;
            stdin.shutdown().await?;
        }
        Ok::<(), std::io::Error>(())
    });
    let output = child
        .wait_with_output()
        .await
        .map_err(|e| ToolkitError::Io(e.to_string()))?;
    match feeder.await {
        Ok(Ok(())) => Ok(output),
        // A toolkit that failed before reading everything reports through its exit status.
        Ok(Err(_)) if !output.status.success() => Ok(output),
        Ok(Err(e)) => Err(ToolkitError::Io(format!("writing request: {e}"))),
        Err(e) => Err(ToolkitError::Io(e.to_string())),
    }
}

#[async_trait]
impl FiscalToolkit for ProcessToolkit {
    fn capabilities(&self) -> ToolkitCapabilities {
        self.capabilities
    }

    async fn sign(&self, xml: &str) -> Result<String, ToolkitError> {
        self.call_text("sign", json!({ "xml": xml })).await
    }

    async fn validate(&self, signed: &str) -> Result<(), ToolkitError> {
        self.call("validate", json!({ "xml": signed })).await.map(|_| ())
    }

    async fn transmit_lot(
        &self,
        documents: &[String],
        lot: &LotId,
        synchronous: bool,
    ) -> Result<String, ToolkitError> {
        self.call_text(
            "transmit_lot",
            json!({ "documents": documents, "lot_id": lot, "synchronous": synchronous }),
        )
        .await
    }

    async fn transmit_event(&self, event: &FiscalEvent) -> Result<Exchange, ToolkitError> {
        self.call_exchange(
            "transmit_event",
            json!({
                "event": event,
                "event_code": event.event_type().code(),
                "sequence": event.sequence(),
            }),
        )
        .await
    }

    async fn build_proof(&self, signed_or_request: &str, response: &str) -> Result<String, ToolkitError> {
        self.call_text("build_proof", json!({ "request": signed_or_request, "response": response }))
            .await
    }

    async fn render_proof(&self, proof: &str, config: &RenderConfig) -> Result<Vec<u8>, ToolkitError> {
        let output = tempfile::Builder::new()
            .suffix(".pdf")
            .tempfile()
            .map_err(|e| ToolkitError::Io(e.to_string()))?;
        let path = output.path().display().to_string();
        self.call(
            "render_proof",
            json!({ "xml": proof, "config": config, "output": path }),
        )
        .await?;
        tokio::fs::read(output.path())
            .await
            .map_err(|e| ToolkitError::Io(format!("{path}: {e}")))
    }

    async fn query_by_key(&self, key: &DocumentKey) -> Result<String, ToolkitError> {
        self.call_text("query_by_key", json!({ "key": key })).await
    }

    async fn query_service_status(&self, jurisdiction: &str) -> Result<String, ToolkitError> {
        self.call_text("query_service_status", json!({ "jurisdiction": jurisdiction }))
            .await
    }

    async fn void_range(&self, call: &VoidRangeCall) -> Result<Exchange, ToolkitError> {
        let arguments = serde_json::to_value(call).map_err(|e| ToolkitError::Protocol(e.to_string()))?;
        self.call_exchange("void_range", arguments).await
    }
}
