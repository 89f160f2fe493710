//! In-process toolkit double.
//!
//! Answers every call without touching the authority. Lot transmissions are
//! answered per document key, so concurrent batches stay deterministic:
//! a scripted reply for the key is used first, otherwise the document is
//! authorized. Every call is recorded for assertions.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use fiscalflow_core::{DocumentKey, LotId};
use fiscalflow_events::{EventType, FiscalEvent};

use super::r#trait::{FiscalToolkit, ToolkitError};
use super::{Exchange, RenderConfig, RenderKind, ToolkitCapabilities, VoidRangeCall};

/// A recorded toolkit call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolkitCall {
    Sign { key: Option<String> },
    Validate,
    TransmitLot { lot: LotId, keys: Vec<String>, synchronous: bool },
    TransmitEvent { event_type: EventType, key: Option<String>, sequence: u16 },
    BuildProof,
    RenderProof { kind: RenderKind },
    QueryByKey { key: String },
    QueryServiceStatus { jurisdiction: String },
    VoidRange(VoidRangeCall),
}

impl ToolkitCall {
    pub fn is_transmission(&self) -> bool {
        matches!(
            self,
            ToolkitCall::TransmitLot { .. } | ToolkitCall::TransmitEvent { .. } | ToolkitCall::VoidRange(_)
        )
    }
}

type Reply = Result<String, ToolkitError>;

#[derive(Debug, Default)]
struct Script {
    calls: Vec<ToolkitCall>,
    lot_replies: HashMap<String, VecDeque<Reply>>,
    event_replies: VecDeque<Reply>,
    void_replies: VecDeque<Reply>,
    key_query_replies: VecDeque<Reply>,
    status_replies: VecDeque<Reply>,
    sign_failure: Option<String>,
    validation_failure: Option<String>,
    proof_failure: Option<String>,
    render_failure: Option<String>,
    tiny_proofs: bool,
}

#[derive(Debug, Default)]
pub struct ScriptedToolkit {
    capabilities: ToolkitCapabilities,
    /// Time every transmission takes to be answered.
    latency: Option<Duration>,
    script: Mutex<Script>,
}

impl ScriptedToolkit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capabilities(mut self, capabilities: ToolkitCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue the reply to the next lot carrying `key`.
    pub fn reply_to_lot(&self, key: &str, reply: Reply) {
        let mut script = self.script.lock().unwrap();
        script.lot_replies.entry(key.to_string()).or_default().push_back(reply);
    }

    /// Queue the response to the next event transmission.
    pub fn reply_to_event(&self, reply: Reply) {
        self.script.lock().unwrap().event_replies.push_back(reply);
    }

    pub fn reply_to_void(&self, reply: Reply) {
        self.script.lock().unwrap().void_replies.push_back(reply);
    }

    pub fn reply_to_key_query(&self, reply: Reply) {
        self.script.lock().unwrap().key_query_replies.push_back(reply);
    }

    pub fn reply_to_status_query(&self, reply: Reply) {
        self.script.lock().unwrap().status_replies.push_back(reply);
    }

    pub fn fail_signing(&self, message: &str) {
        self.script.lock().unwrap().sign_failure = Some(message.to_string());
    }

    pub fn fail_validation(&self, message: &str) {
        self.script.lock().unwrap().validation_failure = Some(message.to_string());
    }

    pub fn fail_proofs(&self, message: &str) {
        self.script.lock().unwrap().proof_failure = Some(message.to_string());
    }

    pub fn fail_rendering(&self, message: &str) {
        self.script.lock().unwrap().render_failure = Some(message.to_string());
    }

    /// Make every built proof implausibly small.
    pub fn shrink_proofs(&self) {
        self.script.lock().unwrap().tiny_proofs = true;
    }

    pub fn calls(&self) -> Vec<ToolkitCall> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn transmissions(&self) -> usize {
        self.calls().iter().filter(|c| c.is_transmission()).count()
    }

    fn record(&self, call: ToolkitCall) {
        self.script.lock().unwrap().calls.push(call);
    }

    async fn answer_delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

/// Key from the `Id="NFe{key}"` attribute of a document.
pub fn key_in(xml: &str) -> Option<String> {
    let start = xml.find("Id=\"NFe")? + "Id=\"NFe".len();
    let key = xml.get(start..start + 44)?;
    key.bytes().all(|b| b.is_ascii_digit()).then(|| key.to_string())
}

fn strip_declaration(xml: &str) -> &str {
    let trimmed = xml.trim();
    match (trimmed.starts_with("<?xml"), trimmed.find("?>")) {
        (true, Some(end)) => trimmed[end + 2..].trim_start(),
        _ => trimmed,
    }
}

#[async_trait]
impl FiscalToolkit for ScriptedToolkit {
    fn capabilities(&self) -> ToolkitCapabilities {
        self.capabilities
    }

    async fn sign(&self, xml: &str) -> Result<String, ToolkitError> {
        self.record(ToolkitCall::Sign { key: key_in(xml) });
        if let Some(message) = self.script.lock().unwrap().sign_failure.clone() {
            return Err(ToolkitError::failed("sign", message));
        }
        let signature = "<Signature xmlns=\"http://www.w3.org/2000/09/xmldsig#\">\
                         <SignatureValue>c2NyaXB0ZWQ=</SignatureValue></Signature>";
        Ok(match xml.rfind("</NFe>") {
            Some(at) => format!("{}{signature}{}", &xml[..at], &xml[at..]),
            None => format!("{xml}{signature}"),
        })
    }

    async fn validate(&self, _signed: &str) -> Result<(), ToolkitError> {
        self.record(ToolkitCall::Validate);
        match self.script.lock().unwrap().validation_failure.clone() {
            Some(message) => Err(ToolkitError::failed("validate", message)),
            None => Ok(()),
        }
    }

    async fn transmit_lot(
        &self,
        documents: &[String],
        lot: &LotId,
        synchronous: bool,
    ) -> Result<String, ToolkitError> {
        let keys: Vec<String> = documents.iter().filter_map(|d| key_in(d)).collect();
        self.record(ToolkitCall::TransmitLot {
            lot: lot.clone(),
            keys: keys.clone(),
            synchronous,
        });
        self.answer_delay().await;
        let key = keys.first().cloned().unwrap_or_default();
        let scripted = {
            let mut script = self.script.lock().unwrap();
            script.lot_replies.get_mut(&key).and_then(VecDeque::pop_front)
        };
        scripted.unwrap_or_else(|| Ok(responses::authorized(&key)))
    }

    async fn transmit_event(&self, event: &FiscalEvent) -> Result<Exchange, ToolkitError> {
        let key = event.key().map(|k| k.as_str().to_string());
        self.record(ToolkitCall::TransmitEvent {
            event_type: event.event_type(),
            key: key.clone(),
            sequence: event.sequence(),
        });
        self.answer_delay().await;
        let code = event.event_type().code().unwrap_or_default();
        let request = responses::event_request(code, key.as_deref().unwrap_or_default(), event.sequence());
        let scripted = self.script.lock().unwrap().event_replies.pop_front();
        let response = scripted.unwrap_or_else(|| Ok(responses::event(135)))?;
        Ok(Exchange { request, response })
    }

    async fn build_proof(&self, signed_or_request: &str, response: &str) -> Result<String, ToolkitError> {
        self.record(ToolkitCall::BuildProof);
        let script = self.script.lock().unwrap();
        if let Some(message) = script.proof_failure.clone() {
            return Err(ToolkitError::failed("build_proof", message));
        }
        if script.tiny_proofs {
            return Ok("<proc/>".to_string());
        }
        Ok(format!(
            "<proc versao=\"4.00\">{}{}</proc>",
            strip_declaration(signed_or_request),
            strip_declaration(response)
        ))
    }

    async fn render_proof(&self, _proof: &str, config: &RenderConfig) -> Result<Vec<u8>, ToolkitError> {
        self.record(ToolkitCall::RenderProof { kind: config.kind });
        if let Some(message) = self.script.lock().unwrap().render_failure.clone() {
            return Err(ToolkitError::failed("render_proof", message));
        }
        let mut pdf = b"%PDF-1.4\n".to_vec();
        pdf.resize(2048, b' ');
        pdf.extend_from_slice(b"\n%%EOF\n");
        Ok(pdf)
    }

    async fn query_by_key(&self, key: &DocumentKey) -> Result<String, ToolkitError> {
        self.record(ToolkitCall::QueryByKey {
            key: key.as_str().to_string(),
        });
        let scripted = self.script.lock().unwrap().key_query_replies.pop_front();
        scripted.unwrap_or_else(|| Ok(responses::key_query(key.as_str(), 100)))
    }

    async fn query_service_status(&self, jurisdiction: &str) -> Result<String, ToolkitError> {
        self.record(ToolkitCall::QueryServiceStatus {
            jurisdiction: jurisdiction.to_string(),
        });
        let scripted = self.script.lock().unwrap().status_replies.pop_front();
        scripted.unwrap_or_else(|| Ok(responses::service_status(107)))
    }

    async fn void_range(&self, call: &VoidRangeCall) -> Result<Exchange, ToolkitError> {
        self.record(ToolkitCall::VoidRange(call.clone()));
        self.answer_delay().await;
        let request = format!(
            "<inutNFe versao=\"4.00\"><infInut><xServ>INUTILIZAR</xServ><serie>{}</serie>\
             <nNFIni>{}</nNFIni><nNFFin>{}</nNFFin><xJust>{}</xJust></infInut></inutNFe>",
            call.series, call.start, call.end, call.justification
        );
        let scripted = self.script.lock().unwrap().void_replies.pop_front();
        let response = scripted.unwrap_or_else(|| Ok(responses::voidance(102)))?;
        Ok(Exchange { request, response })
    }
}

/// Authority response bodies in the shapes the classifier expects.
pub mod responses {
    const NS: &str = "http://www.portalfiscal.inf.br/nfe";

    /// Processed lot (104) carrying a protocol with `code`.
    pub fn protocol(key: &str, code: u16) -> String {
        format!(
            "<retEnviNFe xmlns=\"{NS}\" versao=\"4.00\"><tpAmb>2</tpAmb><cStat>104</cStat>\
             <xMotivo>Lote processado</xMotivo><protNFe versao=\"4.00\"><infProt>\
             <tpAmb>2</tpAmb><chNFe>{key}</chNFe><dhRecbto>2025-01-15T10:00:05-03:00</dhRecbto>\
             <nProt>129250000000001</nProt><cStat>{code}</cStat><xMotivo>status {code}</xMotivo>\
             </infProt></protNFe></retEnviNFe>"
        )
    }

    pub fn authorized(key: &str) -> String {
        protocol(key, 100)
    }

    pub fn denied(key: &str) -> String {
        protocol(key, 110)
    }

    /// Lot refused as a whole (no protocol).
    pub fn lot_status(code: u16) -> String {
        format!(
            "<retEnviNFe xmlns=\"{NS}\" versao=\"4.00\"><tpAmb>2</tpAmb><cStat>{code}</cStat>\
             <xMotivo>lote {code}</xMotivo></retEnviNFe>"
        )
    }

    pub fn event(code: u16) -> String {
        format!(
            "<retEnvEvento xmlns=\"{NS}\" versao=\"1.00\"><idLote>1</idLote><tpAmb>2</tpAmb>\
             <cStat>128</cStat><xMotivo>Lote de Evento Processado</xMotivo><retEvento versao=\"1.00\">\
             <infEvento><tpAmb>2</tpAmb><cStat>{code}</cStat><xMotivo>evento {code}</xMotivo>\
             <nProt>229250000000009</nProt></infEvento></retEvento></retEnvEvento>"
        )
    }

    pub fn event_request(code: &str, key: &str, sequence: u16) -> String {
        format!(
            "<envEvento xmlns=\"{NS}\" versao=\"1.00\"><idLote>1</idLote><evento versao=\"1.00\">\
             <infEvento Id=\"ID{code}{key}{sequence:02}\"><chNFe>{key}</chNFe><tpEvento>{code}</tpEvento>\
             <nSeqEvento>{sequence}</nSeqEvento></infEvento></evento></envEvento>"
        )
    }

    pub fn voidance(code: u16) -> String {
        format!(
            "<retInutNFe xmlns=\"{NS}\" versao=\"4.00\"><infInut><tpAmb>2</tpAmb><cStat>{code}</cStat>\
             <xMotivo>inutilizacao {code}</xMotivo><nProt>129250000000077</nProt></infInut></retInutNFe>"
        )
    }

    pub fn service_status(code: u16) -> String {
        format!(
            "<retConsStatServ xmlns=\"{NS}\" versao=\"4.00\"><tpAmb>2</tpAmb><cStat>{code}</cStat>\
             <xMotivo>servico {code}</xMotivo><dhRecbto>2025-01-15T10:00:00-03:00</dhRecbto></retConsStatServ>"
        )
    }

    pub fn key_query(key: &str, code: u16) -> String {
        format!(
            "<retConsSitNFe xmlns=\"{NS}\" versao=\"4.00\"><tpAmb>2</tpAmb><cStat>{code}</cStat>\
             <xMotivo>consulta {code}</xMotivo><chNFe>{key}</chNFe><protNFe versao=\"4.00\"><infProt>\
             <nProt>129250000000001</nProt><dhRecbto>2025-01-15T10:00:05-03:00</dhRecbto>\
             </infProt></protNFe></retConsSitNFe>"
        )
    }
}
