//! Response Classifier.
//!
//! Each transmission kind has a code table: the envelope (lot) status that
//! must be present and successful, the container holding the inner status, and
//! the inner codes with a known meaning. Any inner code not in the table is
//! `Rejected`.
//!
//! ```text
//! raw response
//!   ↓ parse (fails → TechnicalError)
//! envelope cStat  (absent → TechnicalError, ≠ success → Rejected)
//!   ↓
//! inner cStat     (absent → TechnicalError)
//!   ↓
//! table lookup    (unmapped → Rejected)
//! ```

use roxmltree::Document;
use serde::Serialize;

use crate::parse::{self, child, child_text, status_code};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    DocumentTransmission,
    EventTransmission,
    RangeVoidance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Authorized,
    Denied,
    Registered,
    RegisteredUnlinked,
    Duplicate,
    Rejected,
    TechnicalError,
}

impl Outcome {
    /// Outcomes a caller may treat as success.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            Outcome::Authorized | Outcome::Registered | Outcome::RegisteredUnlinked | Outcome::Duplicate
        )
    }
}

/// A status code with the authority's reason text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusLine {
    pub code: u16,
    pub reason: String,
}

/// Classification of one response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub operation: OperationKind,
    pub outcome: Outcome,
    pub envelope: Option<StatusLine>,
    pub inner: Option<StatusLine>,
    /// Authority protocol number (`nProt`) when present.
    pub protocol: Option<String>,
    /// Document key echoed by the authority, when present.
    pub key: Option<String>,
    /// Why the response could not be used, for `TechnicalError`.
    pub detail: Option<String>,
}

impl Classification {
    fn technical(operation: OperationKind, detail: impl Into<String>) -> Self {
        Self {
            operation,
            outcome: Outcome::TechnicalError,
            envelope: None,
            inner: None,
            protocol: None,
            key: None,
            detail: Some(detail.into()),
        }
    }

    /// Most specific status line available.
    pub fn status(&self) -> Option<&StatusLine> {
        self.inner.as_ref().or(self.envelope.as_ref())
    }
}

/// Per-operation code table.
#[derive(Debug, Clone, Copy)]
pub struct CodeTable {
    /// Container element of the envelope status and the success value.
    /// `None` when the operation has no lot envelope.
    pub envelope: Option<(&'static str, u16)>,
    /// Path (parent, element) of the inner status container.
    pub inner: (&'static str, &'static str),
    pub codes: &'static [(u16, Outcome)],
}

pub const DOCUMENT_TRANSMISSION: CodeTable = CodeTable {
    envelope: Some(("retEnviNFe", 104)),
    inner: ("protNFe", "infProt"),
    codes: &[
        (100, Outcome::Authorized),
        (150, Outcome::Authorized),
        (110, Outcome::Denied),
        (301, Outcome::Denied),
        (302, Outcome::Denied),
    ],
};

pub const EVENT_TRANSMISSION: CodeTable = CodeTable {
    envelope: Some(("retEnvEvento", 128)),
    inner: ("retEvento", "infEvento"),
    codes: &[
        (135, Outcome::Registered),
        (136, Outcome::RegisteredUnlinked),
        (573, Outcome::Duplicate),
    ],
};

pub const RANGE_VOIDANCE: CodeTable = CodeTable {
    envelope: None,
    inner: ("retInutNFe", "infInut"),
    codes: &[(102, Outcome::Registered), (563, Outcome::Duplicate)],
};

impl OperationKind {
    pub fn table(self) -> &'static CodeTable {
        match self {
            OperationKind::DocumentTransmission => &DOCUMENT_TRANSMISSION,
            OperationKind::EventTransmission => &EVENT_TRANSMISSION,
            OperationKind::RangeVoidance => &RANGE_VOIDANCE,
        }
    }
}

impl CodeTable {
    pub fn lookup(&self, code: u16) -> Outcome {
        self.codes
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, o)| *o)
            .unwrap_or(Outcome::Rejected)
    }
}

/// Classify a raw authority response. Pure and deterministic.
pub fn classify(raw: &str, operation: OperationKind) -> Classification {
    let doc = match parse::document(raw) {
        Ok(doc) => doc,
        Err(e) => return Classification::technical(operation, e.to_string()),
    };
    let table = operation.table();

    let envelope = match table.envelope {
        None => None,
        Some((container, success)) => match envelope_status(&doc, container) {
            None => {
                return Classification::technical(operation, "envelope status code absent");
            }
            Some(line) if line.code != success => {
                return Classification {
                    operation,
                    outcome: Outcome::Rejected,
                    envelope: Some(line),
                    inner: None,
                    protocol: None,
                    key: None,
                    detail: None,
                };
            }
            Some(line) => Some(line),
        },
    };

    let (parent, element) = table.inner;
    let inner_node = doc
        .descendants()
        .find(|n| {
            n.is_element()
                && n.tag_name().name() == element
                && n.parent_element().map(|p| p.tag_name().name()) == Some(parent)
        })
        .or_else(|| parse::first(&doc, element));

    let Some(node) = inner_node else {
        let mut c = Classification::technical(operation, format!("{element} absent"));
        c.envelope = envelope;
        return c;
    };
    let Some(code) = status_code(node) else {
        let mut c = Classification::technical(operation, format!("{element}/cStat absent"));
        c.envelope = envelope;
        return c;
    };

    let inner = StatusLine {
        code,
        reason: child_text(node, "xMotivo").unwrap_or_default(),
    };
    Classification {
        operation,
        outcome: table.lookup(code),
        envelope,
        inner: Some(inner),
        protocol: child_text(node, "nProt"),
        key: child_text(node, "chNFe"),
        detail: None,
    }
}

/// `cStat` directly under the envelope container, or the first `cStat` in
/// the document when the container is missing (unwrapped responses).
fn envelope_status(doc: &Document<'_>, container: &str) -> Option<StatusLine> {
    match parse::first(doc, container) {
        Some(node) => status_code(node).map(|code| StatusLine {
            code,
            reason: child_text(node, "xMotivo").unwrap_or_default(),
        }),
        None => {
            let stat = parse::first(doc, "cStat")?;
            let code = stat.text()?.trim().parse().ok()?;
            let reason = stat
                .parent_element()
                .and_then(|p| child(p, "xMotivo"))
                .and_then(|n| n.text())
                .map(|s| s.trim().to_string())
                .unwrap_or_default();
            Some(StatusLine { code, reason })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lot(lot_code: u16, prot_code: Option<u16>) -> String {
        let prot = prot_code
            .map(|c| {
                format!(
                    "<protNFe versao=\"4.00\"><infProt><tpAmb>2</tpAmb>\
                     <chNFe>29250141986662000160550010000001231123456781</chNFe>\
                     <nProt>129250000000001</nProt><cStat>{c}</cStat><xMotivo>motivo {c}</xMotivo>\
                     </infProt></protNFe>"
                )
            })
            .unwrap_or_default();
        format!(
            "<retEnviNFe xmlns=\"http://www.portalfiscal.inf.br/nfe\" versao=\"4.00\">\
             <tpAmb>2</tpAmb><cStat>{lot_code}</cStat><xMotivo>Lote processado</xMotivo>{prot}</retEnviNFe>"
        )
    }

    fn event(lot_code: u16, event_code: Option<u16>) -> String {
        let inner = event_code
            .map(|c| {
                format!(
                    "<retEvento versao=\"1.00\"><infEvento><cStat>{c}</cStat>\
                     <xMotivo>evento {c}</xMotivo><nProt>229250000000009</nProt></infEvento></retEvento>"
                )
            })
            .unwrap_or_default();
        format!(
            "<retEnvEvento><idLote>1</idLote><cStat>{lot_code}</cStat>\
             <xMotivo>Lote de evento processado</xMotivo>{inner}</retEnvEvento>"
        )
    }

    #[test]
    fn lot_104_protocol_100_is_authorized() {
        let c = classify(&lot(104, Some(100)), OperationKind::DocumentTransmission);
        assert_eq!(c.outcome, Outcome::Authorized);
        assert_eq!(c.protocol.as_deref(), Some("129250000000001"));
        assert_eq!(c.envelope.as_ref().map(|s| s.code), Some(104));
        assert_eq!(c.inner.as_ref().map(|s| s.reason.as_str()), Some("motivo 100"));
        assert_eq!(c.key.as_deref(), Some("29250141986662000160550010000001231123456781"));
    }

    #[test]
    fn lot_104_protocol_150_is_authorized() {
        assert_eq!(classify(&lot(104, Some(150)), OperationKind::DocumentTransmission).outcome, Outcome::Authorized);
    }

    #[test]
    fn denial_codes_are_denied() {
        for code in [110, 301, 302] {
            let c = classify(&lot(104, Some(code)), OperationKind::DocumentTransmission);
            assert_eq!(c.outcome, Outcome::Denied, "code {code}");
        }
    }

    #[test]
    fn unmapped_protocol_code_is_rejected() {
        let c = classify(&lot(104, Some(999)), OperationKind::DocumentTransmission);
        assert_eq!(c.outcome, Outcome::Rejected);
        assert_eq!(c.inner.map(|s| s.code), Some(999));
    }

    #[test]
    fn lot_not_processed_is_rejected() {
        let c = classify(&lot(205, None), OperationKind::DocumentTransmission);
        assert_eq!(c.outcome, Outcome::Rejected);
        assert_eq!(c.envelope.map(|s| s.code), Some(205));
        assert!(c.inner.is_none());
    }

    #[test]
    fn unparseable_body_is_technical_error() {
        let c = classify("<html>502 Bad Gateway", OperationKind::DocumentTransmission);
        assert_eq!(c.outcome, Outcome::TechnicalError);
        assert!(c.detail.is_some());
        assert_eq!(classify("", OperationKind::EventTransmission).outcome, Outcome::TechnicalError);
    }

    #[test]
    fn missing_envelope_code_is_technical_error() {
        let c = classify("<retEnviNFe><xMotivo>?</xMotivo></retEnviNFe>", OperationKind::DocumentTransmission);
        assert_eq!(c.outcome, Outcome::TechnicalError);
    }

    #[test]
    fn processed_lot_without_protocol_is_technical_error() {
        let c = classify(&lot(104, None), OperationKind::DocumentTransmission);
        assert_eq!(c.outcome, Outcome::TechnicalError);
        assert_eq!(c.envelope.map(|s| s.code), Some(104));
    }

    #[test]
    fn soap_wrapped_response_is_classified() {
        let raw = format!(
            "<soap:Envelope xmlns:soap=\"http://www.w3.org/2003/05/soap-envelope\"><soap:Body>\
             <nfeResultMsg>{}</nfeResultMsg></soap:Body></soap:Envelope>",
            lot(104, Some(100))
        );
        assert_eq!(classify(&raw, OperationKind::DocumentTransmission).outcome, Outcome::Authorized);
    }

    #[test]
    fn event_codes() {
        let kind = OperationKind::EventTransmission;
        assert_eq!(classify(&event(128, Some(135)), kind).outcome, Outcome::Registered);
        assert_eq!(classify(&event(128, Some(136)), kind).outcome, Outcome::RegisteredUnlinked);
        assert_eq!(classify(&event(128, Some(573)), kind).outcome, Outcome::Duplicate);
        assert!(Outcome::Duplicate.is_success());
        assert_eq!(classify(&event(128, Some(301)), kind).outcome, Outcome::Rejected);
        assert_eq!(classify(&event(215, None), kind).outcome, Outcome::Rejected);
        assert_eq!(classify(&event(128, None), kind).outcome, Outcome::TechnicalError);
    }

    #[test]
    fn voidance_has_no_envelope() {
        let raw = |c: u16| {
            format!(
                "<retInutNFe versao=\"4.00\"><infInut><tpAmb>2</tpAmb><cStat>{c}</cStat>\
                 <xMotivo>m</xMotivo><nProt>129250000000077</nProt></infInut></retInutNFe>"
            )
        };
        let c = classify(&raw(102), OperationKind::RangeVoidance);
        assert_eq!(c.outcome, Outcome::Registered);
        assert_eq!(c.envelope, None);
        assert_eq!(c.protocol.as_deref(), Some("129250000000077"));
        assert_eq!(classify(&raw(563), OperationKind::RangeVoidance).outcome, Outcome::Duplicate);
        assert_eq!(classify(&raw(241), OperationKind::RangeVoidance).outcome, Outcome::Rejected);
    }

    #[test]
    fn classification_is_deterministic() {
        let raw = lot(104, Some(100));
        assert_eq!(
            classify(&raw, OperationKind::DocumentTransmission),
            classify(&raw, OperationKind::DocumentTransmission)
        );
    }
}
