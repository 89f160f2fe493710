//! Artifact names.
//!
//! Proof and generated-document names are relied upon by downstream tooling
//! and must not change.

use chrono::Local;

use fiscalflow_core::{DocumentKey, LotId};
use fiscalflow_events::VoidanceId;

use super::{ArtifactKind, ArtifactRef};

const TIMESTAMP_LEN: usize = 15;

/// Local timestamp used in response and diagnostic names.
pub fn timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Replace anything outside `[A-Za-z0-9._-]` so a value is safe as a file
/// name component.
pub fn safe_name(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() { "_".to_string() } else { cleaned }
}

/// `{prefix}-{key}.xml`
pub fn generated(prefix: &str, key: &DocumentKey) -> ArtifactRef {
    ArtifactRef::new(ArtifactKind::Generated, format!("{prefix}-{key}.xml"))
}

/// `{prefix}-{key}.xml` under the signed namespace.
pub fn signed(prefix: &str, key: &DocumentKey) -> ArtifactRef {
    ArtifactRef::new(ArtifactKind::Signed, format!("{prefix}-{key}.xml"))
}

/// `{prefix}-{key}-proc{prefix}.xml`, the authorized proof.
pub fn authorized_proof(prefix: &str, key: &DocumentKey) -> ArtifactRef {
    ArtifactRef::new(ArtifactKind::Authorized, format!("{prefix}-{key}-proc{prefix}.xml"))
}

/// Same layout as the authorized proof, under the denied namespace.
pub fn denied_proof(prefix: &str, key: &DocumentKey) -> ArtifactRef {
    ArtifactRef::new(ArtifactKind::Denied, format!("{prefix}-{key}-proc{prefix}.xml"))
}

pub fn danfe(key: &DocumentKey) -> ArtifactRef {
    ArtifactRef::new(ArtifactKind::RenderedDanfe, format!("DANFE-{key}.pdf"))
}

/// `canc-{key}-procEvento.xml`
pub fn cancellation_proof(key: &DocumentKey) -> ArtifactRef {
    ArtifactRef::new(ArtifactKind::CancellationProof, format!("canc-{key}-procEvento.xml"))
}

/// `cce-{key}-{seq:03}-procEvento.xml`
pub fn correction_proof(key: &DocumentKey, sequence: u16) -> ArtifactRef {
    ArtifactRef::new(
        ArtifactKind::CorrectionProof,
        format!("cce-{key}-{sequence:03}-procEvento.xml"),
    )
}

/// `inut-{idInut}-procInut.xml`
pub fn voidance_proof(id: &VoidanceId) -> ArtifactRef {
    ArtifactRef::new(ArtifactKind::VoidanceProof, format!("inut-{id}-procInut.xml"))
}

pub fn rendered_event(stem: &str) -> ArtifactRef {
    ArtifactRef::new(ArtifactKind::RenderedEvent, format!("{stem}.pdf"))
}

pub fn lot_response(lot: &LotId, ts: &str) -> ArtifactRef {
    ArtifactRef::new(ArtifactKind::Response, format!("ret_envio_{lot}_{ts}.xml"))
}

/// Timestamp of a lot response name, or `None` for any other name.
pub fn lot_response_timestamp(name: &str) -> Option<&str> {
    let stem = name.strip_prefix("ret_envio_")?.strip_suffix(".xml")?;
    let at = stem.len().checked_sub(TIMESTAMP_LEN + 1)?;
    match stem.get(at..)?.split_at(1) {
        ("_", ts) => Some(ts),
        _ => None,
    }
}

/// Raw response of an event exchange: `ret-{stem}-{ts}.xml`.
pub fn event_response(stem: &str, ts: &str) -> ArtifactRef {
    ArtifactRef::new(ArtifactKind::Response, format!("ret-{stem}-{ts}.xml"))
}

/// Raw request of an event exchange: `req-{stem}-{ts}.xml`.
pub fn event_request(stem: &str, ts: &str) -> ArtifactRef {
    ArtifactRef::new(ArtifactKind::Response, format!("req-{stem}-{ts}.xml"))
}

/// Proof that came back implausibly small, kept for inspection.
pub fn suspicious_proof(stem: &str, ts: &str) -> ArtifactRef {
    ArtifactRef::new(ArtifactKind::Response, format!("proc-{stem}-gerado-{ts}.xml"))
}

pub fn status_response(jurisdiction: &str, ts: &str) -> ArtifactRef {
    ArtifactRef::new(
        ArtifactKind::Response,
        format!("ret-status-{}-{ts}.xml", safe_name(jurisdiction)),
    )
}

pub fn key_query_response(key: &DocumentKey) -> ArtifactRef {
    ArtifactRef::new(ArtifactKind::Response, format!("ret-consulta-{key}.xml"))
}

pub fn batch_report(ts: &str, batch: &str) -> ArtifactRef {
    ArtifactRef::new(ArtifactKind::Response, format!("ret-lote-{ts}-{}.json", safe_name(batch)))
}

/// Diagnostic text for a failed stage: `erro-{stage}-{subject}-{ts}.txt`.
pub fn diagnostic(stage: &str, subject: &str, ts: &str) -> ArtifactRef {
    ArtifactRef::new(
        ArtifactKind::Response,
        format!("erro-{}-{}-{ts}.txt", safe_name(stage), safe_name(subject)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use fiscalflow_events::{EventRequest, FiscalEvent};

    const KEY: &str = "29250141986662000160550010000001231123456781";

    fn key() -> DocumentKey {
        KEY.parse().unwrap()
    }

    #[test]
    fn document_names_are_exact() {
        assert_eq!(generated("NFe", &key()).relative_path(), format!("generated/NFe-{KEY}.xml"));
        assert_eq!(signed("NFe", &key()).relative_path(), format!("signed/NFe-{KEY}.xml"));
        assert_eq!(
            authorized_proof("NFe", &key()).relative_path(),
            format!("authorized/NFe-{KEY}-procNFe.xml")
        );
        assert_eq!(denied_proof("NFe", &key()).kind, ArtifactKind::Denied);
        assert_eq!(danfe(&key()).relative_path(), format!("rendered-proof/danfe/DANFE-{KEY}.pdf"));
    }

    #[test]
    fn event_names_are_exact() {
        assert_eq!(
            cancellation_proof(&key()).relative_path(),
            format!("events/cancellation/canc-{KEY}-procEvento.xml")
        );
        assert_eq!(
            correction_proof(&key(), 7).relative_path(),
            format!("events/correction/cce-{KEY}-007-procEvento.xml")
        );

        let req = EventRequest::RangeVoidance {
            year: Some(25),
            series: 1,
            start: 10,
            end: 12,
            justification: None,
        };
        let FiscalEvent::RangeVoidance(v) = req.validate().unwrap() else {
            panic!("expected voidance");
        };
        let id = VoidanceId::new(29, "41986662000160", 55, &v);
        assert_eq!(
            voidance_proof(&id).relative_path(),
            "events/voidance/inut-ID29254198666200016055001000000010000000012-procInut.xml"
        );
    }

    #[test]
    fn safe_name_replaces_unsafe_characters() {
        assert_eq!(safe_name(" a/b c.xml "), "a_b_c.xml");
        assert_eq!(safe_name(".."), "_");
        assert_eq!(diagnostic("sign", "NFe 1", "20250101_000000").name, "erro-sign-NFe_1-20250101_000000.txt");
    }

    #[test]
    fn lot_response_timestamp_is_read_back() {
        let lot: LotId = "000000000000042".parse().unwrap();
        let name = lot_response(&lot, "20250115_100005").name;
        assert_eq!(lot_response_timestamp(&name), Some("20250115_100005"));
        assert_eq!(lot_response_timestamp("ret-canc-1-20250115_100005.xml"), None);
        assert_eq!(lot_response_timestamp("ret_envio_x.xml"), None);
    }

    #[test]
    fn timestamp_layout() {
        let ts = timestamp();
        assert_eq!(ts.len(), TIMESTAMP_LEN);
        assert_eq!(&ts[8..9], "_");
    }
}
