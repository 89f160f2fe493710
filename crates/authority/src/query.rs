//! Reports for read-only queries (key situation and service status).

use serde::Serialize;

use crate::classifier::StatusLine;
use crate::parse::{self, ParseError};

/// Service status code meaning "in operation".
pub const SERVICE_IN_OPERATION: u16 = 107;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryReport {
    pub status: Option<StatusLine>,
    pub key: Option<String>,
    /// Document situation (`cSitNFe`), when the authority returns it.
    pub situation: Option<String>,
    pub protocol: Option<String>,
    pub received_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    InOperation,
    Unavailable,
}

impl QueryReport {
    pub fn service_state(&self) -> ServiceState {
        match &self.status {
            Some(s) if s.code == SERVICE_IN_OPERATION => ServiceState::InOperation,
            _ => ServiceState::Unavailable,
        }
    }
}

/// Pull the common fields out of a query response.
pub fn extract_report(raw: &str) -> Result<QueryReport, ParseError> {
    let doc = parse::document(raw)?;
    let status = parse::first_text(&doc, "cStat")
        .and_then(|c| c.parse().ok())
        .map(|code| StatusLine {
            code,
            reason: parse::first_text(&doc, "xMotivo").unwrap_or_default(),
        });
    Ok(QueryReport {
        status,
        key: parse::first_text(&doc, "chNFe"),
        situation: parse::first_text(&doc, "cSitNFe"),
        protocol: parse::first_text(&doc, "nProt"),
        received_at: parse::first_text(&doc, "dhRecbto"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_query_fields() {
        let raw = "<retConsSitNFe><tpAmb>2</tpAmb><cStat>100</cStat><xMotivo>Autorizado</xMotivo>\
                   <chNFe>29250141986662000160550010000001231123456781</chNFe>\
                   <protNFe><infProt><nProt>129250000000001</nProt>\
                   <dhRecbto>2025-01-15T10:00:05-03:00</dhRecbto></infProt></protNFe></retConsSitNFe>";
        let r = extract_report(raw).unwrap();
        assert_eq!(r.status.as_ref().map(|s| s.code), Some(100));
        assert_eq!(r.protocol.as_deref(), Some("129250000000001"));
        assert_eq!(r.received_at.as_deref(), Some("2025-01-15T10:00:05-03:00"));
        assert_eq!(r.situation, None);
    }

    #[test]
    fn service_status() {
        let up = extract_report("<retConsStatServ><cStat>107</cStat><xMotivo>Servico em Operacao</xMotivo></retConsStatServ>").unwrap();
        assert_eq!(up.service_state(), ServiceState::InOperation);
        let down = extract_report("<retConsStatServ><cStat>108</cStat></retConsStatServ>").unwrap();
        assert_eq!(down.service_state(), ServiceState::Unavailable);
        assert!(extract_report("garbage").is_err());
    }
}
