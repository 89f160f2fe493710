use serde::Deserialize;
use serde_json::Value;

use fiscalflow_events::EventRequest;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub chave: String,
    pub protocolo: String,
    #[serde(default)]
    pub just: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CorrectionRequest {
    pub chave: String,
    pub texto: String,
    #[serde(default = "first_sequence")]
    pub seq: i64,
}

fn first_sequence() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct VoidanceRequest {
    /// Two-digit year, as a number or a string (`"25"`).
    #[serde(default)]
    pub ano: Option<Value>,
    pub serie: i64,
    pub ini: i64,
    pub fim: i64,
    #[serde(default)]
    pub just: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusParams {
    #[serde(default)]
    pub uf: Option<String>,
}

// -------------------------
// Mapping
// -------------------------

impl From<CancelRequest> for EventRequest {
    fn from(body: CancelRequest) -> Self {
        EventRequest::Cancellation {
            key: body.chave,
            protocol: body.protocolo,
            justification: body.just,
        }
    }
}

impl From<CorrectionRequest> for EventRequest {
    fn from(body: CorrectionRequest) -> Self {
        EventRequest::CorrectionNote {
            key: body.chave,
            sequence: body.seq,
            text: body.texto,
        }
    }
}

impl TryFrom<VoidanceRequest> for EventRequest {
    type Error = String;

    fn try_from(body: VoidanceRequest) -> Result<Self, Self::Error> {
        let year = match body.ano {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => Some(n.as_i64().ok_or("ano must be an integer")?),
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(
                s.trim()
                    .parse()
                    .map_err(|_| format!("ano must be a two-digit year, got {s:?}"))?,
            ),
            Some(other) => return Err(format!("ano must be a two-digit year, got {other}")),
        };
        Ok(EventRequest::RangeVoidance {
            year,
            series: body.serie,
            start: body.ini,
            end: body.fim,
            justification: body.just,
        })
    }
}

/// Documents of an emission body: one object, an array, or an object
/// wrapping the array under `documents` (or `notas`).
pub fn documents_from_body(body: Value) -> Result<Vec<Value>, &'static str> {
    let documents = match body {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("documents").or_else(|| map.remove("notas")) {
            Some(Value::Array(items)) => items,
            Some(_) => return Err("documents must be an array"),
            None => vec![Value::Object(map)],
        },
        _ => return Err("body must be a JSON object or array"),
    };
    if documents.is_empty() {
        return Err("no documents to emit");
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn emission_body_shapes() {
        assert_eq!(documents_from_body(json!({"ide": {}})).unwrap().len(), 1);
        assert_eq!(documents_from_body(json!([{"a": 1}, {"b": 2}])).unwrap().len(), 2);
        assert_eq!(documents_from_body(json!({"documents": [{}, {}, {}]})).unwrap().len(), 3);
        assert_eq!(documents_from_body(json!({"notas": [{}]})).unwrap().len(), 1);
        assert!(documents_from_body(json!([])).is_err());
        assert!(documents_from_body(json!({"documents": {}})).is_err());
        assert!(documents_from_body(json!("x")).is_err());
    }

    #[test]
    fn voidance_year_accepts_text_or_number() {
        let body = |ano: Value| VoidanceRequest {
            ano: Some(ano),
            serie: 1,
            ini: 1,
            fim: 2,
            just: None,
        };
        let year = |req: EventRequest| match req {
            EventRequest::RangeVoidance { year, .. } => year,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(year(EventRequest::try_from(body(json!("25"))).unwrap()), Some(25));
        assert_eq!(year(EventRequest::try_from(body(json!(24))).unwrap()), Some(24));
        assert_eq!(year(EventRequest::try_from(body(json!(""))).unwrap()), None);
        assert!(EventRequest::try_from(body(json!("vinte"))).is_err());
    }
}
