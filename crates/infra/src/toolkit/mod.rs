//! Fiscal Toolkit boundary.
//!
//! Signing, transport to the authority, schema validation and PDF rendering
//! are done by an external toolkit. The pipelines only see the
//! [`FiscalToolkit`] trait:
//!
//! - [`ProcessToolkit`] drives the real toolkit as a subprocess speaking JSON
//!   over stdin/stdout.
//! - [`ScriptedToolkit`] is an in-process double that replays scripted
//!   authority responses and records every call.
//!
//! What a toolkit can do is asked once ([`ToolkitCapabilities`]) and the
//! calls are shaped accordingly, instead of discovering signatures by trial
//! and error on every call.

pub mod process;
pub mod scripted;
pub mod r#trait;

use serde::{Deserialize, Serialize};

use fiscalflow_events::RangeVoidance;

pub use process::ProcessToolkit;
pub use scripted::{ScriptedToolkit, ToolkitCall};
pub use r#trait::{FiscalToolkit, ToolkitError};

/// Parameters the toolkit's range-voidance call accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoidRangeArity {
    /// series, start, end, justification, environment, year
    Full,
    /// series, start, end, justification, environment
    WithoutYear,
    /// series, start, end, justification
    Minimal,
}

impl VoidRangeArity {
    pub fn from_arg_count(count: u8) -> Option<Self> {
        match count {
            6 => Some(VoidRangeArity::Full),
            5 => Some(VoidRangeArity::WithoutYear),
            4 => Some(VoidRangeArity::Minimal),
            _ => None,
        }
    }

    pub fn accepts_year(self) -> bool {
        self == VoidRangeArity::Full
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolkitCapabilities {
    pub schema_validation: bool,
    pub void_range_arity: VoidRangeArity,
}

impl ToolkitCapabilities {
    /// What every toolkit version supports.
    pub fn minimal() -> Self {
        Self {
            schema_validation: false,
            void_range_arity: VoidRangeArity::Minimal,
        }
    }

    pub fn full() -> Self {
        Self {
            schema_validation: true,
            void_range_arity: VoidRangeArity::Full,
        }
    }
}

impl Default for ToolkitCapabilities {
    fn default() -> Self {
        Self::minimal()
    }
}

/// A transmitted request together with the authority's raw response. The
/// request is needed to build event proofs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub request: String,
    pub response: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderKind {
    /// Printable document (DANFE).
    Danfe,
    /// Printable event record.
    Event,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderConfig {
    pub kind: RenderKind,
    /// Authority event type code, for event renders.
    pub event_code: Option<String>,
}

impl RenderConfig {
    pub fn danfe() -> Self {
        Self {
            kind: RenderKind::Danfe,
            event_code: None,
        }
    }

    pub fn event(code: &str) -> Self {
        Self {
            kind: RenderKind::Event,
            event_code: Some(code.to_string()),
        }
    }
}

/// Arguments of a range-voidance call, trimmed to what the toolkit accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidRangeCall {
    pub series: u16,
    pub start: u32,
    pub end: u32,
    pub justification: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<u8>,
}

impl VoidRangeCall {
    pub fn shaped(arity: VoidRangeArity, voidance: &RangeVoidance, environment: u8) -> Self {
        let (environment, year) = match arity {
            VoidRangeArity::Full => (Some(environment), Some(voidance.year)),
            VoidRangeArity::WithoutYear => (Some(environment), None),
            VoidRangeArity::Minimal => (None, None),
        };
        Self {
            series: voidance.series,
            start: voidance.start,
            end: voidance.end,
            justification: voidance.justification.as_str().to_string(),
            environment,
            year,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fiscalflow_events::{EventRequest, FiscalEvent};

    fn voidance() -> RangeVoidance {
        let req = EventRequest::RangeVoidance {
            year: Some(24),
            series: 2,
            start: 5,
            end: 9,
            justification: None,
        };
        match req.validate_in_year(25).unwrap() {
            FiscalEvent::RangeVoidance(v) => v,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn voidance_call_follows_arity() {
        let v = voidance();
        let full = VoidRangeCall::shaped(VoidRangeArity::Full, &v, 2);
        assert_eq!((full.environment, full.year), (Some(2), Some(24)));

        let five = VoidRangeCall::shaped(VoidRangeArity::WithoutYear, &v, 2);
        assert_eq!((five.environment, five.year), (Some(2), None));

        let four = VoidRangeCall::shaped(VoidRangeArity::Minimal, &v, 2);
        assert_eq!((four.environment, four.year), (None, None));
        assert_eq!((four.series, four.start, four.end), (2, 5, 9));
        assert_eq!(
            serde_json::to_value(&four).unwrap(),
            serde_json::json!({
                "series": 2, "start": 5, "end": 9,
                "justification": "Inutilização por numeração não utilizada."
            })
        );
    }

    #[test]
    fn arity_from_argument_count() {
        assert_eq!(VoidRangeArity::from_arg_count(6), Some(VoidRangeArity::Full));
        assert_eq!(VoidRangeArity::from_arg_count(5), Some(VoidRangeArity::WithoutYear));
        assert_eq!(VoidRangeArity::from_arg_count(4), Some(VoidRangeArity::Minimal));
        assert_eq!(VoidRangeArity::from_arg_count(3), None);
    }
}
