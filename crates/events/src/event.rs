use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};

use fiscalflow_core::DocumentKey;
use fiscalflow_core::id::only_digits;

pub const MIN_JUSTIFICATION_CHARS: usize = 15;
pub const MAX_JUSTIFICATION_CHARS: usize = 255;
pub const MAX_CORRECTION_CHARS: usize = 1000;
pub const MIN_PROTOCOL_DIGITS: usize = 10;
pub const MAX_CORRECTION_SEQUENCE: i64 = 999;

pub const DEFAULT_CANCELLATION_JUSTIFICATION: &str = "Cancelamento por solicitação do cliente.";
pub const DEFAULT_VOIDANCE_JUSTIFICATION: &str = "Inutilização por numeração não utilizada.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Cancellation,
    CorrectionNote,
    RangeVoidance,
}

impl EventType {
    /// Authority event type code (`tpEvento`). Range voidance is a separate
    /// service and has none.
    pub fn code(self) -> Option<&'static str> {
        match self {
            EventType::Cancellation => Some("110111"),
            EventType::CorrectionNote => Some("110110"),
            EventType::RangeVoidance => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Cancellation => "cancellation",
            EventType::CorrectionNote => "correction_note",
            EventType::RangeVoidance => "range_voidance",
        }
    }
}

impl core::fmt::Display for EventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventValidationError {
    #[error("invalid document key: {reason}")]
    InvalidKey { reason: String },

    #[error("{field} must have at least {min} characters (got {actual})")]
    TooShort { field: &'static str, min: usize, actual: usize },

    #[error("{field} must have at most {max} characters (got {actual})")]
    TooLong { field: &'static str, max: usize, actual: usize },

    #[error("sequence {sequence} outside 1..=999")]
    SequenceOutOfRange { sequence: i64 },

    #[error("protocol must have at least 10 digits (got {digits})")]
    InvalidProtocol { digits: usize },

    #[error("{field} {value} out of range")]
    OutOfRange { field: &'static str, value: i64 },

    #[error("range end {end} is below start {start}")]
    InvertedRange { start: i64, end: i64 },
}

/// Free text with the authority's length rules, trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Justification(String);

impl Justification {
    /// Character (not byte) count must be within `min..=max` after trimming.
    pub fn parse(
        field: &'static str,
        raw: &str,
        min: usize,
        max: usize,
    ) -> Result<Self, EventValidationError> {
        let trimmed = raw.trim();
        let actual = trimmed.chars().count();
        if actual < min {
            return Err(EventValidationError::TooShort { field, min, actual });
        }
        if actual > max {
            return Err(EventValidationError::TooLong { field, max, actual });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cancellation {
    pub key: DocumentKey,
    /// Authorization protocol number of the document being cancelled.
    pub protocol: String,
    pub justification: Justification,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorrectionNote {
    pub key: DocumentKey,
    pub sequence: u16,
    pub text: Justification,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RangeVoidance {
    /// Two-digit year.
    pub year: u8,
    pub series: u16,
    pub start: u32,
    pub end: u32,
    pub justification: Justification,
}

/// A validated event, ready for transmission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FiscalEvent {
    Cancellation(Cancellation),
    CorrectionNote(CorrectionNote),
    RangeVoidance(RangeVoidance),
}

impl FiscalEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            FiscalEvent::Cancellation(_) => EventType::Cancellation,
            FiscalEvent::CorrectionNote(_) => EventType::CorrectionNote,
            FiscalEvent::RangeVoidance(_) => EventType::RangeVoidance,
        }
    }

    /// Document the event is attached to (none for range voidance).
    pub fn key(&self) -> Option<&DocumentKey> {
        match self {
            FiscalEvent::Cancellation(c) => Some(&c.key),
            FiscalEvent::CorrectionNote(c) => Some(&c.key),
            FiscalEvent::RangeVoidance(_) => None,
        }
    }

    /// Event sequence; fixed at 1 except for correction notes.
    pub fn sequence(&self) -> u16 {
        match self {
            FiscalEvent::CorrectionNote(c) => c.sequence,
            _ => 1,
        }
    }
}

/// Raw event request as received from a caller. Numeric fields are kept wide
/// so out-of-range input reaches validation instead of failing to parse.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventRequest {
    Cancellation {
        key: String,
        protocol: String,
        #[serde(default)]
        justification: Option<String>,
    },
    CorrectionNote {
        key: String,
        sequence: i64,
        text: String,
    },
    RangeVoidance {
        #[serde(default)]
        year: Option<i64>,
        series: i64,
        start: i64,
        end: i64,
        #[serde(default)]
        justification: Option<String>,
    },
}

impl EventRequest {
    pub fn event_type(&self) -> EventType {
        match self {
            EventRequest::Cancellation { .. } => EventType::Cancellation,
            EventRequest::CorrectionNote { .. } => EventType::CorrectionNote,
            EventRequest::RangeVoidance { .. } => EventType::RangeVoidance,
        }
    }

    /// Validate against the current two-digit year.
    pub fn validate(&self) -> Result<FiscalEvent, EventValidationError> {
        self.validate_in_year((Utc::now().year() % 100) as u8)
    }

    /// Validate shape and bounds. Nothing invalid is ever transmitted.
    pub fn validate_in_year(&self, current_year: u8) -> Result<FiscalEvent, EventValidationError> {
        match self {
            EventRequest::Cancellation {
                key,
                protocol,
                justification,
            } => {
                let key = parse_key(key)?;
                let protocol = only_digits(protocol);
                if protocol.len() < MIN_PROTOCOL_DIGITS {
                    return Err(EventValidationError::InvalidProtocol {
                        digits: protocol.len(),
                    });
                }
                let justification = Justification::parse(
                    "justification",
                    justification_or(justification, DEFAULT_CANCELLATION_JUSTIFICATION),
                    MIN_JUSTIFICATION_CHARS,
                    MAX_JUSTIFICATION_CHARS,
                )?;
                Ok(FiscalEvent::Cancellation(Cancellation {
                    key,
                    protocol,
                    justification,
                }))
            }
            EventRequest::CorrectionNote {
                key,
                sequence,
                text,
            } => {
                let key = parse_key(key)?;
                if !(1..=MAX_CORRECTION_SEQUENCE).contains(sequence) {
                    return Err(EventValidationError::SequenceOutOfRange {
                        sequence: *sequence,
                    });
                }
                let text = Justification::parse(
                    "text",
                    text,
                    MIN_JUSTIFICATION_CHARS,
                    MAX_CORRECTION_CHARS,
                )?;
                Ok(FiscalEvent::CorrectionNote(CorrectionNote {
                    key,
                    sequence: *sequence as u16,
                    text,
                }))
            }
            EventRequest::RangeVoidance {
                year,
                series,
                start,
                end,
                justification,
            } => {
                let year = year.unwrap_or(i64::from(current_year));
                let year = bounded("year", year, 0, 99)?;
                let series = bounded("series", *series, 1, 999)?;
                let start = bounded("start", *start, 1, 999_999_999)?;
                let end = bounded("end", *end, 1, 999_999_999)?;
                if end < start {
                    return Err(EventValidationError::InvertedRange { start, end });
                }
                let justification = Justification::parse(
                    "justification",
                    justification_or(justification, DEFAULT_VOIDANCE_JUSTIFICATION),
                    MIN_JUSTIFICATION_CHARS,
                    MAX_JUSTIFICATION_CHARS,
                )?;
                Ok(FiscalEvent::RangeVoidance(RangeVoidance {
                    year: year as u8,
                    series: series as u16,
                    start: start as u32,
                    end: end as u32,
                    justification,
                }))
            }
        }
    }
}

fn parse_key(raw: &str) -> Result<DocumentKey, EventValidationError> {
    raw.parse().map_err(|e: fiscalflow_core::DomainError| EventValidationError::InvalidKey {
        reason: e.to_string(),
    })
}

fn justification_or<'a>(given: &'a Option<String>, default: &'a str) -> &'a str {
    match given.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s,
        _ => default,
    }
}

fn bounded(field: &'static str, value: i64, min: i64, max: i64) -> Result<i64, EventValidationError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(EventValidationError::OutOfRange { field, value })
    }
}
