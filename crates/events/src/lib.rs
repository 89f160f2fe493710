//! Secondary fiscal events attached to an authorized document (or, for range
//! voidance, to a numbering range).

pub mod event;
pub mod lifecycle;
pub mod voidance;

pub use event::{
    Cancellation, CorrectionNote, EventRequest, EventType, EventValidationError, FiscalEvent,
    Justification, RangeVoidance,
};
pub use lifecycle::EventStatus;
pub use voidance::VoidanceId;
