//! `fiscalflow-core`: fiscal domain building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, fixed-point amounts and lifecycle rules shared by documents and
//! events.

pub mod error;
pub mod id;
pub mod lifecycle;
pub mod money;

pub use error::{DomainError, DomainResult};
pub use id::{BatchId, DocumentKey, KeyParts, LotId};
pub use lifecycle::Lifecycle;
pub use money::{Coerced, Money, Quantity, Rate, UnitValue};
