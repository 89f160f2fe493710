//! Lifecycle state machines for documents and events.

use crate::error::{DomainError, DomainResult};

/// A finite lifecycle with explicit transitions and terminal states.
///
/// Implementations stay pure: they only describe which moves are legal. The
/// pipelines decide *when* to move, and persistence of the resulting state is
/// an infrastructure concern.
pub trait Lifecycle: Copy + Eq + core::fmt::Debug {
    /// Whether `next` may follow `self` directly.
    fn can_transition_to(self, next: Self) -> bool;

    /// Terminal states admit no further transitions under the same identity.
    fn is_terminal(self) -> bool;

    /// Validate and perform a transition.
    fn transition(self, next: Self) -> DomainResult<Self> {
        if self.is_terminal() {
            return Err(DomainError::conflict(format!(
                "{self:?} is terminal (attempted transition to {next:?})"
            )));
        }
        if !self.can_transition_to(next) {
            return Err(DomainError::invariant(format!(
                "illegal transition {self:?} -> {next:?}"
            )));
        }
        Ok(next)
    }

    /// Walk a full path of transitions, failing at the first illegal step.
    fn walk(self, path: &[Self]) -> DomainResult<Self> {
        path.iter().try_fold(self, |state, next| state.transition(*next))
    }
}
