use serde::Serialize;

use fiscalflow_core::Lifecycle;

/// Event lifecycle.
///
/// `Duplicate` is reached when the authority reports the event as already
/// registered by an earlier attempt; it counts as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Requested,
    Transmitted,
    Registered,
    RegisteredUnlinked,
    Duplicate,
    Rejected,
}

impl EventStatus {
    pub fn is_success(self) -> bool {
        matches!(
            self,
            EventStatus::Registered | EventStatus::RegisteredUnlinked | EventStatus::Duplicate
        )
    }
}

impl Lifecycle for EventStatus {
    fn can_transition_to(self, next: Self) -> bool {
        use EventStatus::*;
        matches!(
            (self, next),
            (Requested, Transmitted)
                | (Transmitted, Registered)
                | (Transmitted, RegisteredUnlinked)
                | (Transmitted, Duplicate)
                | (Transmitted, Rejected)
        )
    }

    fn is_terminal(self) -> bool {
        self.is_success() || self == EventStatus::Rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_follow_transmission() {
        for end in [
            EventStatus::Registered,
            EventStatus::RegisteredUnlinked,
            EventStatus::Duplicate,
            EventStatus::Rejected,
        ] {
            assert_eq!(EventStatus::Requested.walk(&[EventStatus::Transmitted, end]), Ok(end));
            assert!(end.is_terminal());
        }
        assert!(EventStatus::Requested.transition(EventStatus::Registered).is_err());
    }

    #[test]
    fn duplicate_is_success() {
        assert!(EventStatus::Duplicate.is_success());
        assert!(!EventStatus::Rejected.is_success());
    }
}
