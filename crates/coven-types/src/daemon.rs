use crate::entry::Entry;
use crate::error::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Daemon lifecycle status.
///
/// Transitions are monotonic: Stopped -> Running -> Completed. Completed
/// is terminal. Skipping Running (shutdown of a never-started daemon) is a
/// legal forward transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DaemonStatus {
    Stopped,
    Running,
    /// Terminal.
    Completed,
}

impl DaemonStatus {
    /// Whether the daemon has reached its terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Running => 1,
            Self::Completed => 2,
        }
    }

    /// Check a proposed transition.
    ///
    /// `Ok(true)` — legal forward transition.
    /// `Ok(false)` — re-entering the current status; callers must treat
    /// this as a no-op and not journal a duplicate event.
    /// `Err(InvalidTransition)` — rank decrease, including anything after
    /// Completed.
    pub fn check_transition(self, next: DaemonStatus) -> Result<bool, DomainError> {
        if self == next {
            return Ok(false);
        }
        if next.rank() > self.rank() {
            Ok(true)
        } else {
            Err(DomainError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "Stopped"),
            Self::Running => write!(f, "Running"),
            Self::Completed => write!(f, "Completed"),
        }
    }
}

/// One record on a daemon's events journal.
///
/// Every accepted status transition appends `StatusChanged`; failures
/// append `FailureOccurred` without altering status. The events journal
/// is the audit log — observers wait on it rather than registering
/// callbacks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DaemonEvent {
    StatusChanged { status: DaemonStatus },
    FailureOccurred { summary: String },
}

impl Entry for DaemonEvent {
    fn tag(&self) -> &'static str {
        match self {
            Self::StatusChanged { .. } => "StatusChanged",
            Self::FailureOccurred { .. } => "FailureOccurred",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_are_accepted() {
        assert_eq!(
            DaemonStatus::Stopped.check_transition(DaemonStatus::Running),
            Ok(true)
        );
        assert_eq!(
            DaemonStatus::Running.check_transition(DaemonStatus::Completed),
            Ok(true)
        );
        assert_eq!(
            DaemonStatus::Stopped.check_transition(DaemonStatus::Completed),
            Ok(true)
        );
    }

    #[test]
    fn reentering_current_status_is_a_noop() {
        assert_eq!(
            DaemonStatus::Running.check_transition(DaemonStatus::Running),
            Ok(false)
        );
        assert_eq!(
            DaemonStatus::Completed.check_transition(DaemonStatus::Completed),
            Ok(false)
        );
    }

    #[test]
    fn completed_rejects_every_exit() {
        for next in [DaemonStatus::Stopped, DaemonStatus::Running] {
            assert_eq!(
                DaemonStatus::Completed.check_transition(next),
                Err(DomainError::InvalidTransition {
                    from: DaemonStatus::Completed,
                    to: next,
                })
            );
        }
    }

    #[test]
    fn running_rejects_stopped() {
        assert!(
            DaemonStatus::Running
                .check_transition(DaemonStatus::Stopped)
                .is_err()
        );
    }

    #[test]
    fn events_are_never_drafts() {
        let changed = DaemonEvent::StatusChanged {
            status: DaemonStatus::Running,
        };
        let failed = DaemonEvent::FailureOccurred {
            summary: "boom".into(),
        };
        assert_eq!(changed.tag(), "StatusChanged");
        assert_eq!(failed.tag(), "FailureOccurred");
        assert!(!changed.is_draft());
        assert!(!failed.is_draft());
    }
}
