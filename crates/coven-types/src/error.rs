use crate::daemon::DaemonStatus;

/// Violations of the core data model rules.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Status ranks must strictly increase; Completed accepts nothing.
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition {
        from: DaemonStatus,
        to: DaemonStatus,
    },
}
