use std::fmt;

use coven_journal::JournalError;
use coven_types::DomainError;

/// Failures surfaced by user-supplied bodies: blocks, transmuters,
/// batchers. The core never catches inside them.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by daemon lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// Restarting a Completed daemon, or any other rank decrease.
    #[error("daemon '{name}': {source}")]
    InvalidTransition {
        name: String,
        #[source]
        source: DomainError,
    },

    /// The inner scope of a composite daemon failed.
    #[error("inner scope failed: {source}")]
    Scope {
        #[source]
        source: Box<ScopeError>,
    },

    #[error(transparent)]
    Journal(#[from] JournalError),
}

/// Errors produced by execution scope lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    /// Operation on a scope that has already ended.
    #[error("scope is disposed")]
    Disposed,

    /// A daemon refused to start; daemons started earlier stay up until
    /// the scope ends.
    #[error("daemon '{name}' failed to start: {source}")]
    Start {
        name: String,
        #[source]
        source: DaemonError,
    },

    /// Every daemon's shutdown ran; these are the ones that failed.
    #[error("scope shutdown failed for {} daemon(s)", .failures.len())]
    Shutdown { failures: Vec<(String, DaemonError)> },
}

/// Errors produced by routing a ritual.
#[derive(Debug, thiserror::Error)]
pub enum RitualError {
    /// No block consumes the current value and it is not the declared
    /// output type.
    #[error("no block consumes a value of type {type_name}")]
    NoRoute { type_name: &'static str },

    /// The caller asked for an output type other than the declared one.
    #[error("ritual routed to {actual} but its declared output is {declared}")]
    OutputMismatch {
        actual: &'static str,
        declared: &'static str,
    },

    /// The ritual fails with the first unhandled error from a block.
    #[error("block '{block}' failed: {source}")]
    Block {
        block: String,
        #[source]
        source: BoxError,
    },

    /// A block body panicked. Scope teardown still ran.
    #[error("ritual body panicked: {detail}")]
    Panicked { detail: String },

    #[error("ritual cancelled")]
    Cancelled,

    #[error(transparent)]
    Scope(#[from] ScopeError),
}

/// One offence detected while validating a covenant graph.
///
/// Grouped by check: closure (dead letters, orphans), reachability, and
/// double-booking.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CovenantOffence {
    /// A produced type is neither consumed nor declared a sink.
    DeadLetter { type_name: &'static str },
    /// A consumed type is neither produced nor declared a source.
    OrphanConsumer { type_name: &'static str },
    /// A source from which no sink can be reached.
    SourceReachesNoSink { type_name: &'static str },
    /// A sink no source can reach.
    UnreachableSink { type_name: &'static str },
    /// A type both routed onward and declared a sink.
    RoutedSink { type_name: &'static str },
    /// Two transforms claim the same input type; junctions are the
    /// supported form of fan-out.
    DuplicateTransform { type_name: &'static str },
    /// A junction with no routes and no fallback.
    EmptyJunction { type_name: &'static str },
}

impl fmt::Display for CovenantOffence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeadLetter { type_name } => {
                write!(f, "dead letter: {type_name} is produced but never consumed")
            }
            Self::OrphanConsumer { type_name } => {
                write!(f, "orphan consumer: {type_name} is consumed but never produced")
            }
            Self::SourceReachesNoSink { type_name } => {
                write!(f, "source {type_name} reaches no sink")
            }
            Self::UnreachableSink { type_name } => {
                write!(f, "sink {type_name} is unreachable from every source")
            }
            Self::RoutedSink { type_name } => {
                write!(f, "{type_name} is both routed onward and declared a sink")
            }
            Self::DuplicateTransform { type_name } => {
                write!(
                    f,
                    "{type_name} has more than one transform; use a junction to fan out"
                )
            }
            Self::EmptyJunction { type_name } => {
                write!(f, "junction over {type_name} has no routes and no fallback")
            }
        }
    }
}

/// Aggregate validation failure for one covenant: every offence, named.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CovenantError {
    pub covenant: String,
    pub offences: Vec<CovenantOffence>,
}

impl fmt::Display for CovenantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "covenant '{}' failed validation with {} offence(s):",
            self.covenant,
            self.offences.len()
        )?;
        for offence in &self.offences {
            writeln!(f, "  - {offence}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CovenantError {}
