use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use coven_journal::{MemoryScrivener, Scrivener, ScrivenerExt};
use coven_types::{DaemonEvent, DaemonStatus, FromEntry};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::DaemonError;

/// A long-running component with a journaled lifecycle.
///
/// Implementations own a [`ContractDaemon`] and drive every status change
/// through it. `start` and `shutdown` are idempotent: invoking them in
/// the target state is a no-op that journals nothing. `start` after
/// Completed is rejected.
#[async_trait]
pub trait Daemon: Send + Sync {
    /// The journaled lifecycle this daemon drives.
    fn contract(&self) -> &ContractDaemon;

    async fn start(&self, cancel: &CancellationToken) -> Result<(), DaemonError>;

    async fn shutdown(&self, cancel: &CancellationToken) -> Result<(), DaemonError>;

    fn name(&self) -> &str {
        self.contract().name()
    }

    fn status(&self) -> DaemonStatus {
        self.contract().status()
    }
}

const STOPPED: u8 = 0;
const RUNNING: u8 = 1;
const COMPLETED: u8 = 2;

fn encode(status: DaemonStatus) -> u8 {
    match status {
        DaemonStatus::Stopped => STOPPED,
        DaemonStatus::Running => RUNNING,
        DaemonStatus::Completed => COMPLETED,
    }
}

fn decode(raw: u8) -> DaemonStatus {
    match raw {
        RUNNING => DaemonStatus::Running,
        COMPLETED => DaemonStatus::Completed,
        _ => DaemonStatus::Stopped,
    }
}

/// Projection of `FailureOccurred` used by failure waits.
#[derive(Clone, Debug)]
struct Failure(String);

impl FromEntry<DaemonEvent> for Failure {
    fn from_entry(entry: &DaemonEvent) -> Option<Self> {
        match entry {
            DaemonEvent::FailureOccurred { summary } => Some(Self(summary.clone())),
            _ => None,
        }
    }
}

/// Journaled daemon lifecycle.
///
/// Accepted transitions append `StatusChanged` to an events journal owned
/// by value; failures append `FailureOccurred` without a status change.
/// Transitions are serialised by a single-writer lock, while `status`
/// reads are lock-free and eventually consistent. Observers wait on the
/// events journal from position 0, so transitions that happened before
/// the wait are still observed — a race-free signal with no callback
/// registration.
pub struct ContractDaemon {
    name: String,
    events: MemoryScrivener<DaemonEvent>,
    status: AtomicU8,
    writer: tokio::sync::Mutex<()>,
}

impl ContractDaemon {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            events: MemoryScrivener::new(),
            status: AtomicU8::new(STOPPED),
            writer: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> DaemonStatus {
        decode(self.status.load(Ordering::Acquire))
    }

    /// Non-owning view of the events journal.
    pub fn events(&self) -> &MemoryScrivener<DaemonEvent> {
        &self.events
    }

    /// Apply a monotonic status change.
    ///
    /// Returns `false` when re-entering the current status: a no-op that
    /// journals no duplicate event. Rank decreases — including anything
    /// after Completed — fail with `InvalidTransition`.
    pub async fn transition(&self, next: DaemonStatus) -> Result<bool, DaemonError> {
        let _writer = self.writer.lock().await;
        let current = self.status();
        let advance =
            current
                .check_transition(next)
                .map_err(|source| DaemonError::InvalidTransition {
                    name: self.name.clone(),
                    source,
                })?;
        if !advance {
            return Ok(false);
        }
        self.events
            .append(DaemonEvent::StatusChanged { status: next })
            .await?;
        self.status.store(encode(next), Ordering::Release);
        info!(daemon = %self.name, from = %current, to = %next, "daemon status changed");
        Ok(true)
    }

    /// Record a failure without altering status.
    pub async fn fail(&self, summary: impl fmt::Display) -> Result<(), DaemonError> {
        let summary = summary.to_string();
        warn!(daemon = %self.name, error = %summary, "daemon failure recorded");
        self.events
            .append(DaemonEvent::FailureOccurred { summary })
            .await?;
        Ok(())
    }

    /// Complete once the daemon has journaled a transition into `target`.
    /// Completes without suspension when the transition already happened.
    pub async fn wait_for(
        &self,
        target: DaemonStatus,
        cancel: &CancellationToken,
    ) -> Result<(), DaemonError> {
        self.events
            .wait_for(0, |event| is_transition_into(event, target), cancel)
            .await?;
        Ok(())
    }

    /// [`ContractDaemon::wait_for`] with a deadline.
    pub async fn wait_for_within(
        &self,
        target: DaemonStatus,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), DaemonError> {
        self.events
            .wait_for_within(0, |event| is_transition_into(event, target), deadline, cancel)
            .await?;
        Ok(())
    }

    /// Complete with the summary of the first recorded failure.
    pub async fn wait_for_failure(
        &self,
        cancel: &CancellationToken,
    ) -> Result<String, DaemonError> {
        let (_, failure) = self.events.wait_for_variant::<Failure>(0, cancel).await?;
        Ok(failure.0)
    }
}

fn is_transition_into(event: &DaemonEvent, target: DaemonStatus) -> bool {
    matches!(event, DaemonEvent::StatusChanged { status } if *status == target)
}
