use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use coven_journal::{CheckpointStore, JournalError, MemoryCheckpoints, Scrivener};
use coven_types::{DaemonStatus, Entry, FromEntry};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::daemon::{ContractDaemon, Daemon};
use crate::error::{BoxError, DaemonError};
use crate::transmute::BatchTransmuter;

/// Read-only view of the accumulated draft window, as seen by policies.
///
/// The pending buffer is retained in full until emission, so any
/// lookback requirement is satisfied structurally.
pub struct WindowView<'a, C> {
    chunks: &'a [C],
    started_at: Option<DateTime<Utc>>,
    last_emit_at: Option<DateTime<Utc>>,
}

impl<'a, C> WindowView<'a, C> {
    /// Pending chunks, oldest first.
    pub fn chunks(&self) -> &[C] {
        self.chunks
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// When the first pending chunk was observed. Policy input only.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// When the previous emission happened. Policy input only.
    pub fn last_emit_at(&self) -> Option<DateTime<Utc>> {
        self.last_emit_at
    }
}

/// Decides whether the pending window should be emitted.
pub trait WindowPolicy<C>: Send + Sync {
    fn should_emit(&self, window: &WindowView<'_, C>) -> bool;

    /// Minimum number of most-recent chunks this policy needs to see.
    /// The view always carries the full pending buffer, so this is a
    /// self-description rather than a negotiation.
    fn min_chunk_lookback(&self) -> usize {
        0
    }
}

/// Splits one emitted output into several entries, appended in order.
pub trait ShatterPolicy<O>: Send + Sync {
    fn shatter(&self, output: O) -> Vec<O>;
}

struct WindowState<C> {
    pending: Vec<C>,
    started_at: Option<DateTime<Utc>>,
    last_emit_at: Option<DateTime<Utc>>,
}

impl<C> WindowState<C> {
    fn new() -> Self {
        Self {
            pending: Vec::new(),
            started_at: None,
            last_emit_at: None,
        }
    }

    fn view(&self) -> WindowView<'_, C> {
        WindowView {
            chunks: &self.pending,
            started_at: self.started_at,
            last_emit_at: self.last_emit_at,
        }
    }

    fn clear(&mut self) {
        self.pending.clear();
        self.started_at = None;
    }
}

#[derive(Default)]
struct PumpHandle {
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

/// Streaming windowing daemon.
///
/// Tails draft chunks of variant `C` from a journal of `T`, accumulates
/// them through a [`WindowPolicy`], batch-transmutes on fire, optionally
/// shatters, and appends the fixed outputs `O` back onto the same
/// journal. A terminal marker `E` forces a final emission of a non-empty
/// window, even while the scope is cancelling cooperatively.
///
/// The checkpoint commits only after an emission: a restart re-observes
/// the drafts since the previous emission and rebuilds the pending
/// buffer, so batch transmutation must be deterministic on the same
/// input. Cancellation between chunks preserves the buffer. Any policy,
/// batcher or append failure is recorded through `fail` with the buffer
/// intact, and the tail loop terminates.
pub struct WindowDaemon<T, C, E, O>
where
    T: Entry,
    C: FromEntry<T> + Clone + Sync,
    E: FromEntry<T>,
    O: Into<T> + Send + 'static,
{
    contract: Arc<ContractDaemon>,
    journal: Arc<dyn Scrivener<T>>,
    policy: Arc<dyn WindowPolicy<C>>,
    batcher: Arc<dyn BatchTransmuter<C, O>>,
    shatter: Option<Arc<dyn ShatterPolicy<O>>>,
    checkpoints: Arc<dyn CheckpointStore>,
    pump: Mutex<PumpHandle>,
    _terminal: PhantomData<fn() -> E>,
}

impl<T, C, E, O> WindowDaemon<T, C, E, O>
where
    T: Entry,
    C: FromEntry<T> + Clone + Sync,
    E: FromEntry<T>,
    O: Into<T> + Send + 'static,
{
    pub fn new(
        name: impl Into<String>,
        journal: Arc<dyn Scrivener<T>>,
        policy: impl WindowPolicy<C> + 'static,
        batcher: impl BatchTransmuter<C, O> + 'static,
    ) -> Self {
        Self {
            contract: Arc::new(ContractDaemon::new(name)),
            journal,
            policy: Arc::new(policy),
            batcher: Arc::new(batcher),
            shatter: None,
            checkpoints: Arc::new(MemoryCheckpoints::new()),
            pump: Mutex::new(PumpHandle::default()),
            _terminal: PhantomData,
        }
    }

    pub fn with_shatter(mut self, shatter: impl ShatterPolicy<O> + 'static) -> Self {
        self.shatter = Some(Arc::new(shatter));
        self
    }

    /// Share a checkpoint store so a restarted daemon resumes from its
    /// last committed position. The reader key is the daemon name.
    pub fn with_checkpoints(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = checkpoints;
        self
    }
}

#[async_trait::async_trait]
impl<T, C, E, O> Daemon for WindowDaemon<T, C, E, O>
where
    T: Entry,
    C: FromEntry<T> + Clone + Sync,
    E: FromEntry<T>,
    O: Into<T> + Send + 'static,
{
    fn contract(&self) -> &ContractDaemon {
        &self.contract
    }

    async fn start(&self, cancel: &CancellationToken) -> Result<(), DaemonError> {
        if !self.contract.transition(DaemonStatus::Running).await? {
            return Ok(());
        }
        let pump = WindowPump {
            contract: self.contract.clone(),
            journal: self.journal.clone(),
            policy: self.policy.clone(),
            batcher: self.batcher.clone(),
            shatter: self.shatter.clone(),
            checkpoints: self.checkpoints.clone(),
            _terminal: PhantomData::<fn() -> E>,
        };
        let pump_cancel = cancel.child_token();
        let task = tokio::spawn(pump.run(pump_cancel.clone()));
        *self.pump.lock() = PumpHandle {
            cancel: Some(pump_cancel),
            task: Some(task),
        };
        Ok(())
    }

    async fn shutdown(&self, _cancel: &CancellationToken) -> Result<(), DaemonError> {
        let (pump_cancel, task) = {
            let mut pump = self.pump.lock();
            (pump.cancel.take(), pump.task.take())
        };
        if let Some(pump_cancel) = pump_cancel {
            pump_cancel.cancel();
        }
        if let Some(task) = task {
            let _ = task.await;
        }
        self.contract.transition(DaemonStatus::Completed).await?;
        Ok(())
    }
}

struct WindowPump<T, C, E, O>
where
    T: Entry,
    C: FromEntry<T> + Clone + Sync,
    E: FromEntry<T>,
    O: Into<T> + Send + 'static,
{
    contract: Arc<ContractDaemon>,
    journal: Arc<dyn Scrivener<T>>,
    policy: Arc<dyn WindowPolicy<C>>,
    batcher: Arc<dyn BatchTransmuter<C, O>>,
    shatter: Option<Arc<dyn ShatterPolicy<O>>>,
    checkpoints: Arc<dyn CheckpointStore>,
    _terminal: PhantomData<fn() -> E>,
}

impl<T, C, E, O> WindowPump<T, C, E, O>
where
    T: Entry,
    C: FromEntry<T> + Clone + Sync,
    E: FromEntry<T>,
    O: Into<T> + Send + 'static,
{
    async fn run(self, cancel: CancellationToken) {
        if let Err(error) = self.pump(&cancel).await {
            if let Err(record_error) = self.contract.fail(&error).await {
                warn!(
                    daemon = %self.contract.name(),
                    error = %record_error,
                    "failed to record windowing failure"
                );
            }
        }
    }

    async fn pump(&self, cancel: &CancellationToken) -> Result<(), BoxError> {
        let reader = self.contract.name();
        let journal_id = self.journal.id();
        let mut cursor = self
            .checkpoints
            .load(reader, journal_id)
            .await
            .unwrap_or(0);
        let mut state = WindowState::<C>::new();

        loop {
            let record = match self.journal.next_after(cursor, cancel).await {
                Ok(record) => record,
                // Cancellation between chunks preserves the buffer.
                Err(JournalError::Cancelled) => return Ok(()),
                Err(error) => return Err(error.into()),
            };
            cursor = record.position;

            if let Some(chunk) = C::from_entry(&record.entry) {
                if state.pending.is_empty() {
                    state.started_at = Some(Utc::now());
                }
                state.pending.push(chunk);
                if self.policy.should_emit(&state.view()) {
                    self.emit(&mut state, cancel).await?;
                    self.checkpoints.commit(reader, journal_id, cursor).await;
                }
            } else if E::from_entry(&record.entry).is_some() {
                // Forced final emission; runs even while cancelling.
                if !state.pending.is_empty() {
                    self.emit(&mut state, cancel).await?;
                }
                state.clear();
                self.checkpoints.commit(reader, journal_id, cursor).await;
            }
            // Fixed entries — including this daemon's own outputs coming
            // back on the tail — are ignored.
        }
    }

    async fn emit(
        &self,
        state: &mut WindowState<C>,
        cancel: &CancellationToken,
    ) -> Result<(), BoxError> {
        // The buffer is cloned, not drained: a failing batcher must leave
        // the pending chunks intact.
        let chunks = state.pending.clone();
        debug!(
            daemon = %self.contract.name(),
            chunks = chunks.len(),
            "emitting window"
        );
        let batch = self.batcher.transmute(chunks, cancel).await?;

        let outputs = match &self.shatter {
            Some(shatter) => shatter.shatter(batch.output),
            None => vec![batch.output],
        };
        for output in outputs {
            let entry: T = output.into();
            if entry.is_draft() {
                return Err(format!(
                    "windowing emitted draft entry '{}'; outputs must be fixed",
                    entry.tag()
                )
                .into());
            }
            self.journal.append(entry).await?;
        }

        state.clear();
        if let Some(remainder) = batch.remainder {
            state.started_at = Some(Utc::now());
            state.pending.push(remainder);
        }
        state.last_emit_at = Some(Utc::now());
        Ok(())
    }
}
