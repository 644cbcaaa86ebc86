use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use coven_types::{Entry, JournalId, JournalRecord, Position};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::JournalError;
use crate::scrivener::Scrivener;

/// In-memory [`Scrivener`]: records held in a vector, the head published
/// on a watch channel.
///
/// The producer-side critical section covers position assignment, the
/// push, and the head publication, so heads are observed in append order.
/// Waiters subscribe to the watch channel before re-checking state, which
/// closes the race between an append completing and a suspended wait
/// observing it. Records here are never unreadable.
pub struct MemoryScrivener<T: Entry> {
    id: JournalId,
    records: Mutex<Vec<JournalRecord<T>>>,
    head_tx: watch::Sender<Position>,
    disposed: AtomicBool,
}

impl<T: Entry> MemoryScrivener<T> {
    pub fn new() -> Self {
        let (head_tx, _) = watch::channel(0);
        Self {
            id: JournalId::new(),
            records: Mutex::new(Vec::new()),
            head_tx,
            disposed: AtomicBool::new(false),
        }
    }

    fn check_live(&self) -> Result<(), JournalError> {
        if self.disposed.load(Ordering::Acquire) {
            Err(JournalError::Disposed)
        } else {
            Ok(())
        }
    }
}

impl<T: Entry> Default for MemoryScrivener<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Entry> Scrivener<T> for MemoryScrivener<T> {
    fn id(&self) -> JournalId {
        self.id
    }

    fn head(&self) -> Position {
        *self.head_tx.borrow()
    }

    async fn append(&self, entry: T) -> Result<Position, JournalError> {
        self.check_live()?;
        let mut records = self.records.lock();
        let position = records.len() as Position + 1;
        records.push(JournalRecord::new(position, entry));
        // Publish inside the critical section: heads must be observed in
        // append order.
        self.head_tx.send_replace(position);
        Ok(position)
    }

    async fn next_after(
        &self,
        after: Position,
        cancel: &CancellationToken,
    ) -> Result<JournalRecord<T>, JournalError> {
        if after < 0 {
            return Err(JournalError::OutOfRange(after));
        }
        let mut head_rx = self.head_tx.subscribe();
        loop {
            self.check_live()?;
            {
                let records = self.records.lock();
                if let Some(record) = records.get(after as usize) {
                    return Ok(record.clone());
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(JournalError::Cancelled),
                changed = head_rx.changed() => {
                    if changed.is_err() {
                        return Err(JournalError::Disposed);
                    }
                }
            }
        }
    }

    async fn prev_before(
        &self,
        before: Position,
        _skip_unreadable: bool,
    ) -> Result<Option<JournalRecord<T>>, JournalError> {
        self.check_live()?;
        if before <= 0 {
            return Err(JournalError::OutOfRange(before));
        }
        let records = self.records.lock();
        let candidate = (before - 1).min(records.len() as Position);
        if candidate < 1 {
            return Ok(None);
        }
        Ok(Some(records[candidate as usize - 1].clone()))
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        // Bump the watch version so suspended waiters observe disposal.
        self.head_tx.send_modify(|_| {});
    }
}
