use std::time::Duration;

use async_trait::async_trait;
use coven_types::{Entry, FromEntry, JournalId, JournalRecord, Position};
use tokio_util::sync::CancellationToken;

use crate::cursor::{Backward, Tail};
use crate::error::JournalError;

/// A typed, single-stream, append-only journal.
///
/// The trait carries the minimal primitive operations; everything else
/// (tails, backward scans, predicate waits) derives from them in
/// [`ScrivenerExt`]. Implementations guarantee:
/// - `append` assigns strictly increasing, contiguous positions starting
///   at 1, and an append is visible to every already-suspended wait.
/// - `next_after` never skips a position: the yielded record is always at
///   exactly `after + 1`, and an undecodable record there blocks progress
///   rather than being passed over.
#[async_trait]
pub trait Scrivener<T: Entry>: Send + Sync {
    /// Journal identity, used to key reader checkpoints.
    fn id(&self) -> JournalId;

    /// Most recently assigned position; 0 when the journal is empty.
    fn head(&self) -> Position;

    /// Append an entry, returning its assigned position. Completes once
    /// the record is durably enqueued for readers.
    async fn append(&self, entry: T) -> Result<Position, JournalError>;

    /// The record strictly after `after`, waiting for an append when none
    /// exists yet. `after` must be ≥ 0.
    async fn next_after(
        &self,
        after: Position,
        cancel: &CancellationToken,
    ) -> Result<JournalRecord<T>, JournalError>;

    /// The record with the greatest position strictly before `before`, or
    /// `None` at the start of the journal. `before` must be > 0. With
    /// `skip_unreadable` set, undecodable records are passed over instead
    /// of surfacing [`JournalError::Unreadable`].
    async fn prev_before(
        &self,
        before: Position,
        skip_unreadable: bool,
    ) -> Result<Option<JournalRecord<T>>, JournalError>;

    /// Release the journal. Subsequent operations and in-flight waits
    /// fail with [`JournalError::Disposed`].
    fn dispose(&self);
}

/// Derived journal operations, available on every [`Scrivener`].
#[async_trait]
pub trait ScrivenerExt<T: Entry>: Scrivener<T> {
    /// Infinite forward cursor over records strictly after `after`, in
    /// position order. Blocks waiting for appends; ends only through the
    /// cancellation token.
    fn tail(&self, after: Position, cancel: CancellationToken) -> Tail<'_, T, Self> {
        Tail::new(self, after, cancel)
    }

    /// Finite cursor over records strictly before `before`, in descending
    /// position order.
    fn read_backward(&self, before: Position) -> Backward<'_, T, Self> {
        Backward::new(self, before)
    }

    /// The first record strictly after `after` whose entry satisfies the
    /// predicate. Completes without suspension when a matching record
    /// already exists.
    async fn wait_for<F>(
        &self,
        after: Position,
        predicate: F,
        cancel: &CancellationToken,
    ) -> Result<(Position, T), JournalError>
    where
        F: Fn(&T) -> bool + Send + Sync,
    {
        if after == Position::MAX {
            return Err(JournalError::OutOfRange(after));
        }
        let mut cursor = after;
        loop {
            let record = self.next_after(cursor, cancel).await?;
            cursor = record.position;
            if predicate(&record.entry) {
                return Ok((record.position, record.entry));
            }
        }
    }

    /// Variant specialisation of [`ScrivenerExt::wait_for`]: completes
    /// with the first record after `after` carrying variant `V`.
    async fn wait_for_variant<V>(
        &self,
        after: Position,
        cancel: &CancellationToken,
    ) -> Result<(Position, V), JournalError>
    where
        V: FromEntry<T>,
    {
        if after == Position::MAX {
            return Err(JournalError::OutOfRange(after));
        }
        let mut cursor = after;
        loop {
            let record = self.next_after(cursor, cancel).await?;
            cursor = record.position;
            if let Some(variant) = V::from_entry(&record.entry) {
                return Ok((record.position, variant));
            }
        }
    }

    /// [`ScrivenerExt::wait_for`] with a deadline. Expiry yields
    /// [`JournalError::Timeout`], distinct from cancellation.
    async fn wait_for_within<F>(
        &self,
        after: Position,
        predicate: F,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<(Position, T), JournalError>
    where
        F: Fn(&T) -> bool + Send + Sync,
    {
        match tokio::time::timeout(deadline, self.wait_for(after, predicate, cancel)).await {
            Ok(result) => result,
            Err(_) => Err(JournalError::Timeout),
        }
    }
}

impl<T: Entry, S: Scrivener<T> + ?Sized> ScrivenerExt<T> for S {}
