use std::marker::PhantomData;

use coven_types::{Entry, JournalRecord, Position};
use tokio_util::sync::CancellationToken;

use crate::error::JournalError;
use crate::scrivener::Scrivener;

/// Per-consumer forward cursor over a journal.
///
/// Yields every record strictly after the anchor position, in position
/// order, then blocks waiting for appends. The sequence is infinite and
/// ends only through the cancellation token.
pub struct Tail<'a, T: Entry, S: Scrivener<T> + ?Sized> {
    journal: &'a S,
    cursor: Position,
    cancel: CancellationToken,
    _entry: PhantomData<fn() -> T>,
}

impl<'a, T: Entry, S: Scrivener<T> + ?Sized> Tail<'a, T, S> {
    pub(crate) fn new(journal: &'a S, after: Position, cancel: CancellationToken) -> Self {
        Self {
            journal,
            cursor: after,
            cancel,
            _entry: PhantomData,
        }
    }

    /// Position of the last yielded record; the anchor before any yield.
    pub fn position(&self) -> Position {
        self.cursor
    }

    /// The next record in position order. Blocks waiting for an append;
    /// an undecodable record blocks here at its position rather than
    /// being skipped.
    pub async fn next(&mut self) -> Result<JournalRecord<T>, JournalError> {
        let record = self.journal.next_after(self.cursor, &self.cancel).await?;
        debug_assert_eq!(
            record.position,
            self.cursor + 1,
            "journal yielded a non-contiguous position"
        );
        self.cursor = record.position;
        Ok(record)
    }
}

/// Finite descending cursor over records strictly before the anchor.
pub struct Backward<'a, T: Entry, S: Scrivener<T> + ?Sized> {
    journal: &'a S,
    cursor: Position,
    skip_unreadable: bool,
    done: bool,
    _entry: PhantomData<fn() -> T>,
}

impl<'a, T: Entry, S: Scrivener<T> + ?Sized> Backward<'a, T, S> {
    pub(crate) fn new(journal: &'a S, before: Position) -> Self {
        Self {
            journal,
            cursor: before,
            skip_unreadable: false,
            done: false,
            _entry: PhantomData,
        }
    }

    /// Pass over undecodable records instead of failing. Only backward
    /// scans may skip; forward progress never does.
    pub fn skipping_unreadable(mut self) -> Self {
        self.skip_unreadable = true;
        self
    }

    /// The next record in descending position order, or `None` once the
    /// first record of the journal has been yielded.
    pub async fn next(&mut self) -> Result<Option<JournalRecord<T>>, JournalError> {
        if self.done {
            return Ok(None);
        }
        let record = self
            .journal
            .prev_before(self.cursor, self.skip_unreadable)
            .await?;
        match &record {
            Some(record) => self.cursor = record.position,
            None => self.done = true,
        }
        Ok(record)
    }
}
