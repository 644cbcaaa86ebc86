use std::collections::HashMap;

use async_trait::async_trait;
use coven_types::{JournalId, Position};
use parking_lot::Mutex;

/// Durable cursor positions, keyed by `(reader, journal)`.
///
/// Consumers commit only after processing a record; a crash between
/// observation and commit therefore re-delivers the record on restart
/// (at-least-once). Idempotence is the consumer's responsibility.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Last committed position for the reader on this journal, if any.
    async fn load(&self, reader: &str, journal: JournalId) -> Option<Position>;

    /// Record that every position up to and including `position` has been
    /// processed by the reader.
    async fn commit(&self, reader: &str, journal: JournalId, position: Position);
}

/// In-memory checkpoint store.
#[derive(Debug, Default)]
pub struct MemoryCheckpoints {
    positions: Mutex<HashMap<(String, JournalId), Position>>,
}

impl MemoryCheckpoints {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpoints {
    async fn load(&self, reader: &str, journal: JournalId) -> Option<Position> {
        self.positions
            .lock()
            .get(&(reader.to_string(), journal))
            .copied()
    }

    async fn commit(&self, reader: &str, journal: JournalId, position: Position) {
        self.positions
            .lock()
            .insert((reader.to_string(), journal), position);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test(tokio::test)]
    async fn commits_are_keyed_by_reader_and_journal() {
        let store = MemoryCheckpoints::new();
        let left = JournalId::new();
        let right = JournalId::new();

        store.commit("window", left, 7).await;
        store.commit("window", right, 2).await;

        assert_eq!(store.load("window", left).await, Some(7));
        assert_eq!(store.load("window", right).await, Some(2));
        assert_eq!(store.load("other", left).await, None);
    }

    #[test_log::test(tokio::test)]
    async fn recommit_advances_the_bookmark() {
        let store = MemoryCheckpoints::new();
        let journal = JournalId::new();

        store.commit("r", journal, 1).await;
        store.commit("r", journal, 5).await;

        assert_eq!(store.load("r", journal).await, Some(5));
    }
}
