use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Monotonic journal position.
///
/// Assigned by the scrivener at append time, starting at 1 and contiguous
/// within a journal. 0 is the cursor value meaning "before everything".
pub type Position = i64;

/// A single record in a journal's append-only log.
///
/// Timestamp is wall-clock for debugging only — NOT used for ordering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord<T> {
    pub position: Position,
    pub timestamp: DateTime<Utc>,
    pub entry: T,
}

impl<T> JournalRecord<T> {
    /// Stamp a freshly appended entry with its assigned position.
    pub fn new(position: Position, entry: T) -> Self {
        Self {
            position,
            timestamp: Utc::now(),
            entry,
        }
    }
}
