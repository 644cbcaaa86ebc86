use coven_types::Position;

/// Errors produced by journal operations.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// The cursor references a record that cannot exist (negative forward
    /// position, non-positive backward position, or a wait anchored at
    /// the maximum position).
    #[error("position {0} is out of range")]
    OutOfRange(Position),

    /// A record cannot be reconstructed as the journal's entry type.
    /// Forward progress blocks at this position; backward scans may pass
    /// over it only on explicit request.
    #[error("record at position {position} cannot be decoded: {reason}")]
    Unreadable { position: Position, reason: String },

    /// An entry could not be encoded for storage.
    #[error("record cannot be encoded: {reason}")]
    Unwritable { reason: String },

    /// The journal has been disposed.
    #[error("journal is disposed")]
    Disposed,

    /// A wait deadline expired. Distinct from cancellation.
    #[error("wait deadline expired")]
    Timeout,

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
