pub mod covenant;
pub mod daemon;
pub mod entry;
pub mod error;
pub mod id;
pub mod record;

pub use covenant::{CovenantEntry, CovenantSink, CovenantSource};
pub use daemon::{DaemonEvent, DaemonStatus};
pub use entry::{Entry, FromEntry};
pub use error::DomainError;
pub use id::JournalId;
pub use record::{JournalRecord, Position};
