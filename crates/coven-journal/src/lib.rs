//! Typed append-only journals with monotonic positions, blocking tails,
//! backward scans and predicate-anchored waits.
//!
//! A [`Scrivener`] is the universal coordination primitive: producers
//! append, every consumer observes every record once in position order
//! through its own cursor, and waits are race-free with respect to
//! appends. Two implementations ship here:
//! - [`MemoryScrivener`]: records held in memory, never unreadable.
//! - [`FileScrivener`]: one JSON record per position-named file; a record
//!   that fails to decode blocks forward progress at its position.

pub mod checkpoint;
pub mod cursor;
pub mod error;
pub mod fs;
pub mod memory;
pub mod scrivener;

pub use checkpoint::{CheckpointStore, MemoryCheckpoints};
pub use cursor::{Backward, Tail};
pub use error::JournalError;
pub use fs::FileScrivener;
pub use memory::MemoryScrivener;
pub use scrivener::{Scrivener, ScrivenerExt};
