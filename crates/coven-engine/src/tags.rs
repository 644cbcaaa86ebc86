//! Ambient tag scope for routing.
//!
//! Tags are runtime facts a block adds while it executes; the router
//! scores candidate blocks by how many active tags their declared
//! capabilities match. The set is shared across the whole ritual run and
//! installed as a task-local binding around each block invocation, so tag
//! additions persist for subsequent hops until cleared.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

pub(crate) type TagSet = Arc<Mutex<BTreeSet<String>>>;

tokio::task_local! {
    pub(crate) static ACTIVE_TAGS: TagSet;
}

/// Add a tag, visible to routing for subsequent hops.
///
/// Panics outside a running block body: the tag scope is ambient state
/// the router installs around each invocation.
pub fn add(tag: impl Into<String>) {
    with(|tags| {
        tags.insert(tag.into());
    });
}

/// Remove every active tag.
pub fn clear() {
    with(|tags| tags.clear());
}

/// Whether a tag is currently active.
pub fn contains(tag: &str) -> bool {
    with(|tags| tags.contains(tag))
}

/// Snapshot of the active tags, sorted.
pub fn snapshot() -> Vec<String> {
    with(|tags| tags.iter().cloned().collect())
}

fn with<R>(access: impl FnOnce(&mut BTreeSet<String>) -> R) -> R {
    match ACTIVE_TAGS.try_with(|tags| access(&mut tags.lock())) {
        Ok(result) => result,
        Err(_) => panic!("tag scope accessed outside a running block body"),
    }
}
