use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a journal, used to key reader checkpoints.
///
/// Display: first 8 hex characters of the underlying uuid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JournalId(Uuid);

impl JournalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JournalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JournalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.0.simple().to_string();
        write!(f, "{}", &hex[..8])
    }
}
