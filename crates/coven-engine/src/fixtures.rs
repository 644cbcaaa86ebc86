//! Chat-shaped journal fixture shared by engine tests.

use coven_types::{Entry, FromEntry};

/// Closed entry sum for a chat journal: afferent and efferent messages
/// are fixed; chunks, stream completion and acks are drafts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ChatEntry {
    Afferent(String),
    Efferent(String),
    Chunk(String),
    StreamCompleted,
    Ack,
}

impl Entry for ChatEntry {
    fn tag(&self) -> &'static str {
        match self {
            Self::Afferent(_) => "Afferent",
            Self::Efferent(_) => "Efferent",
            Self::Chunk(_) => "Chunk",
            Self::StreamCompleted => "StreamCompleted",
            Self::Ack => "Ack",
        }
    }

    fn is_draft(&self) -> bool {
        matches!(self, Self::Chunk(_) | Self::StreamCompleted | Self::Ack)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Chunk(pub String);

impl FromEntry<ChatEntry> for Chunk {
    fn from_entry(entry: &ChatEntry) -> Option<Self> {
        match entry {
            ChatEntry::Chunk(text) => Some(Self(text.clone())),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct StreamCompleted;

impl FromEntry<ChatEntry> for StreamCompleted {
    fn from_entry(entry: &ChatEntry) -> Option<Self> {
        match entry {
            ChatEntry::StreamCompleted => Some(Self),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Efferent(pub String);

impl FromEntry<ChatEntry> for Efferent {
    fn from_entry(entry: &ChatEntry) -> Option<Self> {
        match entry {
            ChatEntry::Efferent(text) => Some(Self(text.clone())),
            _ => None,
        }
    }
}

impl From<Efferent> for ChatEntry {
    fn from(efferent: Efferent) -> Self {
        Self::Efferent(efferent.0)
    }
}

/// An output that maps onto a draft variant — used to prove the
/// windowing output path refuses drafts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct AckOut;

impl From<AckOut> for ChatEntry {
    fn from(_: AckOut) -> Self {
        Self::Ack
    }
}
