//! Entity kinds: the (key, state, payload) triple each reducer works over.

use crate::domain::{Address, LogEvent, Snapshot};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::hash::Hash;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid entity key {raw:?}: {reason}")]
pub struct KeyParseError {
    pub raw: String,
    pub reason: String,
}

impl KeyParseError {
    pub fn new(raw: &str, reason: impl Into<String>) -> Self {
        Self {
            raw: raw.to_string(),
            reason: reason.into(),
        }
    }
}

/// Identifier of one reduction target.
///
/// Keys are totally ordered for scanning; the string form must sort the same
/// way, since stores scan and resume by it.
pub trait EntityKey:
    Clone + Eq + Ord + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    fn to_key_string(&self) -> String;

    fn parse_key(raw: &str) -> Result<Self, KeyParseError>;

    /// Owning account, when the key has one. Used by the ignore-list.
    fn owner(&self) -> Option<&Address> {
        None
    }
}

pub trait EntityKind: Send + Sync + 'static {
    /// Snapshot namespace.
    const KIND: &'static str;
    /// Event namespace. Kinds that fold the same log share a stream.
    const STREAM: &'static str = Self::KIND;

    type Key: EntityKey;
    type Data: Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;
    type Payload: Clone
        + fmt::Debug
        + PartialEq
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;
}

pub type EventOf<E> = LogEvent<<E as EntityKind>::Key, <E as EntityKind>::Payload>;
pub type SnapshotOf<E> = Snapshot<<E as EntityKind>::Key, <E as EntityKind>::Data>;
