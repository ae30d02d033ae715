//! Reduction services: full replay and the online chain update path.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::domain::{Address, EntityKey, EntityKind, KeyParseError, SnapshotOf};
use crate::engine::ReduceError;
use crate::store::StoreError;
use thiserror::Error;

pub mod chain;
pub mod full;
pub mod locks;

pub use chain::{ChainUpdateService, Recorded, StreamFollower, UpdateSummary};
pub use full::FullReduceService;
pub use locks::{KeyGuard, KeyLocks};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Reduce(#[from] ReduceError),

    #[error(transparent)]
    Key(#[from] KeyParseError),

    #[error("key {0} is already being reduced")]
    Busy(String),
}

impl ServiceError {
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Store(err) => err.is_transient(),
            ServiceError::Reduce(_) | ServiceError::Key(_) | ServiceError::Busy(_) => false,
        }
    }
}

/// Which path incoming events take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReduceEngine {
    /// Apply new events to the stored snapshot; replay only when needed.
    #[default]
    Chain,
    /// Always replay the full history of every touched key.
    Full,
}

impl FromStr for ReduceEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chain" => Ok(ReduceEngine::Chain),
            "full" => Ok(ReduceEngine::Full),
            other => Err(format!("unknown reduce engine: {}", other)),
        }
    }
}

impl fmt::Display for ReduceEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReduceEngine::Chain => f.write_str("chain"),
            ReduceEngine::Full => f.write_str("full"),
        }
    }
}

/// Owners whose entities are never materialized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoredOwners(HashSet<Address>);

impl IgnoredOwners {
    pub fn new(owners: impl IntoIterator<Item = Address>) -> Self {
        Self(owners.into_iter().collect())
    }

    pub fn contains(&self, owner: &Address) -> bool {
        self.0.contains(owner)
    }

    pub fn covers<K: EntityKey>(&self, key: &K) -> bool {
        key.owner().is_some_and(|owner| self.contains(owner))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Progress of a scoped full reduce: the last key fully reduced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReduceState {
    pub last_key: Option<String>,
}

impl ReduceState {
    pub fn from_cursor(cursor: Option<&str>) -> Self {
        Self {
            last_key: cursor.filter(|c| !c.is_empty()).map(str::to_string),
        }
    }

    pub fn to_cursor(&self) -> String {
        self.last_key.clone().unwrap_or_default()
    }
}

/// Observer of every snapshot written by a reduction service.
pub trait UpdateListener<E: EntityKind>: Send + Sync {
    fn on_snapshot(&self, snapshot: &SnapshotOf<E>);
}
