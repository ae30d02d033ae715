//! Collaborator interfaces for snapshots and event history.
//!
//! `Repository` implements these over SQLite; `MemoryStore` keeps everything
//! in process for tests and embedding callers.

use crate::domain::{
    Address, EntityKey, EntityKind, EventOf, KeyParseError, LogStatus, Mark, OrderKey, SnapshotOf,
};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use thiserror::Error;

pub mod memory;

pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Key(#[from] KeyParseError),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(sqlx::Error::RowNotFound) => false,
            StoreError::Database(_) => true,
            StoreError::Serde(_) | StoreError::Key(_) | StoreError::Corrupt(_) => false,
        }
    }
}

/// What recording a delivered event did to the stored history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted,
    /// Same log, same status: a redelivery.
    Duplicate,
    /// Same log, new status. The stored record now carries the new one.
    StatusChanged { previous: LogStatus },
}

/// Position in the `(key, order)` ordered event stream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventPosition {
    pub key: String,
    pub order: OrderKey,
}

impl EventPosition {
    pub fn of<E: EntityKind>(event: &EventOf<E>) -> Self {
        Self {
            key: event.key.to_key_string(),
            order: event.order,
        }
    }

    /// `key@order`, resumable through `from_cursor`.
    pub fn to_cursor(&self) -> String {
        format!("{}@{}", self.key, self.order.to_cursor())
    }

    pub fn from_cursor(raw: &str) -> Option<Self> {
        let (key, order) = raw.rsplit_once('@')?;
        Some(Self {
            key: key.to_string(),
            order: OrderKey::from_cursor(order)?,
        })
    }
}

/// Which events to read. Streams are ordered by key string, then order key.
#[derive(Debug, Clone)]
pub struct EventFilter<K> {
    pub key: Option<K>,
    pub key_prefix: Option<String>,
    /// Only events in blocks strictly after this mark.
    pub after_mark: Option<Mark>,
    pub status: Option<LogStatus>,
    pub owner: Option<Address>,
}

impl<K> Default for EventFilter<K> {
    fn default() -> Self {
        Self {
            key: None,
            key_prefix: None,
            after_mark: None,
            status: None,
            owner: None,
        }
    }
}

impl<K: EntityKey> EventFilter<K> {
    pub fn for_key(key: K) -> Self {
        Self {
            key: Some(key),
            ..Self::default()
        }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    pub fn after(mut self, mark: Mark) -> Self {
        self.after_mark = Some(mark);
        self
    }

    pub fn with_status(mut self, status: LogStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn owned_by(mut self, owner: Address) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn matches_owner(&self, key: &K) -> bool {
        self.owner
            .as_ref()
            .map_or(true, |owner| key.owner() == Some(owner))
    }

    pub fn matches(&self, key: &str, order: &OrderKey, status: LogStatus) -> bool {
        if let Some(expected) = &self.key {
            if expected.to_key_string() != key {
                return false;
            }
        }
        if let Some(prefix) = &self.key_prefix {
            if !key.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(mark) = self.after_mark {
            if order.block_number <= mark.as_i64() {
                return false;
            }
        }
        self.status.map_or(true, |s| s == status)
    }
}

#[async_trait]
pub trait SnapshotStore<E: EntityKind>: Send + Sync {
    async fn get(&self, key: &E::Key) -> Result<Option<SnapshotOf<E>>, StoreError>;

    /// Last writer wins; there is no store-side merge.
    async fn put(&self, snapshot: &SnapshotOf<E>) -> Result<(), StoreError>;

    async fn delete(&self, key: &E::Key) -> Result<bool, StoreError>;

    async fn delete_by_owner(&self, owner: &Address) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait EventSource<E: EntityKind>: Send + Sync {
    /// Up to `limit` events matching `filter`, strictly after `after`.
    async fn fetch_batch(
        &self,
        filter: &EventFilter<E::Key>,
        after: Option<&EventPosition>,
        limit: usize,
    ) -> Result<Vec<EventOf<E>>, StoreError>;

    /// Distinct key strings with at least one matching event, strictly after
    /// `after_key`.
    async fn fetch_keys(
        &self,
        filter: &EventFilter<E::Key>,
        after_key: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError>;
}

#[async_trait]
pub trait EventLog<E: EntityKind>: Send + Sync {
    /// Store one delivered event. The stored record always ends up carrying
    /// the delivered status.
    async fn record(&self, event: &EventOf<E>) -> Result<RecordOutcome, StoreError>;

    async fn record_all(&self, events: &[EventOf<E>]) -> Result<Vec<RecordOutcome>, StoreError> {
        let mut outcomes = Vec::with_capacity(events.len());
        for event in events {
            outcomes.push(self.record(event).await?);
        }
        Ok(outcomes)
    }

    /// Other records of the same log in the same block, differing only in
    /// their minor index.
    async fn find_possible_duplicates(
        &self,
        event: &EventOf<E>,
    ) -> Result<Vec<EventOf<E>>, StoreError>;

    async fn delete_events(&self, key: &E::Key, orders: &[OrderKey]) -> Result<u64, StoreError>;

    async fn delete_events_by_owner(&self, owner: &Address) -> Result<u64, StoreError>;
}

/// Ordered, resumable stream over an event source, read in batches.
pub fn stream_events<'a, E, S>(
    source: &'a S,
    filter: EventFilter<E::Key>,
    after: Option<EventPosition>,
    batch_size: usize,
) -> BoxStream<'a, Result<EventOf<E>, StoreError>>
where
    E: EntityKind,
    S: EventSource<E> + ?Sized,
{
    let batch_size = batch_size.max(1);
    stream::unfold(Some(after), move |state| {
        let filter = filter.clone();
        async move {
            let after = state?;
            match source.fetch_batch(&filter, after.as_ref(), batch_size).await {
                Ok(batch) if batch.is_empty() => None,
                Ok(batch) => {
                    let next = if batch.len() < batch_size {
                        None
                    } else {
                        batch.last().map(|event| Some(EventPosition::of::<E>(event)))
                    };
                    let items: Vec<Result<EventOf<E>, StoreError>> =
                        batch.into_iter().map(Ok).collect();
                    Some((stream::iter(items), next))
                }
                Err(err) => Some((stream::iter(vec![Err(err)]), None)),
            }
        }
    })
    .flatten()
    .boxed()
}
