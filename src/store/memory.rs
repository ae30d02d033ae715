use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    EventFilter, EventLog, EventPosition, EventSource, RecordOutcome, SnapshotStore, StoreError,
};
use crate::domain::{Address, EntityKey, EntityKind, EventOf, OrderKey, SnapshotOf};

/// In-process snapshots and event history for one entity kind.
pub struct MemoryStore<E: EntityKind> {
    snapshots: Mutex<BTreeMap<String, SnapshotOf<E>>>,
    events: Mutex<BTreeMap<(String, OrderKey), EventOf<E>>>,
}

impl<E: EntityKind> Default for MemoryStore<E> {
    fn default() -> Self {
        Self {
            snapshots: Mutex::new(BTreeMap::new()),
            events: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<E: EntityKind> MemoryStore<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.lock().map(|s| s.len()).unwrap_or_default()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or_default()
    }
}

fn poisoned() -> StoreError {
    StoreError::Corrupt("memory store lock poisoned".to_string())
}

fn owned_by<K: EntityKey>(key: &K, owner: &Address) -> bool {
    key.owner() == Some(owner)
}

#[async_trait]
impl<E: EntityKind> SnapshotStore<E> for MemoryStore<E> {
    async fn get(&self, key: &E::Key) -> Result<Option<SnapshotOf<E>>, StoreError> {
        let snapshots = self.snapshots.lock().map_err(|_| poisoned())?;
        Ok(snapshots.get(&key.to_key_string()).cloned())
    }

    async fn put(&self, snapshot: &SnapshotOf<E>) -> Result<(), StoreError> {
        let mut snapshots = self.snapshots.lock().map_err(|_| poisoned())?;
        snapshots.insert(snapshot.key.to_key_string(), snapshot.clone());
        Ok(())
    }

    async fn delete(&self, key: &E::Key) -> Result<bool, StoreError> {
        let mut snapshots = self.snapshots.lock().map_err(|_| poisoned())?;
        Ok(snapshots.remove(&key.to_key_string()).is_some())
    }

    async fn delete_by_owner(&self, owner: &Address) -> Result<u64, StoreError> {
        let mut snapshots = self.snapshots.lock().map_err(|_| poisoned())?;
        let before = snapshots.len();
        snapshots.retain(|_, s| !owned_by(&s.key, owner));
        Ok((before - snapshots.len()) as u64)
    }
}

#[async_trait]
impl<E: EntityKind> EventSource<E> for MemoryStore<E> {
    async fn fetch_batch(
        &self,
        filter: &EventFilter<E::Key>,
        after: Option<&EventPosition>,
        limit: usize,
    ) -> Result<Vec<EventOf<E>>, StoreError> {
        let events = self.events.lock().map_err(|_| poisoned())?;
        Ok(events
            .iter()
            .filter(|((key, order), _)| {
                after.map_or(true, |pos| (key, order) > (&pos.key, &pos.order))
            })
            .filter(|((key, order), event)| {
                filter.matches(key, order, event.status) && filter.matches_owner(&event.key)
            })
            .take(limit)
            .map(|(_, event)| event.clone())
            .collect())
    }

    async fn fetch_keys(
        &self,
        filter: &EventFilter<E::Key>,
        after_key: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let events = self.events.lock().map_err(|_| poisoned())?;
        let mut keys: Vec<String> = Vec::new();
        for ((key, order), event) in events.iter() {
            if keys.len() >= limit {
                break;
            }
            if after_key.is_some_and(|after| key.as_str() <= after) {
                continue;
            }
            if keys.last() == Some(key)
                || !filter.matches(key, order, event.status)
                || !filter.matches_owner(&event.key)
            {
                continue;
            }
            keys.push(key.clone());
        }
        Ok(keys)
    }
}

#[async_trait]
impl<E: EntityKind> EventLog<E> for MemoryStore<E> {
    async fn record(&self, event: &EventOf<E>) -> Result<RecordOutcome, StoreError> {
        let mut events = self.events.lock().map_err(|_| poisoned())?;
        let id = (event.key.to_key_string(), event.order);
        match events.get_mut(&id) {
            None => {
                events.insert(id, event.clone());
                Ok(RecordOutcome::Inserted)
            }
            Some(stored) if stored.status == event.status => Ok(RecordOutcome::Duplicate),
            Some(stored) => {
                let previous = stored.status;
                stored.status = event.status;
                Ok(RecordOutcome::StatusChanged { previous })
            }
        }
    }

    async fn find_possible_duplicates(
        &self,
        event: &EventOf<E>,
    ) -> Result<Vec<EventOf<E>>, StoreError> {
        let events = self.events.lock().map_err(|_| poisoned())?;
        let key = event.key.to_key_string();
        Ok(events
            .iter()
            .filter(|((k, order), other)| {
                *k == key
                    && order.block_number == event.order.block_number
                    && order.log_index == event.order.log_index
                    && order.minor_log_index != event.order.minor_log_index
                    && other.tx_hash == event.tx_hash
            })
            .map(|(_, other)| other.clone())
            .collect())
    }

    async fn delete_events(&self, key: &E::Key, orders: &[OrderKey]) -> Result<u64, StoreError> {
        let mut events = self.events.lock().map_err(|_| poisoned())?;
        let key = key.to_key_string();
        let removed = orders
            .iter()
            .filter(|order| events.remove(&(key.clone(), **order)).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn delete_events_by_owner(&self, owner: &Address) -> Result<u64, StoreError> {
        let mut events = self.events.lock().map_err(|_| poisoned())?;
        let before = events.len();
        events.retain(|_, e| !owned_by(&e.key, owner));
        Ok((before - events.len()) as u64)
    }
}
