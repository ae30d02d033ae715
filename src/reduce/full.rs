//! Full replay of a key's history from the initial state.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tracing::{debug, info};

use super::{IgnoredOwners, KeyLocks, ReduceState, ServiceError, UpdateListener};
use crate::domain::{EntityKey, EntityKind, SnapshotOf};
use crate::engine::{fold, EntityReducer};
use crate::store::{stream_events, EventFilter, EventSource, SnapshotStore};

type KeyOf<R> = <<R as EntityReducer>::Kind as EntityKind>::Key;

pub struct FullReduceService<R: EntityReducer> {
    reducer: R,
    snapshots: Arc<dyn SnapshotStore<R::Kind>>,
    source: Arc<dyn EventSource<R::Kind>>,
    locks: KeyLocks,
    ignored: Arc<IgnoredOwners>,
    batch_size: usize,
    checkpoint_interval: Duration,
    listeners: Vec<Arc<dyn UpdateListener<R::Kind>>>,
}

impl<R: EntityReducer> FullReduceService<R> {
    pub fn new(
        reducer: R,
        snapshots: Arc<dyn SnapshotStore<R::Kind>>,
        source: Arc<dyn EventSource<R::Kind>>,
        locks: KeyLocks,
    ) -> Self {
        Self {
            reducer,
            snapshots,
            source,
            locks,
            ignored: Arc::new(IgnoredOwners::default()),
            batch_size: 1000,
            checkpoint_interval: Duration::from_secs(5),
            listeners: Vec::new(),
        }
    }

    /// Rows per read. Bounds memory, not correctness.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn with_ignored(mut self, ignored: Arc<IgnoredOwners>) -> Self {
        self.ignored = ignored;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn UpdateListener<R::Kind>>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn locks(&self) -> &KeyLocks {
        &self.locks
    }

    pub fn is_ignored(&self, key: &KeyOf<R>) -> bool {
        self.ignored.covers(key)
    }

    pub(crate) fn notify(&self, snapshot: &SnapshotOf<R::Kind>) {
        for listener in &self.listeners {
            listener.on_snapshot(snapshot);
        }
    }

    /// Rebuild one key, waiting for any in-flight reduction of it.
    ///
    /// Returns `None` for keys owned by an ignored address.
    pub async fn reduce_key(
        &self,
        key: &KeyOf<R>,
    ) -> Result<Option<SnapshotOf<R::Kind>>, ServiceError> {
        let _guard = self
            .locks
            .acquire(R::Kind::STREAM, &key.to_key_string())
            .await;
        self.reduce_key_locked(key).await
    }

    /// Rebuild one key, refusing if another reduction holds it.
    pub async fn try_reduce_key(
        &self,
        key: &KeyOf<R>,
    ) -> Result<Option<SnapshotOf<R::Kind>>, ServiceError> {
        let key_str = key.to_key_string();
        let Some(_guard) = self.locks.try_acquire(R::Kind::STREAM, &key_str).await else {
            return Err(ServiceError::Busy(key_str));
        };
        self.reduce_key_locked(key).await
    }

    /// Caller must hold the key's lock.
    pub(crate) async fn reduce_key_locked(
        &self,
        key: &KeyOf<R>,
    ) -> Result<Option<SnapshotOf<R::Kind>>, ServiceError> {
        if self.ignored.covers(key) {
            debug!(kind = R::Kind::KIND, key = %key, "Skipping ignored owner");
            return Ok(None);
        }

        let mut snapshot = self.reducer.initial_snapshot(key);
        let mut events = stream_events::<R::Kind, _>(
            self.source.as_ref(),
            EventFilter::for_key(key.clone()),
            None,
            self.batch_size,
        );
        let mut folded = 0usize;
        while let Some(event) = events.try_next().await? {
            snapshot = fold(&self.reducer, snapshot, [&event])?;
            folded += 1;
        }

        self.snapshots.put(&snapshot).await?;
        self.notify(&snapshot);
        debug!(
            kind = R::Kind::KIND,
            key = %key,
            events = folded,
            mark = %snapshot.mark,
            "Full reduce complete"
        );
        Ok(Some(snapshot))
    }

    /// Rebuild every key in scope, in key order, starting after `from`.
    ///
    /// Yields the last reduced key as a resumable cursor at least every
    /// checkpoint interval, and once more when the scope is exhausted.
    pub fn reduce_scope(
        &self,
        filter: EventFilter<KeyOf<R>>,
        from: Option<String>,
    ) -> BoxStream<'_, Result<String, ServiceError>> {
        let scope = ScopeReduction {
            filter,
            state: ReduceState::from_cursor(from.as_deref()),
            buffer: VecDeque::new(),
            exhausted: false,
            finished: false,
            reduced: 0,
        };
        info!(
            kind = R::Kind::KIND,
            from = %scope.state.to_cursor(),
            "Starting scoped full reduce"
        );
        stream::unfold(scope, move |mut scope| async move {
            let item = scope.step(self).await?;
            Some((item, scope))
        })
        .boxed()
    }
}

struct ScopeReduction<K> {
    filter: EventFilter<K>,
    state: ReduceState,
    buffer: VecDeque<String>,
    exhausted: bool,
    finished: bool,
    reduced: usize,
}

impl<K: EntityKey> ScopeReduction<K> {
    /// Reduce keys until a checkpoint is due. `None` once finished.
    async fn step<R>(&mut self, service: &FullReduceService<R>) -> Option<Result<String, ServiceError>>
    where
        R: EntityReducer,
        R::Kind: EntityKind<Key = K>,
    {
        if self.finished {
            return None;
        }
        let started = Instant::now();
        loop {
            if self.buffer.is_empty() {
                if self.exhausted {
                    self.finished = true;
                    info!(
                        kind = R::Kind::KIND,
                        keys = self.reduced,
                        "Scoped full reduce finished"
                    );
                    return Some(Ok(self.state.to_cursor()));
                }
                let keys = service
                    .source
                    .fetch_keys(&self.filter, self.state.last_key.as_deref(), service.batch_size)
                    .await;
                match keys {
                    Ok(keys) if keys.is_empty() => self.exhausted = true,
                    Ok(keys) => self.buffer.extend(keys),
                    Err(err) => return Some(self.fail(err.into())),
                }
                continue;
            }

            let Some(raw) = self.buffer.pop_front() else {
                continue;
            };
            let key = match K::parse_key(&raw) {
                Ok(key) => key,
                Err(err) => return Some(self.fail(err.into())),
            };
            if let Err(err) = service.reduce_key(&key).await {
                return Some(self.fail(err));
            }
            self.state.last_key = Some(raw);
            self.reduced += 1;

            if started.elapsed() >= service.checkpoint_interval {
                return Some(Ok(self.state.to_cursor()));
            }
        }
    }

    fn fail(&mut self, err: ServiceError) -> Result<String, ServiceError> {
        self.finished = true;
        Err(err)
    }
}
