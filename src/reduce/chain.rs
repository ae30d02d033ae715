//! Online update path: record delivered events, then apply them to the
//! stored snapshot, falling back to a full replay per key when needed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info, warn};

use super::{FullReduceService, KeyLocks, ReduceEngine, ServiceError};
use crate::domain::{
    EntityKey, EntityKind, LogEvent, LogStatus, OrderKey, Snapshot, SnapshotOf,
};
use crate::engine::{Dispatch, EntityReducer, EventInverter, StatusDispatcher};
use crate::store::{EventLog, RecordOutcome, SnapshotStore};

type KeyOf<R> = <<R as EntityReducer>::Kind as EntityKind>::Key;
type PayloadOf<R> = <<R as EntityReducer>::Kind as EntityKind>::Payload;
type EventOfR<R> = LogEvent<KeyOf<R>, PayloadOf<R>>;

/// A delivered event together with what recording it did.
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded<K, P> {
    pub event: LogEvent<K, P>,
    pub outcome: RecordOutcome,
}

/// How one key's batch was materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPath {
    FastPath,
    FullReduce,
    Ignored,
}

/// Secondary consumer of a stream's recorded events.
///
/// Followers run while the stream lock for the key is held, so kinds that
/// fold the same log never interleave.
#[async_trait]
pub trait StreamFollower<K, P>: Send + Sync {
    async fn follow_locked(
        &self,
        key: &K,
        recorded: &[Recorded<K, P>],
    ) -> Result<KeyPath, ServiceError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub keys: usize,
    pub fast_path: usize,
    pub full_reduce: usize,
    pub ignored: usize,
}

impl UpdateSummary {
    fn count(mut self, path: KeyPath) -> Self {
        self.keys += 1;
        match path {
            KeyPath::FastPath => self.fast_path += 1,
            KeyPath::FullReduce => self.full_reduce += 1,
            KeyPath::Ignored => self.ignored += 1,
        }
        self
    }
}

/// What to do with a recorded batch for one snapshot.
#[derive(Debug, Clone, PartialEq)]
enum Plan<K, P> {
    Apply(Vec<LogEvent<K, P>>),
    FullReduce(&'static str),
}

/// Decide which events to dispatch onto `snapshot`.
///
/// The horizon starts at the snapshot's last order and moves with every
/// event taken in this batch. A newly inserted event behind it was never
/// folded into this snapshot, so the key is replayed from the log.
/// A status change of an already incorporated confirmed event becomes a
/// REVERTED compensation. A late confirmation needs a replay unless the
/// reducer commutes.
fn plan<K, D, P>(
    snapshot: &Snapshot<K, D>,
    recorded: &[Recorded<K, P>],
    commutes: bool,
) -> Plan<K, P>
where
    K: Clone,
    P: Clone,
{
    let mut horizon: Option<OrderKey> = snapshot.last_order;
    let behind = |horizon: Option<OrderKey>, order: &OrderKey| horizon.is_some_and(|h| *order <= h);
    let mut events = Vec::with_capacity(recorded.len());

    for Recorded { event, outcome } in recorded {
        match *outcome {
            RecordOutcome::Duplicate => {
                debug!(id = %event.id, order = %event.order, "Redelivered event ignored");
            }
            RecordOutcome::Inserted => {
                if behind(horizon, &event.order) {
                    return Plan::FullReduce("stale insert");
                }
                horizon = Some(event.order);
                if event.status != LogStatus::Reverted {
                    events.push(event.clone());
                }
            }
            RecordOutcome::StatusChanged { previous } if previous.is_confirmed() => {
                if behind(horizon, &event.order) {
                    events.push(event.with_status(LogStatus::Reverted));
                } else {
                    debug!(id = %event.id, "Unconfirmed event was never incorporated");
                }
            }
            RecordOutcome::StatusChanged { .. } => match event.status {
                LogStatus::Confirmed => {
                    let late = horizon.is_some_and(|h| event.order < h);
                    if late && !commutes {
                        return Plan::FullReduce("late confirmation");
                    }
                    horizon = horizon.max(Some(event.order));
                    events.push(event.clone());
                }
                // Never applied; only the unconfirmed bookkeeping is undone.
                LogStatus::Reverted => events.push(event.with_status(LogStatus::Dropped)),
                _ => events.push(event.clone()),
            },
        }
    }
    Plan::Apply(events)
}

fn retry_policy() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(50),
        max_elapsed_time: Some(Duration::from_secs(30)),
        ..Default::default()
    }
}

fn classify(err: ServiceError) -> backoff::Error<ServiceError> {
    if err.is_transient() {
        backoff::Error::transient(err)
    } else {
        backoff::Error::permanent(err)
    }
}

pub struct ChainUpdateService<R: EventInverter + Clone> {
    dispatcher: StatusDispatcher<R>,
    full: Arc<FullReduceService<R>>,
    snapshots: Arc<dyn SnapshotStore<R::Kind>>,
    log: Arc<dyn EventLog<R::Kind>>,
    engine: ReduceEngine,
    max_concurrency: usize,
    followers: Vec<Arc<dyn StreamFollower<KeyOf<R>, PayloadOf<R>>>>,
}

impl<R: EventInverter + Clone> ChainUpdateService<R> {
    pub fn new(
        reducer: R,
        full: Arc<FullReduceService<R>>,
        snapshots: Arc<dyn SnapshotStore<R::Kind>>,
        log: Arc<dyn EventLog<R::Kind>>,
    ) -> Self {
        Self {
            dispatcher: StatusDispatcher::new(reducer),
            full,
            snapshots,
            log,
            engine: ReduceEngine::default(),
            max_concurrency: 16,
            followers: Vec::new(),
        }
    }

    pub fn with_engine(mut self, engine: ReduceEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Register a kind that folds the same stream.
    pub fn with_follower(
        mut self,
        follower: Arc<dyn StreamFollower<KeyOf<R>, PayloadOf<R>>>,
    ) -> Self {
        self.followers.push(follower);
        self
    }

    pub fn full(&self) -> &Arc<FullReduceService<R>> {
        &self.full
    }

    fn locks(&self) -> &KeyLocks {
        self.full.locks()
    }

    /// Record and apply a batch of delivered events.
    ///
    /// Keys are processed concurrently, each under its own lock; events of
    /// one key keep their delivery order.
    pub async fn update(&self, events: Vec<EventOfR<R>>) -> Result<UpdateSummary, ServiceError> {
        let mut by_key: BTreeMap<String, (KeyOf<R>, Vec<EventOfR<R>>)> = BTreeMap::new();
        for event in events {
            by_key
                .entry(event.key.to_key_string())
                .or_insert_with(|| (event.key.clone(), Vec::new()))
                .1
                .push(event);
        }

        let summary = stream::iter(by_key.into_values())
            .map(|(key, events)| async move { self.update_key(&key, events).await })
            .buffer_unordered(self.max_concurrency)
            .try_fold(UpdateSummary::default(), |summary, path| async move {
                Ok(summary.count(path))
            })
            .await?;

        info!(
            kind = R::Kind::KIND,
            keys = summary.keys,
            fast_path = summary.fast_path,
            full_reduce = summary.full_reduce,
            ignored = summary.ignored,
            "Chain update applied"
        );
        Ok(summary)
    }

    async fn update_key(
        &self,
        key: &KeyOf<R>,
        events: Vec<EventOfR<R>>,
    ) -> Result<KeyPath, ServiceError> {
        let _guard = self
            .locks()
            .acquire(R::Kind::STREAM, &key.to_key_string())
            .await;
        if self.full.is_ignored(key) {
            debug!(
                kind = R::Kind::KIND,
                key = %key,
                skipped = events.len(),
                "Skipping ignored owner"
            );
            return Ok(KeyPath::Ignored);
        }

        let recorded = self.record_locked(key, events).await?;

        let path = self.apply_recorded_locked(key, &recorded).await?;
        for follower in &self.followers {
            follower.follow_locked(key, &recorded).await?;
        }
        Ok(path)
    }

    /// Record delivered events, dropping new ones behind the stored
    /// snapshot's last order so the log never holds what the snapshot skipped.
    ///
    /// Caller must hold the key's stream lock.
    async fn record_locked(
        &self,
        key: &KeyOf<R>,
        events: Vec<EventOfR<R>>,
    ) -> Result<Vec<Recorded<KeyOf<R>, PayloadOf<R>>>, ServiceError> {
        let mut horizon = self.snapshots.get(key).await?.and_then(|s| s.last_order);
        let mut recorded = Vec::with_capacity(events.len());
        for event in events {
            let outcome = retry(retry_policy(), || async {
                self.log.record(&event).await.map_err(|e| classify(e.into()))
            })
            .await?;
            if outcome == RecordOutcome::Inserted {
                if horizon.is_some_and(|h| event.order <= h) {
                    warn!(
                        kind = R::Kind::KIND,
                        id = %event.id,
                        order = %event.order,
                        "Stale event dropped"
                    );
                    let order = event.order;
                    retry(retry_policy(), || async {
                        self.log
                            .delete_events(key, std::slice::from_ref(&order))
                            .await
                            .map_err(|e| classify(e.into()))
                    })
                    .await?;
                    continue;
                }
                horizon = Some(event.order);
            }
            recorded.push(Recorded { event, outcome });
        }
        Ok(recorded)
    }

    /// Caller must hold the key's stream lock.
    pub(crate) async fn apply_recorded_locked(
        &self,
        key: &KeyOf<R>,
        recorded: &[Recorded<KeyOf<R>, PayloadOf<R>>],
    ) -> Result<KeyPath, ServiceError> {
        if self.full.is_ignored(key) {
            debug!(kind = R::Kind::KIND, key = %key, "Skipping ignored owner");
            return Ok(KeyPath::Ignored);
        }
        if self.engine == ReduceEngine::Full {
            return self.replay(key, "full engine configured").await;
        }
        retry(retry_policy(), || async {
            self.apply_fast(key, recorded).await.map_err(classify)
        })
        .await
    }

    async fn apply_fast(
        &self,
        key: &KeyOf<R>,
        recorded: &[Recorded<KeyOf<R>, PayloadOf<R>>],
    ) -> Result<KeyPath, ServiceError> {
        let Some(mut snapshot) = self.snapshots.get(key).await? else {
            return self.replay(key, "no snapshot").await;
        };

        let events = match plan(&snapshot, recorded, self.dispatcher.reducer().commutes()) {
            Plan::Apply(events) => events,
            Plan::FullReduce(reason) => return self.replay(key, reason).await,
        };

        if !events.is_empty() {
            match self.dispatcher.dispatch(snapshot.data.clone(), &events)? {
                Dispatch::Applied(data) => snapshot.data = data,
                Dispatch::RequiresFullReduce => {
                    return self.replay(key, "revert not invertible").await
                }
            }
        }
        let before = snapshot.last_order;
        for entry in recorded {
            snapshot.advance(entry.event.order);
        }
        if events.is_empty() && snapshot.last_order == before {
            return Ok(KeyPath::FastPath);
        }

        self.snapshots.put(&snapshot).await?;
        self.full.notify(&snapshot);
        debug!(
            kind = R::Kind::KIND,
            key = %key,
            applied = events.len(),
            mark = %snapshot.mark,
            "Snapshot updated"
        );
        Ok(KeyPath::FastPath)
    }

    async fn replay(&self, key: &KeyOf<R>, reason: &'static str) -> Result<KeyPath, ServiceError> {
        debug!(kind = R::Kind::KIND, key = %key, reason, "Falling back to full reduce");
        match self.full.reduce_key_locked(key).await? {
            Some(_) => Ok(KeyPath::FullReduce),
            None => Ok(KeyPath::Ignored),
        }
    }

    /// Current materialized state, if any.
    pub async fn snapshot(&self, key: &KeyOf<R>) -> Result<Option<SnapshotOf<R::Kind>>, ServiceError> {
        Ok(self.snapshots.get(key).await?)
    }
}

#[async_trait]
impl<R: EventInverter + Clone> StreamFollower<KeyOf<R>, PayloadOf<R>> for ChainUpdateService<R> {
    async fn follow_locked(
        &self,
        key: &KeyOf<R>,
        recorded: &[Recorded<KeyOf<R>, PayloadOf<R>>],
    ) -> Result<KeyPath, ServiceError> {
        self.apply_recorded_locked(key, recorded).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Address, AuctionHash, AuctionKind, BalanceKind, BalancePayload, Decimal, Mark,
    };
    use crate::engine::test_support::*;
    use crate::engine::{AllowanceReducer, AuctionReducer, BalanceReducer};
    use crate::reduce::IgnoredOwners;
    use crate::store::MemoryStore;

    fn chain(store: &Arc<MemoryStore<BalanceKind>>) -> ChainUpdateService<BalanceReducer> {
        let full = Arc::new(FullReduceService::new(
            BalanceReducer,
            store.clone(),
            store.clone(),
            KeyLocks::new(),
        ));
        ChainUpdateService::new(BalanceReducer, full, store.clone(), store.clone())
    }

    async fn amount(service: &ChainUpdateService<BalanceReducer>) -> Decimal {
        service
            .snapshot(&balance_id())
            .await
            .unwrap()
            .map(|s| s.data.amount)
            .unwrap_or_default()
    }

    async fn seeded(store: &Arc<MemoryStore<BalanceKind>>) -> ChainUpdateService<BalanceReducer> {
        let service = chain(store);
        let summary = service
            .update(vec![balance_event(1, 0, LogStatus::Confirmed, income(7))])
            .await
            .unwrap();
        assert_eq!(summary.full_reduce, 1);
        service
    }

    #[tokio::test]
    async fn test_confirmed_income_takes_fast_path() {
        let store = Arc::new(MemoryStore::<BalanceKind>::new());
        let service = seeded(&store).await;

        let summary = service
            .update(vec![balance_event(2, 0, LogStatus::Confirmed, income(10))])
            .await
            .unwrap();
        assert_eq!(summary.fast_path, 1);
        assert_eq!(amount(&service).await, Decimal::from(17u64));
    }

    #[tokio::test]
    async fn test_revert_of_incorporated_event_compensates() {
        let store = Arc::new(MemoryStore::<BalanceKind>::new());
        let service = seeded(&store).await;
        let income = balance_event(2, 0, LogStatus::Confirmed, income(10));

        service.update(vec![income.clone()]).await.unwrap();
        service
            .update(vec![income.with_status(LogStatus::Reverted)])
            .await
            .unwrap();

        assert_eq!(amount(&service).await, Decimal::from(7u64));
        let snapshot = service.snapshot(&balance_id()).await.unwrap().unwrap();
        assert_eq!(snapshot.mark, Mark(2));
    }

    #[tokio::test]
    async fn test_mixed_history_nets_out_reverted_income() {
        let store = Arc::new(MemoryStore::<BalanceKind>::new());
        let service = seeded(&store).await;
        let reverted = balance_event(4, 0, LogStatus::Confirmed, income(10));

        service
            .update(vec![
                balance_event(2, 0, LogStatus::Confirmed, income(10)),
                balance_event(3, 0, LogStatus::Confirmed, outcome(1)),
                reverted.clone(),
            ])
            .await
            .unwrap();
        service
            .update(vec![
                reverted.with_status(LogStatus::Reverted),
                balance_event(5, 0, LogStatus::Confirmed, outcome(6)),
                balance_event(6, 0, LogStatus::Confirmed, income(4)),
            ])
            .await
            .unwrap();

        assert_eq!(amount(&service).await, Decimal::from(14u64));
    }

    #[tokio::test]
    async fn test_redelivery_and_stale_events_are_ignored() {
        let store = Arc::new(MemoryStore::<BalanceKind>::new());
        let service = seeded(&store).await;
        let fresh = balance_event(5, 0, LogStatus::Confirmed, income(10));
        service.update(vec![fresh.clone()]).await.unwrap();

        service.update(vec![fresh]).await.unwrap();
        service
            .update(vec![balance_event(3, 0, LogStatus::Confirmed, income(100))])
            .await
            .unwrap();

        assert_eq!(amount(&service).await, Decimal::from(17u64));
        assert_eq!(store.event_count(), 2);
    }

    #[tokio::test]
    async fn test_stale_event_then_revert_keeps_log_and_snapshot_in_step() {
        let store = Arc::new(MemoryStore::<BalanceKind>::new());
        let service = seeded(&store).await;
        service
            .update(vec![balance_event(5, 0, LogStatus::Confirmed, income(10))])
            .await
            .unwrap();

        let stale = balance_event(3, 0, LogStatus::Confirmed, income(100));
        service.update(vec![stale.clone()]).await.unwrap();
        assert_eq!(amount(&service).await, Decimal::from(17u64));

        service
            .update(vec![stale.with_status(LogStatus::Reverted)])
            .await
            .unwrap();
        assert_eq!(amount(&service).await, Decimal::from(17u64));

        let replayed = service
            .full()
            .reduce_key(&balance_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replayed.data.amount, Decimal::from(17u64));
    }

    #[test]
    fn test_stale_insert_behind_snapshot_requires_replay() {
        let mut snapshot = BalanceReducer.initial_snapshot(&balance_id());
        snapshot.advance(OrderKey::new(5, 0, 0));
        let stale = Recorded {
            event: balance_event(3, 0, LogStatus::Confirmed, income(1)),
            outcome: RecordOutcome::Inserted,
        };

        assert_eq!(
            plan(&snapshot, std::slice::from_ref(&stale), true),
            Plan::FullReduce("stale insert")
        );
    }

    #[tokio::test]
    async fn test_ignored_owner_events_are_not_recorded() {
        let store = Arc::new(MemoryStore::<BalanceKind>::new());
        let full = Arc::new(
            FullReduceService::new(BalanceReducer, store.clone(), store.clone(), KeyLocks::new())
                .with_ignored(Arc::new(IgnoredOwners::new([balance_id().owner.clone()]))),
        );
        let service = ChainUpdateService::new(BalanceReducer, full, store.clone(), store.clone());

        let summary = service
            .update(vec![balance_event(1, 0, LogStatus::Confirmed, income(7))])
            .await
            .unwrap();

        assert_eq!(summary.ignored, 1);
        assert_eq!(store.event_count(), 0);
        assert_eq!(store.snapshot_count(), 0);
    }

    #[tokio::test]
    async fn test_pending_then_confirmed_applies_once() {
        let store = Arc::new(MemoryStore::<BalanceKind>::new());
        let service = seeded(&store).await;
        let pending = balance_event(2, 0, LogStatus::Pending, income(10));

        service.update(vec![pending.clone()]).await.unwrap();
        assert_eq!(amount(&service).await, Decimal::from(7u64));

        service
            .update(vec![pending.with_status(LogStatus::Confirmed)])
            .await
            .unwrap();
        assert_eq!(amount(&service).await, Decimal::from(17u64));
    }

    #[test]
    fn test_late_confirmation_requires_replay_unless_commuting() {
        let mut snapshot = BalanceReducer.initial_snapshot(&balance_id());
        snapshot.advance(OrderKey::new(5, 0, 0));
        let late = Recorded {
            event: balance_event(3, 0, LogStatus::Confirmed, income(1)),
            outcome: RecordOutcome::StatusChanged {
                previous: LogStatus::Pending,
            },
        };

        assert_eq!(
            plan(&snapshot, std::slice::from_ref(&late), false),
            Plan::FullReduce("late confirmation")
        );
        assert_eq!(
            plan(&snapshot, std::slice::from_ref(&late), true),
            Plan::Apply(vec![late.event.clone()])
        );
    }

    #[tokio::test]
    async fn test_full_engine_always_replays() {
        let store = Arc::new(MemoryStore::<BalanceKind>::new());
        let service = seeded(&store).await.with_engine(ReduceEngine::Full);

        let summary = service
            .update(vec![balance_event(2, 0, LogStatus::Confirmed, income(10))])
            .await
            .unwrap();
        assert_eq!(summary.full_reduce, 1);
        assert_eq!(amount(&service).await, Decimal::from(17u64));
    }

    #[tokio::test]
    async fn test_allowance_follows_balance_stream() {
        let (_dir, repo) = crate::db::repo::test_util::temp_repo().await;
        let repo = Arc::new(repo);
        let locks = KeyLocks::new();
        let allowance_full = Arc::new(FullReduceService::new(
            AllowanceReducer,
            repo.clone(),
            repo.clone(),
            locks.clone(),
        ));
        let allowances = Arc::new(ChainUpdateService::new(
            AllowanceReducer,
            allowance_full,
            repo.clone(),
            repo.clone(),
        ));
        let balance_full = Arc::new(FullReduceService::new(
            BalanceReducer,
            repo.clone(),
            repo.clone(),
            locks,
        ));
        let service =
            ChainUpdateService::new(BalanceReducer, balance_full, repo.clone(), repo.clone())
                .with_follower(allowances.clone());

        let approval = BalancePayload::Approval {
            spender: Address::new("0xspender"),
            value: Decimal::from(50u64),
        };
        service
            .update(vec![
                balance_event(1, 0, LogStatus::Confirmed, income(7)),
                balance_event(1, 1, LogStatus::Confirmed, approval),
            ])
            .await
            .unwrap();

        assert_eq!(amount(&service).await, Decimal::from(7u64));
        let allowance = allowances.snapshot(&balance_id()).await.unwrap().unwrap();
        assert_eq!(allowance.data.allowance, Decimal::from(50u64));
    }

    #[tokio::test]
    async fn test_auction_revert_falls_back_to_replay() {
        use crate::domain::{AuctionPayload, TimeMs};

        let store = Arc::new(MemoryStore::<AuctionKind>::new());
        let full = Arc::new(FullReduceService::new(
            AuctionReducer,
            store.clone(),
            store.clone(),
            KeyLocks::new(),
        ));
        let service = ChainUpdateService::new(AuctionReducer, full, store.clone(), store.clone());
        let hash = AuctionHash::new("0xauction");
        let cancel = LogEvent {
            id: "cancel".to_string(),
            key: hash.clone(),
            status: LogStatus::Confirmed,
            order: OrderKey::new(2, 0, 0),
            tx_hash: "0xtx2".to_string(),
            timestamp: TimeMs(2000),
            payload: AuctionPayload::AuctionCancelled,
        };

        service.update(vec![cancel.clone()]).await.unwrap();
        let summary = service
            .update(vec![cancel.with_status(LogStatus::Reverted)])
            .await
            .unwrap();

        assert_eq!(summary.full_reduce, 1);
        let snapshot = service.snapshot(&hash).await.unwrap().unwrap();
        assert!(!snapshot.data.cancelled);
    }
}
