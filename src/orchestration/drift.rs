//! Periodic ground-truth check of freshly updated balances.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::{debug, error, info, warn};

use super::{TaskError, TaskService};
use crate::datasource::ChainQuery;
use crate::domain::{BalanceId, BalanceKind, SnapshotOf};
use crate::reduce::UpdateListener;
use crate::store::SnapshotStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriftReport {
    pub checked: usize,
    pub invalid: usize,
    /// Too old to compare against the node; dropped unchecked.
    pub skipped: usize,
}

/// Buffers balance updates by block and compares them with `balanceOf`
/// once the block is deep enough to be final.
#[derive(Debug)]
pub struct BalanceDriftChecker {
    pending: Mutex<BTreeMap<i64, BTreeSet<BalanceId>>>,
    /// Mismatches whose reduce task was refused. Rechecked every tick,
    /// whatever their age.
    unrepaired: Mutex<BTreeMap<BalanceId, i64>>,
    confirmations: i64,
    skip_blocks: i64,
    invalid_total: AtomicU64,
}

impl BalanceDriftChecker {
    pub fn new(confirmations: u64, skip_blocks: u64) -> Self {
        Self {
            pending: Mutex::new(BTreeMap::new()),
            unrepaired: Mutex::new(BTreeMap::new()),
            confirmations: i64::try_from(confirmations).unwrap_or(i64::MAX),
            skip_blocks: i64::try_from(skip_blocks).unwrap_or(i64::MAX),
            invalid_total: AtomicU64::new(0),
        }
    }

    /// Balances found invalid since startup.
    pub fn invalid_balances(&self) -> u64 {
        self.invalid_total.load(Ordering::Relaxed)
    }

    pub fn pending_len(&self) -> usize {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.values().map(BTreeSet::len).sum()
    }

    pub fn unrepaired_len(&self) -> usize {
        self.unrepaired.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn take_unrepaired(&self) -> Vec<(i64, BalanceId)> {
        let mut unrepaired = self.unrepaired.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *unrepaired)
            .into_iter()
            .map(|(key, block)| (block, key))
            .collect()
    }

    fn take_ready(&self, head: i64) -> (Vec<(i64, BalanceId)>, usize) {
        let ready_up_to = head.saturating_sub(self.confirmations);
        let oldest = head.saturating_sub(self.skip_blocks);
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());

        let later = pending.split_off(&ready_up_to.saturating_add(1));
        let ready = std::mem::replace(&mut *pending, later);

        let mut skipped = 0;
        let mut out = Vec::new();
        for (block, keys) in ready {
            if block < oldest {
                skipped += keys.len();
                continue;
            }
            out.extend(keys.into_iter().map(|key| (block, key)));
        }
        (out, skipped)
    }

    /// Compare every buffered balance that is final by now.
    ///
    /// Mismatches are logged with both values and repaired by a targeted
    /// reduce task. A mismatch whose task overlaps a queued or running one
    /// is kept and checked again on the next call.
    pub async fn check(
        &self,
        chain: &dyn ChainQuery,
        snapshots: &dyn SnapshotStore<BalanceKind>,
        tasks: &TaskService,
    ) -> Result<DriftReport, TaskError> {
        let head = chain.block_number().await?;
        let (mut ready, skipped) = self.take_ready(head);
        ready.extend(self.take_unrepaired());
        let mut report = DriftReport {
            skipped,
            ..DriftReport::default()
        };

        for (block, key) in ready {
            let Some(snapshot) = snapshots.get(&key).await? else {
                continue;
            };
            // Compare at the block the stored balance reflects.
            let at = snapshot.data.block_number.unwrap_or(block);
            let actual = chain.balance_of(&key.token, &key.owner, Some(at)).await?;
            report.checked += 1;
            if actual == snapshot.data.amount {
                continue;
            }

            report.invalid += 1;
            self.invalid_total.fetch_add(1, Ordering::Relaxed);
            error!(
                token = %key.token,
                owner = %key.owner,
                stored = %snapshot.data.amount,
                actual = %actual,
                block = at,
                "Balance drift detected"
            );
            match tasks
                .create_reduce_task(Some(key.token.clone()), Some(key.owner.clone()), true)
                .await
            {
                Ok(_) => {}
                Err(err @ (TaskError::Overlapping { .. } | TaskError::AlreadyRunning(_))) => {
                    warn!(
                        key = %key,
                        error = %err,
                        "Reduce task overlaps; repair retried next check"
                    );
                    self.unrepaired
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(key, block);
                }
                Err(err) => return Err(err),
            }
        }

        if report.checked > 0 || report.skipped > 0 {
            info!(
                head,
                checked = report.checked,
                invalid = report.invalid,
                skipped = report.skipped,
                "Balance drift check"
            );
        }
        Ok(report)
    }
}

impl UpdateListener<BalanceKind> for BalanceDriftChecker {
    fn on_snapshot(&self, snapshot: &SnapshotOf<BalanceKind>) {
        let Some(block) = snapshot.data.block_number else {
            return;
        };
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending
            .entry(block)
            .or_default()
            .insert(snapshot.key.clone());
        debug!(key = %snapshot.key, block, "Balance queued for drift check");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::MockChain;
    use crate::db::repo::test_util::temp_repo;
    use crate::domain::{Address, Decimal};
    use crate::engine::test_support::*;
    use crate::engine::{BalanceReducer, EntityReducer};
    use std::sync::Arc;

    fn snapshot_at(block: i64, amount: u64) -> SnapshotOf<BalanceKind> {
        let mut snapshot = BalanceReducer.initial_snapshot(&balance_id());
        snapshot.data.amount = Decimal::from(amount);
        snapshot.data.block_number = Some(block);
        snapshot
    }

    #[test]
    fn test_only_final_blocks_are_taken() {
        let checker = BalanceDriftChecker::new(12, 1000);
        checker.on_snapshot(&snapshot_at(100, 1));
        let mut other = snapshot_at(95, 1);
        other.key = crate::domain::BalanceId::new(Address::new("0xt"), Address::new("0xz"));
        checker.on_snapshot(&other);

        let (ready, skipped) = checker.take_ready(110);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].0, 95);
        assert_eq!(skipped, 0);
        assert_eq!(checker.pending_len(), 1);

        let (_, skipped) = checker.take_ready(5000);
        assert_eq!(skipped, 1);
        assert_eq!(checker.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_mismatch_counts_and_queues_repair() {
        let (_dir, repo) = temp_repo().await;
        let repo = Arc::new(repo);
        let stored = snapshot_at(100, 17);
        SnapshotStore::<BalanceKind>::put(repo.as_ref(), &stored)
            .await
            .unwrap();

        let chain = MockChain::new().with_head(200).with_balance(
            &Address::new("0xtoken"),
            &Address::new("0xowner"),
            Decimal::from(7u64),
        );
        let tasks = TaskService::new(repo.clone());
        let checker = BalanceDriftChecker::new(12, 1000);
        checker.on_snapshot(&stored);

        let report = checker.check(&chain, repo.as_ref(), &tasks).await.unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.invalid, 1);
        assert_eq!(checker.invalid_balances(), 1);
        assert_eq!(tasks.list_tasks(None).await.unwrap().len(), 1);

        chain.set_balance(&Address::new("0xtoken"), &Address::new("0xowner"), Decimal::from(17u64));
        checker.on_snapshot(&stored);
        let report = checker.check(&chain, repo.as_ref(), &tasks).await.unwrap();
        assert_eq!(report.invalid, 0);
        assert_eq!(checker.invalid_balances(), 1);
    }

    #[tokio::test]
    async fn test_refused_repair_is_retried() {
        let (_dir, repo) = temp_repo().await;
        let repo = Arc::new(repo);
        let stored = snapshot_at(100, 17);
        SnapshotStore::<BalanceKind>::put(repo.as_ref(), &stored)
            .await
            .unwrap();
        let chain = MockChain::new().with_head(200).with_balance(
            &Address::new("0xtoken"),
            &Address::new("0xowner"),
            Decimal::from(7u64),
        );
        let tasks = TaskService::new(repo.clone());
        let broad = tasks
            .create_reduce_task(Some(Address::new("0xtoken")), None, false)
            .await
            .unwrap();

        let checker = BalanceDriftChecker::new(12, 1000);
        checker.on_snapshot(&stored);
        let report = checker.check(&chain, repo.as_ref(), &tasks).await.unwrap();
        assert_eq!(report.invalid, 1);
        assert_eq!(checker.unrepaired_len(), 1);
        assert_eq!(tasks.list_tasks(None).await.unwrap().len(), 1);

        repo.finish_task(broad.id, crate::orchestration::TaskStatus::Completed, None)
            .await
            .unwrap();
        let report = checker.check(&chain, repo.as_ref(), &tasks).await.unwrap();
        assert_eq!(report.invalid, 1);
        assert_eq!(checker.unrepaired_len(), 0);
        let queued = tasks
            .list_tasks(Some(crate::orchestration::BALANCE_REDUCE))
            .await
            .unwrap();
        assert_eq!(queued.len(), 2);
    }
}
