//! Cross-check of balances whose log was recorded more than once.
//!
//! A log stored twice under different minor indexes double counts. The
//! chain's `balanceOf` tells whether the stored balance actually drifted.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::{TaskError, TaskHandler, TaskService, DUPLICATED_LOG_RECORDS};
use crate::datasource::ChainQuery;
use crate::db::Repository;
use crate::domain::{BalanceKind, Decimal, EntityKey, EventOf, LogStatus, OrderKey};
use crate::engine::BalanceReducer;
use crate::reduce::FullReduceService;
use crate::store::{EventFilter, EventLog, EventPosition, EventSource, SnapshotStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupeParam {
    /// Delete duplicates and repair drifted balances, not just report them.
    #[serde(default)]
    pub update: bool,
}

impl DedupeParam {
    pub fn parse(raw: &str) -> Result<Self, TaskError> {
        serde_json::from_str(raw).map_err(|e| TaskError::invalid_param(raw, e))
    }

    pub fn to_param(&self) -> String {
        format!(r#"{{"update":{}}}"#, self.update)
    }
}

pub struct DuplicatedLogRecordsTaskHandler {
    full: Arc<FullReduceService<BalanceReducer>>,
    repo: Arc<Repository>,
    chain: Arc<dyn ChainQuery>,
    tasks: TaskService,
    batch_size: usize,
}

struct Scan {
    update: bool,
    after: Option<EventPosition>,
    done: bool,
}

impl DuplicatedLogRecordsTaskHandler {
    pub fn new(
        full: Arc<FullReduceService<BalanceReducer>>,
        repo: Arc<Repository>,
        chain: Arc<dyn ChainQuery>,
        tasks: TaskService,
    ) -> Self {
        Self {
            full,
            repo,
            chain,
            tasks,
            batch_size: 1000,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Process one batch of confirmed events. Returns the new cursor, or
    /// `None` once the scan is exhausted.
    async fn scan_batch(&self, scan: &mut Scan) -> Result<Option<String>, TaskError> {
        let filter = EventFilter::default().with_status(LogStatus::Confirmed);
        let events = EventSource::<BalanceKind>::fetch_batch(
            self.repo.as_ref(),
            &filter,
            scan.after.as_ref(),
            self.batch_size,
        )
        .await?;
        let Some(last) = events.last() else {
            return Ok(None);
        };
        let next = EventPosition::of::<BalanceKind>(last);

        let mut removed: BTreeSet<EventPosition> = BTreeSet::new();
        for event in &events {
            if removed.contains(&EventPosition::of::<BalanceKind>(event)) {
                continue;
            }
            for order in self.check_event(event, scan.update).await? {
                removed.insert(EventPosition {
                    key: event.key.to_key_string(),
                    order,
                });
            }
        }
        let cursor = next.to_cursor();
        scan.after = Some(next);
        Ok(Some(cursor))
    }

    /// Check one event against its duplicates. Returns the orders deleted.
    async fn check_event(
        &self,
        event: &EventOf<BalanceKind>,
        update: bool,
    ) -> Result<Vec<OrderKey>, TaskError> {
        if event.payload.signed_delta().is_none() {
            return Ok(Vec::new());
        }
        let duplicates =
            EventLog::<BalanceKind>::find_possible_duplicates(self.repo.as_ref(), event).await?;
        if duplicates.is_empty() {
            return Ok(Vec::new());
        }

        let key = &event.key;
        let stored = SnapshotStore::<BalanceKind>::get(self.repo.as_ref(), key)
            .await?
            .map(|s| s.data.amount)
            .unwrap_or_else(Decimal::zero);
        let actual = self.chain.balance_of(&key.token, &key.owner, None).await?;
        if stored == actual {
            debug!(key = %key, duplicates = duplicates.len(), "Duplicate log records are harmless");
            return Ok(Vec::new());
        }

        error!(
            token = %key.token,
            owner = %key.owner,
            stored = %stored,
            actual = %actual,
            block = event.block_number(),
            duplicates = duplicates.len(),
            "Balance drift from duplicated log records"
        );
        if !update {
            return Ok(Vec::new());
        }

        let orders: Vec<OrderKey> = duplicates.iter().map(|d| d.order).collect();
        let removed =
            EventLog::<BalanceKind>::delete_events(self.repo.as_ref(), key, &orders).await?;
        info!(key = %key, removed, "Duplicate log records deleted");
        match self
            .tasks
            .create_reduce_task(Some(key.token.clone()), Some(key.owner.clone()), true)
            .await
        {
            Ok(_) => {}
            // The covering task may already be past this key.
            Err(err @ (TaskError::Overlapping { .. } | TaskError::AlreadyRunning(_))) => {
                warn!(key = %key, error = %err, "Reduce task overlaps; repairing in place");
                self.full.reduce_key(key).await?;
            }
            Err(err) => return Err(err),
        }
        Ok(orders)
    }
}

#[async_trait]
impl TaskHandler for DuplicatedLogRecordsTaskHandler {
    fn task_type(&self) -> &'static str {
        DUPLICATED_LOG_RECORDS
    }

    async fn is_able_to_run(&self, param: &str) -> Result<bool, TaskError> {
        DedupeParam::parse(param)?;
        let tasks = self.repo.list_tasks(Some(DUPLICATED_LOG_RECORDS)).await?;
        Ok(!tasks.iter().any(|t| t.running && t.param != param))
    }

    fn run_long_task(
        &self,
        from: Option<String>,
        param: String,
    ) -> BoxStream<'_, Result<String, TaskError>> {
        let update = match DedupeParam::parse(&param) {
            Ok(param) => param.update,
            Err(err) => return stream::once(async move { Err(err) }).boxed(),
        };
        let scan = Scan {
            update,
            after: from.as_deref().and_then(EventPosition::from_cursor),
            done: false,
        };
        stream::unfold(scan, move |mut scan| async move {
            if scan.done {
                return None;
            }
            match self.scan_batch(&mut scan).await {
                Ok(Some(cursor)) => Some((Ok(cursor), scan)),
                Ok(None) => None,
                Err(err) => {
                    scan.done = true;
                    Some((Err(err), scan))
                }
            }
        })
        .boxed()
    }
}
