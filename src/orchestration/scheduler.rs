//! Timer-driven submission and execution of administrative tasks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info};

use super::{BalanceDriftChecker, TaskRunner, TaskService};
use crate::datasource::ChainQuery;
use crate::domain::BalanceKind;
use crate::store::SnapshotStore;

/// Tasks run per tick.
const TASKS_PER_TICK: usize = 16;

pub struct Scheduler {
    tasks: TaskService,
    runner: TaskRunner,
    drift: Arc<BalanceDriftChecker>,
    chain: Arc<dyn ChainQuery>,
    snapshots: Arc<dyn SnapshotStore<BalanceKind>>,
    interval: Duration,
    cleanup_every: Option<Duration>,
}

impl Scheduler {
    pub fn new(
        tasks: TaskService,
        runner: TaskRunner,
        drift: Arc<BalanceDriftChecker>,
        chain: Arc<dyn ChainQuery>,
        snapshots: Arc<dyn SnapshotStore<BalanceKind>>,
        interval: Duration,
    ) -> Self {
        Self {
            tasks,
            runner,
            drift,
            chain,
            snapshots,
            interval,
            cleanup_every: None,
        }
    }

    /// Resubmit the ignored-owner cleanup at most this often.
    pub fn with_cleanup_every(mut self, every: Duration) -> Self {
        self.cleanup_every = Some(every);
        self
    }

    /// Tick until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_cleanup: Option<Instant> = None;
        info!(interval_ms = self.interval.as_millis() as u64, "Scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let cleanup_due = self.cleanup_every.is_some_and(|every| {
                        last_cleanup.map_or(true, |at| at.elapsed() >= every)
                    });
                    if cleanup_due {
                        last_cleanup = Some(Instant::now());
                    }
                    self.tick(cleanup_due).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Scheduler stopped");
    }

    /// One round: drift check, optional cleanup submission, queued tasks.
    pub async fn tick(&self, submit_cleanup: bool) {
        debug!("Running scheduler tick");
        if let Err(e) = self
            .drift
            .check(self.chain.as_ref(), self.snapshots.as_ref(), &self.tasks)
            .await
        {
            error!("Balance drift check failed: {e}");
        }

        if submit_cleanup {
            if let Err(e) = self.tasks.create_cleanup_task(true).await {
                error!("Cleanup submission failed: {e}");
            }
        }

        match self.runner.run_pending(TASKS_PER_TICK).await {
            Ok(outcomes) if !outcomes.is_empty() => {
                debug!(tasks = outcomes.len(), "Scheduler ran tasks");
            }
            Ok(_) => {}
            Err(e) => error!("Running tasks failed: {e}"),
        }
    }
}
