//! Service wiring shared by the binary and integration tests.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;

use crate::api::{self, AppState};
use crate::config::Config;
use crate::datasource::{ChainQuery, JsonRpcChain};
use crate::db::{init_db, Repository};
use crate::engine::{AllowanceReducer, AuctionReducer, BalanceReducer, PoolReducer};
use crate::orchestration::{
    BalanceDriftChecker, BalanceReduceTaskHandler, DuplicatedLogRecordsTaskHandler,
    IgnoredOwnersCleanup, Scheduler, TaskRunner, TaskService,
};
use crate::reduce::{ChainUpdateService, FullReduceService, IgnoredOwners, KeyLocks};

/// Ignored-owner purges are resubmitted at most this often.
const CLEANUP_EVERY: Duration = Duration::from_secs(3600);

/// Every reduction and reconciliation service, built over one repository.
pub struct Services {
    pub balances: Arc<ChainUpdateService<BalanceReducer>>,
    pub allowances: Arc<ChainUpdateService<AllowanceReducer>>,
    pub auctions: Arc<ChainUpdateService<AuctionReducer>>,
    pub pools: Arc<ChainUpdateService<PoolReducer>>,
    pub drift: Arc<BalanceDriftChecker>,
    pub tasks: TaskService,
    pub runner: TaskRunner,
    pub ignored: Arc<IgnoredOwners>,
}

impl Services {
    pub fn build(config: &Config, repo: Arc<Repository>, chain: Arc<dyn ChainQuery>) -> Self {
        let locks = KeyLocks::new();
        let ignored = Arc::new(IgnoredOwners::new(config.ignored_owners.iter().cloned()));
        let drift = Arc::new(BalanceDriftChecker::new(
            config.reconcile_confirmations,
            config.reconcile_skip_blocks,
        ));

        let balance_full = Arc::new(
            FullReduceService::new(BalanceReducer, repo.clone(), repo.clone(), locks.clone())
                .with_batch_size(config.reduce_batch_size)
                .with_checkpoint_interval(config.reduce_checkpoint_interval)
                .with_ignored(ignored.clone())
                .with_listener(drift.clone()),
        );
        let allowance_full = Arc::new(
            FullReduceService::new(AllowanceReducer, repo.clone(), repo.clone(), locks.clone())
                .with_batch_size(config.reduce_batch_size)
                .with_checkpoint_interval(config.reduce_checkpoint_interval)
                .with_ignored(ignored.clone()),
        );
        let auction_full = Arc::new(
            FullReduceService::new(AuctionReducer, repo.clone(), repo.clone(), locks.clone())
                .with_batch_size(config.reduce_batch_size)
                .with_checkpoint_interval(config.reduce_checkpoint_interval),
        );
        let pool_full = Arc::new(
            FullReduceService::new(PoolReducer, repo.clone(), repo.clone(), locks)
                .with_batch_size(config.reduce_batch_size)
                .with_checkpoint_interval(config.reduce_checkpoint_interval),
        );

        let allowances = Arc::new(
            ChainUpdateService::new(AllowanceReducer, allowance_full, repo.clone(), repo.clone())
                .with_engine(config.reduce_engine),
        );
        let balances = Arc::new(
            ChainUpdateService::new(
                BalanceReducer,
                balance_full.clone(),
                repo.clone(),
                repo.clone(),
            )
            .with_engine(config.reduce_engine)
            .with_max_concurrency(config.max_concurrent_reductions)
            .with_follower(allowances.clone()),
        );
        let auctions = Arc::new(
            ChainUpdateService::new(AuctionReducer, auction_full, repo.clone(), repo.clone())
                .with_engine(config.reduce_engine)
                .with_max_concurrency(config.max_concurrent_reductions),
        );
        let pools = Arc::new(
            ChainUpdateService::new(PoolReducer, pool_full, repo.clone(), repo.clone())
                .with_engine(config.reduce_engine)
                .with_max_concurrency(config.max_concurrent_reductions),
        );

        let tasks = TaskService::new(repo.clone());
        let runner = TaskRunner::new(repo.clone())
            .with_handler(Arc::new(BalanceReduceTaskHandler::new(
                balance_full.clone(),
                repo.clone(),
            )))
            .with_handler(Arc::new(DuplicatedLogRecordsTaskHandler::new(
                balance_full,
                repo.clone(),
                chain,
                tasks.clone(),
            )))
            .with_handler(Arc::new(IgnoredOwnersCleanup::new(ignored.clone(), repo)));

        Self {
            balances,
            allowances,
            auctions,
            pools,
            drift,
            tasks,
            runner,
            ignored,
        }
    }
}

pub struct App {
    pub config: Config,
    pub repo: Arc<Repository>,
    pub chain: Arc<dyn ChainQuery>,
    pub services: Services,
}

impl App {
    /// Open the database and connect the chain client named in `config`.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        let pool = init_db(&config.database_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.database_path))?;
        let repo = Arc::new(Repository::new(pool));
        let released = repo
            .release_stale_tasks()
            .await
            .context("failed to release stale tasks")?;
        if released > 0 {
            tracing::warn!(released, "Released tasks left running by a previous process");
        }
        let chain: Arc<dyn ChainQuery> = Arc::new(JsonRpcChain::new(config.chain_rpc_url.clone()));
        Ok(Self::new(config, repo, chain))
    }

    pub fn new(config: Config, repo: Arc<Repository>, chain: Arc<dyn ChainQuery>) -> Self {
        let services = Services::build(&config, repo.clone(), chain.clone());
        Self {
            config,
            repo,
            chain,
            services,
        }
    }

    pub fn router(&self) -> Router {
        api::create_router(AppState::new(
            self.repo.clone(),
            self.services.tasks.clone(),
        ))
    }

    pub fn scheduler(&self) -> Scheduler {
        let scheduler = Scheduler::new(
            self.services.tasks.clone(),
            self.services.runner.clone(),
            self.services.drift.clone(),
            self.chain.clone(),
            self.repo.clone(),
            self.config.reconcile_interval,
        );
        if self.services.ignored.is_empty() {
            scheduler
        } else {
            scheduler.with_cleanup_every(CLEANUP_EVERY)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::MockChain;
    use crate::db::repo::test_util::temp_repo;
    use crate::domain::{
        Address, BalanceId, BalancePayload, Decimal, LogEvent, LogStatus, OrderKey, TimeMs,
    };
    use std::collections::HashMap;

    fn config(extra: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = [
            ("DATABASE_PATH", "/unused"),
            ("CHAIN_RPC_URL", "http://localhost:8545"),
        ]
        .into_iter()
        .chain(extra.iter().copied())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Config::from_env_map(env).unwrap()
    }

    #[tokio::test]
    async fn test_balance_updates_feed_allowances_and_drift() {
        let (_dir, repo) = temp_repo().await;
        let app = App::new(config(&[]), Arc::new(repo), Arc::new(MockChain::new()));
        let id = BalanceId::new(Address::new("0xtoken"), Address::new("0xowner"));
        let event = |log: i32, payload: BalancePayload| LogEvent {
            id: format!("log-{}", log),
            key: id.clone(),
            status: LogStatus::Confirmed,
            order: OrderKey::new(5, log, 0),
            tx_hash: "0xtx".to_string(),
            timestamp: TimeMs::new(5000),
            payload,
        };

        app.services
            .balances
            .update(vec![
                event(0, BalancePayload::IncomeTransfer { value: Decimal::from(9u64) }),
                event(
                    1,
                    BalancePayload::Approval {
                        spender: Address::new("0xspender"),
                        value: Decimal::from(4u64),
                    },
                ),
            ])
            .await
            .unwrap();

        let balance = app.services.balances.snapshot(&id).await.unwrap().unwrap();
        assert_eq!(balance.data.amount, Decimal::from(9u64));
        let allowance = app.services.allowances.snapshot(&id).await.unwrap().unwrap();
        assert_eq!(allowance.data.allowance, Decimal::from(4u64));
        assert_eq!(app.services.drift.pending_len(), 1);
    }

    #[tokio::test]
    async fn test_ignored_owners_enable_cleanup() {
        let (_dir, repo) = temp_repo().await;
        let app = App::new(
            config(&[("IGNORED_OWNERS", "0xdead")]),
            Arc::new(repo),
            Arc::new(MockChain::new()),
        );
        assert_eq!(app.services.ignored.len(), 1);
    }
}
