//! Purge of entities and history owned by ignored addresses.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::info;

use super::{TaskError, TaskHandler, IGNORED_OWNERS_CLEANUP};
use crate::db::Repository;
use crate::domain::{Address, AllowanceKind, BalanceKind};
use crate::reduce::IgnoredOwners;
use crate::store::{EventLog, SnapshotStore};

pub struct IgnoredOwnersCleanup {
    ignored: Arc<IgnoredOwners>,
    repo: Arc<Repository>,
}

impl IgnoredOwnersCleanup {
    pub fn new(ignored: Arc<IgnoredOwners>, repo: Arc<Repository>) -> Self {
        Self { ignored, repo }
    }

    /// Owners still to purge, in order, after the `from` cursor.
    fn remaining(&self, from: Option<&str>) -> Vec<Address> {
        let mut owners: Vec<Address> = self.ignored.iter().cloned().collect();
        owners.sort();
        owners.retain(|owner| from.map_or(true, |from| owner.as_str() > from));
        owners
    }

    async fn purge(&self, owner: &Address) -> Result<(), TaskError> {
        let repo = self.repo.as_ref();
        let balances = SnapshotStore::<BalanceKind>::delete_by_owner(repo, owner).await?;
        let allowances = SnapshotStore::<AllowanceKind>::delete_by_owner(repo, owner).await?;
        // Allowances fold the balance stream, so one delete covers both.
        let events = EventLog::<BalanceKind>::delete_events_by_owner(repo, owner).await?;
        info!(
            owner = %owner,
            balances,
            allowances,
            events,
            "Ignored owner purged"
        );
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for IgnoredOwnersCleanup {
    fn task_type(&self) -> &'static str {
        IGNORED_OWNERS_CLEANUP
    }

    async fn is_able_to_run(&self, _param: &str) -> Result<bool, TaskError> {
        Ok(true)
    }

    fn run_long_task(
        &self,
        from: Option<String>,
        _param: String,
    ) -> BoxStream<'_, Result<String, TaskError>> {
        let owners = self.remaining(from.as_deref());
        stream::iter(owners)
            .then(move |owner| async move {
                self.purge(&owner).await?;
                Ok::<_, TaskError>(owner.to_string())
            })
            .boxed()
    }
}
