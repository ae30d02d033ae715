//! Scoped balance re-derivation.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{TaskError, TaskHandler, BALANCE_REDUCE};
use crate::db::Repository;
use crate::domain::{Address, BalanceId};
use crate::engine::BalanceReducer;
use crate::reduce::FullReduceService;
use crate::store::EventFilter;

/// Scope of a balance reduce. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReduceTaskParam {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Address>,
}

impl ReduceTaskParam {
    pub fn new(token: Option<Address>, owner: Option<Address>) -> Self {
        Self { token, owner }
    }

    pub fn parse(raw: &str) -> Result<Self, TaskError> {
        serde_json::from_str(raw).map_err(|e| TaskError::invalid_param(raw, e))
    }

    pub fn to_param(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Two scopes overlap when every field is unset on either side or equal.
    pub fn overlaps(&self, other: &Self) -> bool {
        fn field(a: &Option<Address>, b: &Option<Address>) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
        }
        field(&self.token, &other.token) && field(&self.owner, &other.owner)
    }

    pub fn filter(&self) -> EventFilter<BalanceId> {
        let mut filter = match &self.token {
            Some(token) => EventFilter::with_prefix(BalanceId::token_prefix(token)),
            None => EventFilter::default(),
        };
        if let Some(owner) = &self.owner {
            filter = filter.owned_by(owner.clone());
        }
        filter
    }
}

pub struct BalanceReduceTaskHandler {
    full: Arc<FullReduceService<BalanceReducer>>,
    repo: Arc<Repository>,
}

impl BalanceReduceTaskHandler {
    pub fn new(full: Arc<FullReduceService<BalanceReducer>>, repo: Arc<Repository>) -> Self {
        Self { full, repo }
    }
}

#[async_trait]
impl TaskHandler for BalanceReduceTaskHandler {
    fn task_type(&self) -> &'static str {
        BALANCE_REDUCE
    }

    async fn is_able_to_run(&self, param: &str) -> Result<bool, TaskError> {
        let scope = ReduceTaskParam::parse(param)?;
        for task in self.repo.list_tasks(Some(BALANCE_REDUCE)).await? {
            if task.param == param || !task.running {
                continue;
            }
            if ReduceTaskParam::parse(&task.param)?.overlaps(&scope) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn run_long_task(
        &self,
        from: Option<String>,
        param: String,
    ) -> BoxStream<'_, Result<String, TaskError>> {
        let scope = match ReduceTaskParam::parse(&param) {
            Ok(scope) => scope,
            Err(err) => return stream::once(async move { Err(err) }).boxed(),
        };
        info!(param = %param, from = ?from, "Balance reduce task started");

        if let (Some(token), Some(owner)) = (scope.token.clone(), scope.owner.clone()) {
            let key = BalanceId::new(token, owner);
            return stream::once(async move {
                self.full.reduce_key(&key).await?;
                Ok::<_, TaskError>(key.to_string())
            })
            .boxed();
        }

        self.full
            .reduce_scope(scope.filter(), from)
            .map(|cursor| cursor.map_err(TaskError::from))
            .boxed()
    }
}
