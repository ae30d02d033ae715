//! Task submission with overlap checks.

use std::sync::Arc;

use tracing::info;

use super::{
    DedupeParam, ReduceTaskParam, Task, TaskError, TaskStatus, BALANCE_REDUCE,
    DUPLICATED_LOG_RECORDS, IGNORED_OWNERS_CLEANUP,
};
use crate::db::Repository;
use crate::domain::Address;
use crate::store::StoreError;

#[derive(Clone)]
pub struct TaskService {
    repo: Arc<Repository>,
}

impl TaskService {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    /// Queue a full reduce over balances of `token` and/or `owner`.
    ///
    /// Refuses while a queued or running reduce task covers an overlapping
    /// scope. Resubmitting the same scope returns the existing task, or
    /// restarts it from scratch when `force` is set.
    pub async fn create_reduce_task(
        &self,
        token: Option<Address>,
        owner: Option<Address>,
        force: bool,
    ) -> Result<Task, TaskError> {
        let scope = ReduceTaskParam::new(token, owner);
        let param = scope.to_param();

        for task in self.repo.list_tasks(Some(BALANCE_REDUCE)).await? {
            let queued = task.running || task.last_status == TaskStatus::None;
            if task.param == param || !queued {
                continue;
            }
            if ReduceTaskParam::parse(&task.param)?.overlaps(&scope) {
                return Err(TaskError::Overlapping {
                    task_type: BALANCE_REDUCE.to_string(),
                    param,
                });
            }
        }
        self.submit(BALANCE_REDUCE, param, force).await
    }

    pub async fn create_deduplicate_task(&self, update: bool, force: bool) -> Result<Task, TaskError> {
        let param = DedupeParam { update }.to_param();
        self.submit(DUPLICATED_LOG_RECORDS, param, force).await
    }

    pub async fn create_cleanup_task(&self, force: bool) -> Result<Task, TaskError> {
        self.submit(IGNORED_OWNERS_CLEANUP, "{}".to_string(), force)
            .await
    }

    pub async fn list_tasks(&self, task_type: Option<&str>) -> Result<Vec<Task>, TaskError> {
        Ok(self.repo.list_tasks(task_type).await?)
    }

    async fn submit(&self, task_type: &str, param: String, force: bool) -> Result<Task, TaskError> {
        if let Some(existing) = self.repo.find_task(task_type, &param).await? {
            if !force {
                return Ok(existing);
            }
            if existing.running {
                return Err(TaskError::AlreadyRunning(existing.id.to_string()));
            }
            self.repo.reset_task(existing.id).await?;
            info!(task_type, param = %param, id = %existing.id, "Task restarted");
            return self.load(existing.id).await;
        }

        let task = Task::new(task_type, param);
        if self.repo.insert_task(&task).await? {
            info!(task_type, param = %task.param, id = %task.id, "Task created");
            return Ok(task);
        }
        // Lost a race with a concurrent submit of the same task.
        self.repo
            .find_task(task_type, &task.param)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("task {} vanished", task.id)).into())
    }

    async fn load(&self, id: uuid::Uuid) -> Result<Task, TaskError> {
        self.repo
            .get_task(id)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("task {} vanished", id)).into())
    }
}
