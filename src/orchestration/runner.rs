use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, error, info};

use super::{Task, TaskError, TaskHandler, TaskStatus};
use crate::db::Repository;

/// What one attempt at a task did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed(String),
    /// An overlapping task is running; try again later.
    Deferred,
    /// Another runner claimed the task first.
    Claimed,
}

/// Drives tasks through their handlers, persisting every cursor.
#[derive(Clone)]
pub struct TaskRunner {
    repo: Arc<Repository>,
    handlers: HashMap<&'static str, Arc<dyn TaskHandler>>,
}

impl TaskRunner {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self {
            repo,
            handlers: HashMap::new(),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(handler.task_type(), handler);
        self
    }

    /// Run one task to completion or failure, resuming from its saved cursor.
    pub async fn run(&self, task: &Task) -> Result<RunOutcome, TaskError> {
        let repo = &self.repo;
        let handler = self
            .handlers
            .get(task.task_type.as_str())
            .ok_or_else(|| TaskError::UnknownTask(task.task_type.clone()))?;

        if !handler.is_able_to_run(&task.param).await? {
            debug!(id = %task.id, task_type = %task.task_type, "Task deferred by overlap");
            return Ok(RunOutcome::Deferred);
        }
        if !repo.mark_task_running(task.id).await? {
            return Ok(RunOutcome::Claimed);
        }
        info!(
            id = %task.id,
            task_type = %task.task_type,
            param = %task.param,
            from = ?task.state,
            "Task running"
        );

        let result = {
            let mut cursors = handler.run_long_task(task.state.clone(), task.param.clone());
            let mut result = Ok(());
            while let Some(cursor) = cursors.next().await {
                let saved: Result<(), TaskError> = match cursor {
                    Ok(cursor) => repo.save_task_state(task.id, &cursor).await.map_err(Into::into),
                    Err(err) => Err(err),
                };
                if let Err(err) = saved {
                    result = Err(err);
                    break;
                }
            }
            result
        };

        match result {
            Ok(()) => {
                repo.finish_task(task.id, TaskStatus::Completed, None).await?;
                info!(id = %task.id, task_type = %task.task_type, "Task completed");
                Ok(RunOutcome::Completed)
            }
            Err(err) => {
                let message = err.to_string();
                error!(id = %task.id, task_type = %task.task_type, error = %message, "Task failed");
                repo.finish_task(task.id, TaskStatus::Error, Some(&message))
                    .await?;
                Ok(RunOutcome::Failed(message))
            }
        }
    }

    /// Run up to `limit` idle tasks that still owe work, oldest first.
    pub async fn run_pending(&self, limit: usize) -> Result<Vec<RunOutcome>, TaskError> {
        let tasks = self.repo.find_runnable_tasks(limit).await?;
        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in &tasks {
            outcomes.push(self.run(task).await?);
        }
        Ok(outcomes)
    }
}
