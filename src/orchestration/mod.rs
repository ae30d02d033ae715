//! Administrative task surface and the reconciliation jobs it drives.

pub mod cleanup;
pub mod dedupe;
pub mod drift;
pub mod handler;
pub mod reduce_task;
pub mod runner;
pub mod scheduler;
pub mod service;
pub mod task;

pub use cleanup::IgnoredOwnersCleanup;
pub use dedupe::{DedupeParam, DuplicatedLogRecordsTaskHandler};
pub use drift::BalanceDriftChecker;
pub use handler::TaskHandler;
pub use reduce_task::{BalanceReduceTaskHandler, ReduceTaskParam};
pub use runner::{RunOutcome, TaskRunner};
pub use scheduler::Scheduler;
pub use service::TaskService;
pub use task::{Task, TaskStatus};

use crate::datasource::ChainQueryError;
use crate::reduce::ServiceError;
use crate::store::StoreError;
use thiserror::Error;

pub const BALANCE_REDUCE: &str = "BALANCE_REDUCE";
pub const DUPLICATED_LOG_RECORDS: &str = "DUPLICATED_LOG_RECORDS";
pub const IGNORED_OWNERS_CLEANUP: &str = "IGNORED_OWNERS_CLEANUP";

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task {task_type} {param} overlaps a queued or running task")]
    Overlapping { task_type: String, param: String },

    #[error("task {0} is already running")]
    AlreadyRunning(String),

    #[error("no handler for task type {0}")]
    UnknownTask(String),

    #[error("invalid task parameter {param:?}: {reason}")]
    InvalidParam { param: String, reason: String },

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Chain(#[from] ChainQueryError),
}

impl TaskError {
    pub fn invalid_param(param: &str, reason: impl ToString) -> Self {
        TaskError::InvalidParam {
            param: param.to_string(),
            reason: reason.to_string(),
        }
    }
}
