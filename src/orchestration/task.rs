//! Administrative task records.

use crate::domain::TimeMs;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Never finished a run.
    None,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::None => "NONE",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(TaskStatus::None),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "ERROR" => Ok(TaskStatus::Error),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// A resumable administrative job. `state` is the last persisted cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: String,
    pub param: String,
    pub state: Option<String>,
    pub running: bool,
    pub last_status: TaskStatus,
    pub last_error: Option<String>,
    pub created_at: TimeMs,
    pub updated_at: TimeMs,
}

impl Task {
    pub fn new(task_type: impl Into<String>, param: impl Into<String>) -> Self {
        let now = TimeMs::now();
        Self {
            id: Uuid::new_v4(),
            task_type: task_type.into(),
            param: param.into(),
            state: None,
            running: false,
            last_status: TaskStatus::None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Still owes work: running now, or not yet completed.
    pub fn is_active(&self) -> bool {
        self.running || self.last_status != TaskStatus::Completed
    }
}
