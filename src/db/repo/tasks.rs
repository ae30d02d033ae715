//! Task records and their resumable cursors.

use std::str::FromStr;

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::{now_ms, Repository};
use crate::domain::TimeMs;
use crate::orchestration::{Task, TaskStatus};
use crate::store::StoreError;

const TASK_COLUMNS: &str =
    "id, task_type, param, state, running, last_status, last_error, created_at, updated_at";

fn task_from_row(row: &SqliteRow) -> Result<Task, StoreError> {
    let id: String = row.get("id");
    let status: String = row.get("last_status");
    let running: i64 = row.get("running");
    Ok(Task {
        id: Uuid::parse_str(&id).map_err(|e| StoreError::Corrupt(e.to_string()))?,
        task_type: row.get("task_type"),
        param: row.get("param"),
        state: row.get("state"),
        running: running != 0,
        last_status: TaskStatus::from_str(&status).map_err(StoreError::Corrupt)?,
        last_error: row.get("last_error"),
        created_at: TimeMs::new(row.get("created_at")),
        updated_at: TimeMs::new(row.get("updated_at")),
    })
}

impl Repository {
    /// Insert a task unless one with the same `(task_type, param)` exists.
    pub async fn insert_task(&self, task: &Task) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO tasks (
                id, task_type, param, state, running, last_status, last_error,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(task_type, param) DO NOTHING
            "#,
        )
        .bind(task.id.to_string())
        .bind(task.task_type.as_str())
        .bind(task.param.as_str())
        .bind(task.state.as_deref())
        .bind(task.running as i64)
        .bind(task.last_status.as_str())
        .bind(task.last_error.as_deref())
        .bind(task.created_at.as_i64())
        .bind(task.updated_at.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StoreError> {
        let sql = format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    pub async fn find_task(&self, task_type: &str, param: &str) -> Result<Option<Task>, StoreError> {
        let sql = format!(
            "SELECT {} FROM tasks WHERE task_type = ? AND param = ?",
            TASK_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(task_type)
            .bind(param)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    /// All tasks, optionally of one type, oldest first.
    pub async fn list_tasks(&self, task_type: Option<&str>) -> Result<Vec<Task>, StoreError> {
        let sql = format!(
            "SELECT {} FROM tasks WHERE (?1 IS NULL OR task_type = ?1) ORDER BY created_at, id",
            TASK_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(task_type)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(task_from_row).collect()
    }

    /// Idle tasks that still owe work: never finished, or failed last time.
    pub async fn find_runnable_tasks(&self, limit: usize) -> Result<Vec<Task>, StoreError> {
        let sql = format!(
            r#"
            SELECT {} FROM tasks
            WHERE running = 0 AND last_status != 'COMPLETED'
            ORDER BY created_at, id
            LIMIT ?
            "#,
            TASK_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(task_from_row).collect()
    }

    /// Claim a task for running. False if another runner holds it.
    pub async fn mark_task_running(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE tasks SET running = 1, updated_at = ? WHERE id = ? AND running = 0",
        )
        .bind(now_ms())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn save_task_state(&self, id: Uuid, state: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE tasks SET state = ?, updated_at = ? WHERE id = ?")
            .bind(state)
            .bind(now_ms())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn finish_task(
        &self,
        id: Uuid,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE tasks SET running = 0, last_status = ?, last_error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(now_ms())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Start a task over: clear its cursor and status.
    pub async fn reset_task(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE tasks SET state = NULL, running = 0, last_status = 'NONE',
                last_error = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now_ms())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Clear `running` on tasks left claimed by a process that died.
    pub async fn release_stale_tasks(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE tasks SET running = 0 WHERE running = 1")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
