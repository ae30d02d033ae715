//! Repository layer for database operations.
//!
//! `Repository` implements the `store` traits for every entity kind.
//! Methods are organized across submodules:
//! - `snapshots.rs` - materialized state per (kind, key)
//! - `events.rs` - log history, dedupe and status updates
//! - `tasks.rs` - administrative task records and cursors

mod events;
mod snapshots;
mod tasks;

use crate::domain::{EntityKey, OrderKey};
use crate::store::StoreError;
use sqlx::sqlite::SqlitePool;

/// Repository for database operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cheap connectivity probe for readiness checks.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn owner_column<K: EntityKey>(key: &K) -> Option<String> {
    key.owner().map(|owner| owner.as_str().to_string())
}

fn order_from_columns(
    block: Option<i64>,
    log: Option<i32>,
    minor: Option<i32>,
) -> Result<Option<OrderKey>, StoreError> {
    match (block, log, minor) {
        (Some(b), Some(l), Some(m)) => Ok(Some(OrderKey::new(b, l, m))),
        (None, None, None) => Ok(None),
        _ => Err(StoreError::Corrupt(
            "partially set last order columns".to_string(),
        )),
    }
}
