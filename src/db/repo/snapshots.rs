//! Snapshot persistence, one row per (kind, key).

use async_trait::async_trait;
use sqlx::Row;

use super::{now_ms, order_from_columns, owner_column, Repository};
use crate::domain::{Address, EntityKey, EntityKind, Mark, Snapshot, SnapshotOf};
use crate::store::{SnapshotStore, StoreError};

#[async_trait]
impl<E: EntityKind> SnapshotStore<E> for Repository {
    async fn get(&self, key: &E::Key) -> Result<Option<SnapshotOf<E>>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT data, mark, last_block, last_log, last_minor
            FROM snapshots
            WHERE kind = ? AND entity_key = ?
            "#,
        )
        .bind(E::KIND)
        .bind(key.to_key_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let data: String = row.get("data");
        Ok(Some(Snapshot {
            key: key.clone(),
            data: serde_json::from_str(&data)?,
            mark: Mark(row.get("mark")),
            last_order: order_from_columns(
                row.get("last_block"),
                row.get("last_log"),
                row.get("last_minor"),
            )?,
        }))
    }

    async fn put(&self, snapshot: &SnapshotOf<E>) -> Result<(), StoreError> {
        let data = serde_json::to_string(&snapshot.data)?;
        sqlx::query(
            r#"
            INSERT INTO snapshots (
                kind, entity_key, owner, data, mark, last_block, last_log, last_minor, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(kind, entity_key) DO UPDATE SET
                owner = excluded.owner,
                data = excluded.data,
                mark = excluded.mark,
                last_block = excluded.last_block,
                last_log = excluded.last_log,
                last_minor = excluded.last_minor,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(E::KIND)
        .bind(snapshot.key.to_key_string())
        .bind(owner_column(&snapshot.key))
        .bind(data)
        .bind(snapshot.mark.as_i64())
        .bind(snapshot.last_order.map(|o| o.block_number))
        .bind(snapshot.last_order.map(|o| o.log_index))
        .bind(snapshot.last_order.map(|o| o.minor_log_index))
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &E::Key) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM snapshots WHERE kind = ? AND entity_key = ?")
            .bind(E::KIND)
            .bind(key.to_key_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_owner(&self, owner: &Address) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM snapshots WHERE kind = ? AND owner = ?")
            .bind(E::KIND)
            .bind(owner.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
