//! Log history: append with dedupe, status updates and scoped scans.
//!
//! Records are keyed by `(stream, entity_key, order)`. Kinds that fold the
//! same stream (balances and allowances) share rows.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};

use super::{now_ms, owner_column, Repository};
use crate::domain::{
    Address, EntityKey, EntityKind, EventOf, LogEvent, LogStatus, OrderKey, TimeMs,
};
use crate::store::{EventFilter, EventLog, EventPosition, EventSource, RecordOutcome, StoreError};

const EVENT_COLUMNS: &str = "entity_key, log_id, block_number, log_index, minor_log_index, \
                             tx_hash, status, timestamp_ms, payload";

fn event_from_row<E: EntityKind>(row: &SqliteRow) -> Result<EventOf<E>, StoreError> {
    let key: String = row.get("entity_key");
    let status: String = row.get("status");
    let payload: String = row.get("payload");
    Ok(LogEvent {
        id: row.get("log_id"),
        key: E::Key::parse_key(&key)?,
        status: LogStatus::from_str(&status).map_err(StoreError::Corrupt)?,
        order: OrderKey::new(
            row.get("block_number"),
            row.get("log_index"),
            row.get("minor_log_index"),
        ),
        tx_hash: row.get("tx_hash"),
        timestamp: TimeMs::new(row.get("timestamp_ms")),
        payload: serde_json::from_str(&payload)?,
    })
}

fn push_filter<K: EntityKey>(qb: &mut QueryBuilder<'_, Sqlite>, filter: &EventFilter<K>) {
    if let Some(key) = &filter.key {
        qb.push(" AND entity_key = ").push_bind(key.to_key_string());
    }
    if let Some(prefix) = &filter.key_prefix {
        // substr comparison keeps LIKE wildcards in keys harmless
        qb.push(" AND substr(entity_key, 1, ")
            .push_bind(prefix.len() as i64)
            .push(") = ")
            .push_bind(prefix.clone());
    }
    if let Some(mark) = filter.after_mark {
        qb.push(" AND block_number > ").push_bind(mark.as_i64());
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(owner) = &filter.owner {
        qb.push(" AND owner = ").push_bind(owner.as_str().to_string());
    }
}

impl Repository {
    /// Insert events, discarding any whose `(stream, key, order)` already exists.
    ///
    /// Returns the number of newly inserted rows.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn append_events<E: EntityKind>(
        &self,
        events: &[EventOf<E>],
    ) -> Result<usize, StoreError> {
        if events.is_empty() {
            return Ok(0);
        }

        let now = now_ms();
        let mut inserted = 0usize;
        let mut tx = self.pool.begin().await?;

        for event in events {
            let payload = serde_json::to_string(&event.payload)?;
            let result = sqlx::query(
                r#"
                INSERT INTO log_events (
                    stream, entity_key, owner, log_id, block_number, log_index,
                    minor_log_index, tx_hash, status, timestamp_ms, payload,
                    created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(stream, entity_key, block_number, log_index, minor_log_index)
                DO NOTHING
                "#,
            )
            .bind(E::STREAM)
            .bind(event.key.to_key_string())
            .bind(owner_column(&event.key))
            .bind(event.id.as_str())
            .bind(event.order.block_number)
            .bind(event.order.log_index)
            .bind(event.order.minor_log_index)
            .bind(event.tx_hash.as_str())
            .bind(event.status.as_str())
            .bind(event.timestamp.as_i64())
            .bind(payload)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Overwrite the stored status of one log record.
    ///
    /// Returns false when no such record exists.
    pub async fn update_event_status<E: EntityKind>(
        &self,
        key: &E::Key,
        order: &OrderKey,
        status: LogStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE log_events SET status = ?, updated_at = ?
            WHERE stream = ? AND entity_key = ?
              AND block_number = ? AND log_index = ? AND minor_log_index = ?
            "#,
        )
        .bind(status.as_str())
        .bind(now_ms())
        .bind(E::STREAM)
        .bind(key.to_key_string())
        .bind(order.block_number)
        .bind(order.log_index)
        .bind(order.minor_log_index)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn stored_status<E: EntityKind>(
        &self,
        key: &E::Key,
        order: &OrderKey,
    ) -> Result<Option<LogStatus>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT status FROM log_events
            WHERE stream = ? AND entity_key = ?
              AND block_number = ? AND log_index = ? AND minor_log_index = ?
            "#,
        )
        .bind(E::STREAM)
        .bind(key.to_key_string())
        .bind(order.block_number)
        .bind(order.log_index)
        .bind(order.minor_log_index)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let status: String = r.get("status");
            LogStatus::from_str(&status).map_err(StoreError::Corrupt)
        })
        .transpose()
    }
}

#[async_trait]
impl<E: EntityKind> EventSource<E> for Repository {
    async fn fetch_batch(
        &self,
        filter: &EventFilter<E::Key>,
        after: Option<&EventPosition>,
        limit: usize,
    ) -> Result<Vec<EventOf<E>>, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT ");
        qb.push(EVENT_COLUMNS)
            .push(" FROM log_events WHERE stream = ")
            .push_bind(E::STREAM);
        push_filter(&mut qb, filter);
        if let Some(pos) = after {
            qb.push(" AND (entity_key > ")
                .push_bind(pos.key.clone())
                .push(" OR (entity_key = ")
                .push_bind(pos.key.clone())
                .push(" AND (block_number, log_index, minor_log_index) > (")
                .push_bind(pos.order.block_number)
                .push(", ")
                .push_bind(pos.order.log_index)
                .push(", ")
                .push_bind(pos.order.minor_log_index)
                .push(")))");
        }
        qb.push(" ORDER BY entity_key, block_number, log_index, minor_log_index LIMIT ")
            .push_bind(limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(event_from_row::<E>).collect()
    }

    async fn fetch_keys(
        &self,
        filter: &EventFilter<E::Key>,
        after_key: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let mut qb =
            QueryBuilder::<Sqlite>::new("SELECT DISTINCT entity_key FROM log_events WHERE stream = ");
        qb.push_bind(E::STREAM);
        push_filter(&mut qb, filter);
        if let Some(after) = after_key {
            qb.push(" AND entity_key > ").push_bind(after.to_string());
        }
        qb.push(" ORDER BY entity_key LIMIT ").push_bind(limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(|r| r.get("entity_key")).collect())
    }
}

#[async_trait]
impl<E: EntityKind> EventLog<E> for Repository {
    async fn record(&self, event: &EventOf<E>) -> Result<RecordOutcome, StoreError> {
        if self.append_events::<E>(std::slice::from_ref(event)).await? > 0 {
            return Ok(RecordOutcome::Inserted);
        }
        match self.stored_status::<E>(&event.key, &event.order).await? {
            Some(previous) if previous != event.status => {
                self.update_event_status::<E>(&event.key, &event.order, event.status)
                    .await?;
                Ok(RecordOutcome::StatusChanged { previous })
            }
            Some(_) => Ok(RecordOutcome::Duplicate),
            // Deleted between the insert attempt and the lookup.
            None => Err(StoreError::Corrupt(format!(
                "log record {} at {} vanished",
                event.key, event.order
            ))),
        }
    }

    async fn find_possible_duplicates(
        &self,
        event: &EventOf<E>,
    ) -> Result<Vec<EventOf<E>>, StoreError> {
        let sql = format!(
            r#"
            SELECT {}
            FROM log_events
            WHERE stream = ? AND entity_key = ?
              AND block_number = ? AND log_index = ? AND tx_hash = ?
              AND minor_log_index != ?
            ORDER BY minor_log_index
            "#,
            EVENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(E::STREAM)
            .bind(event.key.to_key_string())
            .bind(event.order.block_number)
            .bind(event.order.log_index)
            .bind(event.tx_hash.as_str())
            .bind(event.order.minor_log_index)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(event_from_row::<E>).collect()
    }

    async fn delete_events(&self, key: &E::Key, orders: &[OrderKey]) -> Result<u64, StoreError> {
        let mut removed = 0u64;
        let mut tx = self.pool.begin().await?;
        for order in orders {
            let result = sqlx::query(
                r#"
                DELETE FROM log_events
                WHERE stream = ? AND entity_key = ?
                  AND block_number = ? AND log_index = ? AND minor_log_index = ?
                "#,
            )
            .bind(E::STREAM)
            .bind(key.to_key_string())
            .bind(order.block_number)
            .bind(order.log_index)
            .bind(order.minor_log_index)
            .execute(&mut *tx)
            .await?;
            removed += result.rows_affected();
        }
        tx.commit().await?;
        Ok(removed)
    }

    async fn delete_events_by_owner(&self, owner: &Address) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM log_events WHERE stream = ? AND owner = ?")
            .bind(E::STREAM)
            .bind(owner.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
