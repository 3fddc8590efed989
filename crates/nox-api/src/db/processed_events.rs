//! Processed payment event persistence.
//!
//! Operates on the `processed_events` table. Rows are immutable once
//! written; the primary key on `transaction_id` decides which of several
//! concurrent deliveries commits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nox_core::{
    InsertOutcome, ProcessedEvent, ProcessedEventStore, StoreError, Timestamp, TransactionId,
};
use sqlx::PgPool;

/// Maximum rows returned from a range query.
const LIST_MAX_ROWS: i64 = 50_000;

/// [`ProcessedEventStore`] over Postgres.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcessedEventStore for PgEventStore {
    async fn insert(&self, event: &ProcessedEvent) -> Result<InsertOutcome, StoreError> {
        let result = sqlx::query(
            "INSERT INTO processed_events (transaction_id, payload, recorded_at)
             VALUES ($1, $2, $3)",
        )
        .bind(event.transaction_id.as_str())
        .bind(&event.payload)
        .bind(event.recorded_at.as_datetime())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Ok(InsertOutcome::Duplicate)
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn find(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<ProcessedEvent>, StoreError> {
        let row = sqlx::query_as::<_, ProcessedEventRow>(
            "SELECT transaction_id, payload, recorded_at
             FROM processed_events WHERE transaction_id = $1",
        )
        .bind(transaction_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.map(ProcessedEventRow::into_record).transpose()
    }

    async fn list_recorded_between(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<ProcessedEvent>, StoreError> {
        let rows = sqlx::query_as::<_, ProcessedEventRow>(
            "SELECT transaction_id, payload, recorded_at
             FROM processed_events
             WHERE recorded_at >= $1 AND recorded_at <= $2
             ORDER BY recorded_at ASC, transaction_id ASC
             LIMIT $3",
        )
        .bind(from.as_datetime())
        .bind(to.as_datetime())
        .bind(LIST_MAX_ROWS)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        if rows.len() as i64 == LIST_MAX_ROWS {
            tracing::warn!(
                limit = LIST_MAX_ROWS,
                from = %from,
                to = %to,
                "processed event listing truncated"
            );
        }

        rows.into_iter().map(ProcessedEventRow::into_record).collect()
    }
}

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

#[derive(sqlx::FromRow)]
struct ProcessedEventRow {
    transaction_id: String,
    payload: serde_json::Value,
    recorded_at: DateTime<Utc>,
}

impl ProcessedEventRow {
    fn into_record(self) -> Result<ProcessedEvent, StoreError> {
        let transaction_id =
            TransactionId::new(self.transaction_id.clone()).map_err(|e| StoreError::Corrupt {
                key: self.transaction_id.clone(),
                reason: e.to_string(),
            })?;
        Ok(ProcessedEvent {
            transaction_id,
            payload: self.payload,
            recorded_at: Timestamp::from_utc(self.recorded_at),
        })
    }
}
