use chrono::Utc;
use sqlx::sqlite::SqlitePool;

use crate::error::Result;

/// Append-only log of inbound deliveries, used for audit and duplicate
/// suppression. Rows are never mutated except to mark them processed.
#[derive(Clone)]
pub struct WebhookEventStore {
    pool: SqlitePool,
}

/// Result of recording a delivery.
#[derive(Debug, PartialEq, Eq)]
pub enum RecordOutcome {
    /// First time this delivery id has been seen.
    Recorded { event_id: i64 },
    /// The sender retried a delivery we already have; skip processing.
    Duplicate,
}

impl WebhookEventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a delivery unconditionally, independent of whether it will
    /// trigger a review. The unique delivery_id constraint is the
    /// authoritative duplicate check, so concurrent retries of the same
    /// delivery cannot both proceed.
    pub async fn record(
        &self,
        delivery_id: &str,
        event_type: &str,
        action: Option<&str>,
        payload: &[u8],
    ) -> Result<RecordOutcome> {
        let result = sqlx::query(
            "INSERT INTO webhook_events (delivery_id, event_type, action, payload, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (delivery_id) DO NOTHING",
        )
        .bind(delivery_id)
        .bind(event_type)
        .bind(action)
        .bind(String::from_utf8_lossy(payload).as_ref())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(RecordOutcome::Duplicate);
        }
        Ok(RecordOutcome::Recorded {
            event_id: result.last_insert_rowid(),
        })
    }

    /// Flip the processed flag once intake handling for the event is done.
    pub async fn mark_processed(&self, event_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE webhook_events SET processed = 1, processed_at = ? WHERE id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
