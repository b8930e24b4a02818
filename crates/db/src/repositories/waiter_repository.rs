use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::DbError;
use crate::models::{datetime_to_millis, WaiterRow, WaiterState};

/// Durable wait-notify registrations and buffered publish results.
///
/// A waiter row holds the serialized callback descriptor; the join table
/// indexes it by every correlation id it waits on. Published results are
/// buffered in their own table, so publish-before-wait still delivers.
#[derive(Clone)]
pub struct WaiterRepository {
    pool: SqlitePool,
}

impl WaiterRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn register(
        &self,
        uuid: Uuid,
        correlation_ids: &[String],
        callback_json: &str,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<(), DbError> {
        let now = datetime_to_millis(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO wait_callbacks (
                uuid, correlation_ids, callback, state, deadline, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(uuid.to_string())
        .bind(serde_json::to_string(correlation_ids)?)
        .bind(callback_json)
        .bind(WaiterState::Waiting.as_str())
        .bind(deadline.map(datetime_to_millis))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        for correlation_id in correlation_ids {
            sqlx::query(
                "INSERT INTO wait_callback_ids (waiter_uuid, correlation_id) VALUES (?, ?)",
            )
            .bind(uuid.to_string())
            .bind(correlation_id)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    pub async fn find_by_id(&self, uuid: Uuid) -> Result<Option<WaiterRow>, DbError> {
        let row: Option<WaiterRow> = sqlx::query_as("SELECT * FROM wait_callbacks WHERE uuid = ?")
            .bind(uuid.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn find_waiting_by_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<WaiterRow>, DbError> {
        let rows: Vec<WaiterRow> = sqlx::query_as(
            r#"
            SELECT w.* FROM wait_callbacks w
            JOIN wait_callback_ids i ON i.waiter_uuid = w.uuid
            WHERE i.correlation_id = ? AND w.state = ?
            "#,
        )
        .bind(correlation_id)
        .bind(WaiterState::Waiting.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Exactly-once claim of a waiter for delivery.
    pub async fn claim(&self, uuid: Uuid) -> Result<bool, DbError> {
        self.transition(uuid, WaiterState::Waiting, WaiterState::Processing)
            .await
    }

    pub async fn mark_done(&self, uuid: Uuid) -> Result<bool, DbError> {
        self.transition(uuid, WaiterState::Processing, WaiterState::Done)
            .await
    }

    pub async fn mark_timed_out(&self, uuid: Uuid) -> Result<bool, DbError> {
        self.transition(uuid, WaiterState::Processing, WaiterState::TimedOut)
            .await
    }

    async fn transition(
        &self,
        uuid: Uuid,
        expected: WaiterState,
        to: WaiterState,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            "UPDATE wait_callbacks SET state = ?, updated_at = ? WHERE uuid = ? AND state = ?",
        )
        .bind(to.as_str())
        .bind(datetime_to_millis(Utc::now()))
        .bind(uuid.to_string())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<WaiterRow>, DbError> {
        let rows: Vec<WaiterRow> = sqlx::query_as(
            "SELECT * FROM wait_callbacks \
             WHERE state = ? AND deadline IS NOT NULL AND deadline <= ?",
        )
        .bind(WaiterState::Waiting.as_str())
        .bind(datetime_to_millis(now))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Buffer a published result. First publish per correlation id wins;
    /// returns false on a duplicate.
    pub async fn publish_result(
        &self,
        correlation_id: &str,
        payload_json: &str,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO notify_results (correlation_id, payload, published_at) \
             VALUES (?, ?, ?)",
        )
        .bind(correlation_id)
        .bind(payload_json)
        .bind(datetime_to_millis(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Buffered results for the given correlation ids, keyed by id.
    pub async fn collect_results(
        &self,
        correlation_ids: &[String],
    ) -> Result<HashMap<String, String>, DbError> {
        let mut results = HashMap::new();
        for correlation_id in correlation_ids {
            let payload: Option<(String,)> =
                sqlx::query_as("SELECT payload FROM notify_results WHERE correlation_id = ?")
                    .bind(correlation_id)
                    .fetch_optional(&self.pool)
                    .await?;
            if let Some((payload,)) = payload {
                results.insert(correlation_id.clone(), payload);
            }
        }
        Ok(results)
    }
}
