use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;
use windlass_core::{BarrierInstance, BarrierPosition, BarrierState};

use crate::error::DbError;
use crate::models::{datetime_to_millis, BarrierRow};

#[derive(Clone)]
pub struct BarrierRepository {
    pool: SqlitePool,
}

impl BarrierRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, barrier: &BarrierInstance) -> Result<(), DbError> {
        let row = BarrierRow::try_from(barrier)?;

        sqlx::query(
            r#"
            INSERT INTO barrier_instances (
                uuid, identifier, group_id, plan_execution_id, state,
                expires_at, positions, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.uuid)
        .bind(&row.identifier)
        .bind(&row.group_id)
        .bind(&row.plan_execution_id)
        .bind(&row.state)
        .bind(row.expires_at)
        .bind(&row.positions)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find_by_group(
        &self,
        plan_execution_id: Uuid,
        group_id: &str,
    ) -> Result<Option<BarrierInstance>, DbError> {
        let row: Option<BarrierRow> = sqlx::query_as(
            "SELECT * FROM barrier_instances WHERE plan_execution_id = ? AND group_id = ?",
        )
        .bind(plan_execution_id.to_string())
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(BarrierRow::into_domain).transpose()
    }

    /// Position writes are serialized by the barrier group's advisory lock.
    pub async fn save_positions(
        &self,
        uuid: Uuid,
        positions: &[BarrierPosition],
    ) -> Result<(), DbError> {
        sqlx::query("UPDATE barrier_instances SET positions = ?, updated_at = ? WHERE uuid = ?")
            .bind(serde_json::to_string(positions)?)
            .bind(datetime_to_millis(Utc::now()))
            .bind(uuid.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// One-shot state flip; false when the barrier already left `expected`.
    pub async fn update_state(
        &self,
        uuid: Uuid,
        expected: BarrierState,
        to: BarrierState,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            "UPDATE barrier_instances SET state = ?, updated_at = ? WHERE uuid = ? AND state = ?",
        )
        .bind(to.as_str())
        .bind(datetime_to_millis(Utc::now()))
        .bind(uuid.to_string())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn find_standing_by_plan(
        &self,
        plan_execution_id: Uuid,
    ) -> Result<Vec<BarrierInstance>, DbError> {
        let rows: Vec<BarrierRow> = sqlx::query_as(
            "SELECT * FROM barrier_instances WHERE plan_execution_id = ? AND state = ?",
        )
        .bind(plan_execution_id.to_string())
        .bind(BarrierState::Standing.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BarrierRow::into_domain).collect()
    }

    pub async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<BarrierInstance>, DbError> {
        let rows: Vec<BarrierRow> = sqlx::query_as(
            "SELECT * FROM barrier_instances WHERE state = ? AND expires_at <= ?",
        )
        .bind(BarrierState::Standing.as_str())
        .bind(datetime_to_millis(now))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BarrierRow::into_domain).collect()
    }
}
