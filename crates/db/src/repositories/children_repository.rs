use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;
use windlass_core::ConcurrentChildInstance;

use crate::error::DbError;
use crate::models::{children_json, datetime_to_millis, statuses_json, ChildInstanceRow};

/// Persistence for strategy fan-out bookkeeping. Every mutation is a
/// version-guarded conditional update, so two near-simultaneous child
/// completions can never both claim the same launch slot.
#[derive(Clone)]
pub struct ChildrenRepository {
    pool: SqlitePool,
}

impl ChildrenRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, instance: &ConcurrentChildInstance) -> Result<(), DbError> {
        let now = datetime_to_millis(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO concurrent_child_instances (
                parent_node_execution_id, plan_execution_id, children, cursor,
                child_statuses, max_concurrency, proceed_if_failed, version,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(instance.parent_node_execution_id.to_string())
        .bind(instance.plan_execution_id.to_string())
        .bind(children_json(instance)?)
        .bind(instance.cursor as i64)
        .bind(statuses_json(&instance.child_statuses)?)
        .bind(instance.max_concurrency as i64)
        .bind(instance.proceed_if_failed as i64)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Returns the instance plus its optimistic-concurrency version.
    pub async fn find_by_parent(
        &self,
        parent_id: Uuid,
    ) -> Result<Option<(ConcurrentChildInstance, i64)>, DbError> {
        let row: Option<ChildInstanceRow> = sqlx::query_as(
            "SELECT * FROM concurrent_child_instances WHERE parent_node_execution_id = ?",
        )
        .bind(parent_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ChildInstanceRow::into_domain).transpose()
    }

    /// Single atomic advance: new cursor + appended status land together or
    /// not at all. False means the expected version was stale.
    pub async fn advance(
        &self,
        instance: &ConcurrentChildInstance,
        expected_version: i64,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE concurrent_child_instances
            SET cursor = ?, child_statuses = ?, version = version + 1, updated_at = ?
            WHERE parent_node_execution_id = ? AND version = ?
            "#,
        )
        .bind(instance.cursor as i64)
        .bind(statuses_json(&instance.child_statuses)?)
        .bind(datetime_to_millis(Utc::now()))
        .bind(instance.parent_node_execution_id.to_string())
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Rewrite the ordered child id list (retry slot swaps), version-guarded
    /// like every other mutation.
    pub async fn save_children(
        &self,
        instance: &ConcurrentChildInstance,
        expected_version: i64,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE concurrent_child_instances
            SET children = ?, version = version + 1, updated_at = ?
            WHERE parent_node_execution_id = ? AND version = ?
            "#,
        )
        .bind(children_json(instance)?)
        .bind(datetime_to_millis(Utc::now()))
        .bind(instance.parent_node_execution_id.to_string())
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn delete(&self, parent_id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query(
            "DELETE FROM concurrent_child_instances WHERE parent_node_execution_id = ?",
        )
        .bind(parent_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
