use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;
use windlass_core::{Interrupt, InterruptState, InterruptType};

use crate::error::DbError;
use crate::models::{datetime_to_millis, InterruptRow};

#[derive(Clone)]
pub struct InterruptRepository {
    pool: SqlitePool,
}

impl InterruptRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, interrupt: &Interrupt) -> Result<(), DbError> {
        let row = InterruptRow::from(interrupt);

        sqlx::query(
            r#"
            INSERT INTO interrupts (
                uuid, interrupt_type, node_execution_id, plan_execution_id,
                state, issued_by, reason, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.uuid)
        .bind(&row.interrupt_type)
        .bind(&row.node_execution_id)
        .bind(&row.plan_execution_id)
        .bind(&row.state)
        .bind(&row.issued_by)
        .bind(&row.reason)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Interrupt>, DbError> {
        let row: Option<InterruptRow> = sqlx::query_as("SELECT * FROM interrupts WHERE uuid = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(InterruptRow::into_domain).transpose()
    }

    pub async fn get(&self, id: Uuid) -> Result<Interrupt, DbError> {
        self.find_by_id(id)
            .await?
            .ok_or(DbError::InterruptNotFound(id))
    }

    /// Conditional state advance; false when another processor won.
    pub async fn update_state(
        &self,
        id: Uuid,
        expected: InterruptState,
        to: InterruptState,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            "UPDATE interrupts SET state = ?, updated_at = ? WHERE uuid = ? AND state = ?",
        )
        .bind(to.as_str())
        .bind(datetime_to_millis(Utc::now()))
        .bind(id.to_string())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Interrupts still registered or processing for a plan execution.
    pub async fn find_open_by_plan(
        &self,
        plan_execution_id: Uuid,
    ) -> Result<Vec<Interrupt>, DbError> {
        let rows: Vec<InterruptRow> = sqlx::query_as(
            "SELECT * FROM interrupts \
             WHERE plan_execution_id = ? AND state IN (?, ?) \
             ORDER BY created_at",
        )
        .bind(plan_execution_id.to_string())
        .bind(InterruptState::Registered.as_str())
        .bind(InterruptState::Processing.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(InterruptRow::into_domain).collect()
    }

    /// A standing PAUSE_ALL gates facilitation of queued nodes.
    pub async fn has_open_pause(&self, plan_execution_id: Uuid) -> Result<bool, DbError> {
        let open = self.find_open_by_plan(plan_execution_id).await?;
        Ok(open
            .iter()
            .any(|i| i.interrupt_type == InterruptType::PauseAll))
    }
}
