use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;
use windlass_core::{
    AdviserDecision, ExecutableResponse, ExecutionStatus, FailureInfo, InterruptEffect,
    InterventionDetails, NodeExecution,
};

use crate::error::DbError;
use crate::models::{datetime_to_millis, NodeExecutionRow};

/// All lifecycle mutations go through conditional updates keyed on the
/// expected current status, so each node execution has a single effective
/// writer even under concurrent delivery.
#[derive(Clone)]
pub struct NodeExecutionRepository {
    pool: SqlitePool,
}

impl NodeExecutionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, exec: &NodeExecution) -> Result<(), DbError> {
        let row = NodeExecutionRow::try_from(exec)?;

        sqlx::query(
            r#"
            INSERT INTO node_executions (
                uuid, plan_execution_id, parent_id, previous_id, retry_index,
                status, ambiance, node, executable_response, adviser_decision,
                failure, intervention, interrupt_history, start_ts, end_ts,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.uuid)
        .bind(&row.plan_execution_id)
        .bind(&row.parent_id)
        .bind(&row.previous_id)
        .bind(row.retry_index)
        .bind(&row.status)
        .bind(&row.ambiance)
        .bind(&row.node)
        .bind(&row.executable_response)
        .bind(&row.adviser_decision)
        .bind(&row.failure)
        .bind(&row.intervention)
        .bind(&row.interrupt_history)
        .bind(row.start_ts)
        .bind(row.end_ts)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<NodeExecution>, DbError> {
        let row: Option<NodeExecutionRow> =
            sqlx::query_as("SELECT * FROM node_executions WHERE uuid = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.map(NodeExecutionRow::into_domain).transpose()
    }

    pub async fn get(&self, id: Uuid) -> Result<NodeExecution, DbError> {
        self.find_by_id(id)
            .await?
            .ok_or(DbError::NodeExecutionNotFound(id))
    }

    /// Compare-and-swap on status. Returns false when the precondition did
    /// not hold, i.e. another writer got there first.
    pub async fn update_status(
        &self,
        id: Uuid,
        expected: &[ExecutionStatus],
        to: ExecutionStatus,
    ) -> Result<bool, DbError> {
        let now = datetime_to_millis(Utc::now());
        let placeholders = vec!["?"; expected.len()].join(", ");
        let start_clause = if to == ExecutionStatus::Running {
            ", start_ts = COALESCE(start_ts, ?)"
        } else if to.is_terminal() {
            ", end_ts = COALESCE(end_ts, ?)"
        } else {
            ""
        };
        let sql = format!(
            "UPDATE node_executions SET status = ?, updated_at = ?{start_clause} \
             WHERE uuid = ? AND status IN ({placeholders})"
        );

        let mut query = sqlx::query(&sql).bind(to.as_str()).bind(now);
        if !start_clause.is_empty() {
            query = query.bind(now);
        }
        query = query.bind(id.to_string());
        for status in expected {
            query = query.bind(status.as_str());
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn save_executable_response(
        &self,
        id: Uuid,
        response: &ExecutableResponse,
    ) -> Result<(), DbError> {
        sqlx::query("UPDATE node_executions SET executable_response = ?, updated_at = ? WHERE uuid = ?")
            .bind(serde_json::to_string(response)?)
            .bind(datetime_to_millis(Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn save_adviser_decision(
        &self,
        id: Uuid,
        decision: &AdviserDecision,
    ) -> Result<(), DbError> {
        sqlx::query("UPDATE node_executions SET adviser_decision = ?, updated_at = ? WHERE uuid = ?")
            .bind(serde_json::to_string(decision)?)
            .bind(datetime_to_millis(Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn save_failure(&self, id: Uuid, failure: &FailureInfo) -> Result<(), DbError> {
        sqlx::query("UPDATE node_executions SET failure = ?, updated_at = ? WHERE uuid = ?")
            .bind(serde_json::to_string(failure)?)
            .bind(datetime_to_millis(Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn save_intervention(
        &self,
        id: Uuid,
        intervention: Option<&InterventionDetails>,
    ) -> Result<(), DbError> {
        sqlx::query("UPDATE node_executions SET intervention = ?, updated_at = ? WHERE uuid = ?")
            .bind(intervention.map(serde_json::to_string).transpose()?)
            .bind(datetime_to_millis(Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Serialized by the caller's interrupt lock; the history column is
    /// append-only.
    pub async fn append_interrupt_effect(
        &self,
        id: Uuid,
        effect: &InterruptEffect,
    ) -> Result<(), DbError> {
        let exec = self.get(id).await?;
        let mut history = exec.interrupt_history;
        history.push(effect.clone());

        sqlx::query("UPDATE node_executions SET interrupt_history = ?, updated_at = ? WHERE uuid = ?")
            .bind(serde_json::to_string(&history)?)
            .bind(datetime_to_millis(Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn find_by_plan(&self, plan_execution_id: Uuid) -> Result<Vec<NodeExecution>, DbError> {
        let rows: Vec<NodeExecutionRow> = sqlx::query_as(
            "SELECT * FROM node_executions WHERE plan_execution_id = ? ORDER BY created_at",
        )
        .bind(plan_execution_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(NodeExecutionRow::into_domain).collect()
    }

    pub async fn find_by_plan_with_statuses(
        &self,
        plan_execution_id: Uuid,
        statuses: &[ExecutionStatus],
    ) -> Result<Vec<NodeExecution>, DbError> {
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT * FROM node_executions \
             WHERE plan_execution_id = ? AND status IN ({placeholders}) \
             ORDER BY created_at"
        );

        let mut query = sqlx::query_as::<_, NodeExecutionRow>(&sql)
            .bind(plan_execution_id.to_string());
        for status in statuses {
            query = query.bind(status.as_str());
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(NodeExecutionRow::into_domain).collect()
    }

    /// Intervention-waiting nodes whose repair deadline has passed.
    pub async fn find_expired_interventions(
        &self,
        now: chrono::DateTime<Utc>,
    ) -> Result<Vec<NodeExecution>, DbError> {
        let rows: Vec<NodeExecutionRow> = sqlx::query_as(
            "SELECT * FROM node_executions WHERE status = ? AND intervention IS NOT NULL",
        )
        .bind(ExecutionStatus::InterventionWaiting.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut expired = Vec::new();
        for row in rows {
            let exec = row.into_domain()?;
            if let Some(details) = &exec.intervention {
                if details.deadline <= now {
                    expired.push(exec);
                }
            }
        }
        Ok(expired)
    }
}
