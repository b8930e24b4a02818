use sqlx::SqlitePool;
use uuid::Uuid;
use windlass_core::{OutcomeInstance, OutputInstance};

use crate::error::DbError;
use crate::models::{DocumentKind, StepDocumentRow};

fn map_unique_violation(err: sqlx::Error, name: &str, scope: Uuid) -> DbError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return DbError::DuplicateDocument {
                name: name.to_string(),
                scope,
            };
        }
    }
    DbError::Sqlx(err)
}

/// Sweeping outputs and outcomes, stored as one generic document entity.
/// The `(plan, scope, name, kind)` unique index enforces the
/// publish-once-per-scope invariant.
#[derive(Clone)]
pub struct DocumentRepository {
    pool: SqlitePool,
}

impl DocumentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn insert(&self, row: StepDocumentRow) -> Result<(), DbError> {
        let scope = Uuid::parse_str(&row.scope_runtime_id).unwrap_or_default();
        sqlx::query(
            r#"
            INSERT INTO step_documents (
                uuid, doc_kind, plan_execution_id, scope_runtime_id,
                produced_by_runtime_id, name, levels, value, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.uuid)
        .bind(&row.doc_kind)
        .bind(&row.plan_execution_id)
        .bind(&row.scope_runtime_id)
        .bind(&row.produced_by_runtime_id)
        .bind(&row.name)
        .bind(&row.levels)
        .bind(&row.value)
        .bind(row.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, &row.name, scope))?;

        Ok(())
    }

    pub async fn save_output(&self, output: &OutputInstance) -> Result<(), DbError> {
        self.insert(StepDocumentRow::try_from(output)?).await
    }

    pub async fn save_outcome(&self, outcome: &OutcomeInstance) -> Result<(), DbError> {
        self.insert(StepDocumentRow::try_from(outcome)?).await
    }

    /// Resolve a sweeping output visible from the given scope chain
    /// (innermost runtime id first). The innermost producing scope wins.
    pub async fn resolve_output(
        &self,
        plan_execution_id: Uuid,
        scope_chain: &[Uuid],
        name: &str,
    ) -> Result<Option<OutputInstance>, DbError> {
        if scope_chain.is_empty() {
            return Ok(None);
        }
        let placeholders = vec!["?"; scope_chain.len()].join(", ");
        let sql = format!(
            "SELECT * FROM step_documents \
             WHERE plan_execution_id = ? AND doc_kind = ? AND name = ? \
             AND scope_runtime_id IN ({placeholders})"
        );

        let mut query = sqlx::query_as::<_, StepDocumentRow>(&sql)
            .bind(plan_execution_id.to_string())
            .bind(DocumentKind::Output.as_str())
            .bind(name);
        for scope in scope_chain {
            query = query.bind(scope.to_string());
        }

        let rows = query.fetch_all(&self.pool).await?;
        // Pick the match whose scope sits innermost on the consumer's chain.
        for scope in scope_chain {
            if let Some(row) = rows
                .iter()
                .find(|r| r.scope_runtime_id == scope.to_string())
            {
                return Ok(Some(row.clone().into_output()?));
            }
        }
        Ok(None)
    }

    /// Outcomes published into the given scope, for ancestors to consume.
    pub async fn find_outcomes_in_scope(
        &self,
        plan_execution_id: Uuid,
        scope_runtime_id: Uuid,
    ) -> Result<Vec<OutcomeInstance>, DbError> {
        let rows: Vec<StepDocumentRow> = sqlx::query_as(
            "SELECT * FROM step_documents \
             WHERE plan_execution_id = ? AND doc_kind = ? AND scope_runtime_id = ? \
             ORDER BY created_at",
        )
        .bind(plan_execution_id.to_string())
        .bind(DocumentKind::Outcome.as_str())
        .bind(scope_runtime_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StepDocumentRow::into_outcome).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use windlass_core::{Ambiance, Level};

    async fn setup() -> DocumentRepository {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        DocumentRepository::new(pool)
    }

    fn ambiance(plan: Uuid) -> Ambiance {
        Ambiance::new(plan, "acct", "org", "proj")
    }

    #[tokio::test]
    async fn test_duplicate_output_in_scope_rejected() {
        let repo = setup().await;
        let plan = Uuid::new_v4();
        let amb = ambiance(plan).child(Level::new(Uuid::new_v4(), Uuid::new_v4(), "stage"));

        let output =
            OutputInstance::new(&amb, "artifact", serde_json::json!({"tag": "v1"})).unwrap();
        repo.save_output(&output).await.unwrap();

        let again =
            OutputInstance::new(&amb, "artifact", serde_json::json!({"tag": "v2"})).unwrap();
        let err = repo.save_output(&again).await.unwrap_err();
        assert!(err.is_duplicate());
    }

    #[tokio::test]
    async fn test_resolve_prefers_innermost_scope() {
        let repo = setup().await;
        let plan = Uuid::new_v4();
        let stage_runtime = Uuid::new_v4();
        let step_runtime = Uuid::new_v4();
        let stage_amb = ambiance(plan).child(Level::new(Uuid::new_v4(), stage_runtime, "stage"));
        let step_amb = stage_amb.child(Level::new(Uuid::new_v4(), step_runtime, "step"));

        let outer = OutputInstance::new(&stage_amb, "image", serde_json::json!("outer")).unwrap();
        let inner = OutputInstance::new(&step_amb, "image", serde_json::json!("inner")).unwrap();
        repo.save_output(&outer).await.unwrap();
        repo.save_output(&inner).await.unwrap();

        let resolved = repo
            .resolve_output(plan, &[step_runtime, stage_runtime], "image")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.value, serde_json::json!("inner"));

        // A consumer outside the step scope only sees the stage output.
        let resolved = repo
            .resolve_output(plan, &[stage_runtime], "image")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.value, serde_json::json!("outer"));
    }

    #[tokio::test]
    async fn test_outcomes_scoped_to_parent() {
        let repo = setup().await;
        let plan = Uuid::new_v4();
        let stage_runtime = Uuid::new_v4();
        let step_amb = ambiance(plan)
            .child(Level::new(Uuid::new_v4(), stage_runtime, "stage"))
            .child(Level::new(Uuid::new_v4(), Uuid::new_v4(), "step"));

        let outcome = OutcomeInstance::new(&step_amb, "result", serde_json::json!(7)).unwrap();
        repo.save_outcome(&outcome).await.unwrap();

        let in_stage = repo.find_outcomes_in_scope(plan, stage_runtime).await.unwrap();
        assert_eq!(in_stage.len(), 1);
        assert_eq!(in_stage[0].value, serde_json::json!(7));

        let elsewhere = repo
            .find_outcomes_in_scope(plan, Uuid::new_v4())
            .await
            .unwrap();
        assert!(elsewhere.is_empty());
    }
}
