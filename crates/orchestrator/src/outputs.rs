//! Sweeping outputs and outcomes.
//!
//! Thin service over the generic step-document store: producers publish
//! into their ambiance scope, consumers resolve by walking their own scope
//! chain outward. The per-scope uniqueness invariant is enforced by the
//! store's unique index and surfaces here as an error.

use tracing::debug;
use windlass_core::{Ambiance, OutcomeInstance, OutputInstance};

use db::DocumentRepository;

use crate::error::Result;

#[derive(Clone)]
pub struct OutputStore {
    documents: DocumentRepository,
}

impl OutputStore {
    pub fn new(documents: DocumentRepository) -> Self {
        Self { documents }
    }

    /// Publish a sweeping output at the producer's own level, visible to
    /// every descendant of that scope.
    pub async fn publish_output(
        &self,
        ambiance: &Ambiance,
        name: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        let output = OutputInstance::new(ambiance, name, value)?;
        debug!(
            plan_execution_id = %output.plan_execution_id,
            name,
            "Publishing sweeping output"
        );
        self.documents.save_output(&output).await?;
        Ok(())
    }

    /// Publish an outcome into the enclosing scope for ancestors to read.
    pub async fn publish_outcome(
        &self,
        ambiance: &Ambiance,
        name: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        let outcome = OutcomeInstance::new(ambiance, name, value)?;
        self.documents.save_outcome(&outcome).await?;
        Ok(())
    }

    /// Resolve a sweeping output visible from the consumer's ambiance; the
    /// innermost producing scope wins. Sibling branches do not see each
    /// other's outputs.
    pub async fn resolve_output(
        &self,
        ambiance: &Ambiance,
        name: &str,
    ) -> Result<Option<OutputInstance>> {
        let chain = ambiance.scope_runtime_ids();
        Ok(self
            .documents
            .resolve_output(ambiance.plan_execution_id, &chain, name)
            .await?)
    }

    /// Outcomes published into the scope addressed by `ambiance`'s own
    /// level, i.e. what the children of this node reported upward.
    pub async fn outcomes_for(&self, ambiance: &Ambiance) -> Result<Vec<OutcomeInstance>> {
        let scope = ambiance.node_runtime_id()?;
        Ok(self
            .documents
            .find_outcomes_in_scope(ambiance.plan_execution_id, scope)
            .await?)
    }
}
