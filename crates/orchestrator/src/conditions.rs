//! Skip-condition evaluation.
//!
//! Operators live in one immutable map built at process start and passed by
//! reference into the engine. Unknown operators are a configuration error.

use std::collections::HashMap;

use windlass_core::SkipCondition;

use crate::error::{OrchestratorError, Result};

/// Input available to a condition operator.
pub struct ConditionInput<'a> {
    pub parameters: &'a serde_json::Value,
    pub args: &'a [String],
}

type ConditionFn = fn(&ConditionInput<'_>) -> Result<bool>;

pub struct ConditionEvaluator {
    operators: HashMap<&'static str, ConditionFn>,
}

impl ConditionEvaluator {
    /// The standard operator set.
    pub fn standard() -> Self {
        let mut operators: HashMap<&'static str, ConditionFn> = HashMap::new();
        operators.insert("always", op_always);
        operators.insert("never", op_never);
        operators.insert("param_equals", op_param_equals);
        operators.insert("param_missing", op_param_missing);
        Self { operators }
    }

    pub fn evaluate(
        &self,
        condition: &SkipCondition,
        parameters: &serde_json::Value,
    ) -> Result<bool> {
        let op = self
            .operators
            .get(condition.operator.as_str())
            .ok_or_else(|| {
                OrchestratorError::UnknownConditionOperator(condition.operator.clone())
            })?;
        op(&ConditionInput {
            parameters,
            args: &condition.args,
        })
    }
}

fn op_always(_input: &ConditionInput<'_>) -> Result<bool> {
    Ok(true)
}

fn op_never(_input: &ConditionInput<'_>) -> Result<bool> {
    Ok(false)
}

fn op_param_equals(input: &ConditionInput<'_>) -> Result<bool> {
    let [key, expected] = input.args else {
        return Err(OrchestratorError::UnknownConditionOperator(
            "param_equals expects two arguments".to_string(),
        ));
    };
    Ok(input
        .parameters
        .get(key.as_str())
        .and_then(|v| v.as_str())
        .map(|v| v == expected.as_str())
        .unwrap_or(false))
}

fn op_param_missing(input: &ConditionInput<'_>) -> Result<bool> {
    let [key] = input.args else {
        return Err(OrchestratorError::UnknownConditionOperator(
            "param_missing expects one argument".to_string(),
        ));
    };
    Ok(input.parameters.get(key.as_str()).is_none())
}
