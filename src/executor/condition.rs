//! `when` evaluation
//!
//! Conditions are minijinja expressions evaluated against an immutable
//! snapshot of the host's store. Names that were never recorded evaluate
//! as undefined, so `probe.rc == 0` is false rather than an error when
//! `probe` was skipped.

use serde_json::Value as JsonValue;

use crate::template::{TemplateEngine, TemplateResult};

/// Evaluator for task conditions
#[derive(Debug)]
pub struct ConditionEvaluator {
    engine: TemplateEngine,
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self {
            engine: TemplateEngine::predicate(),
        }
    }

    /// Evaluate a single expression
    pub fn evaluate(&self, expr: &str, context: &JsonValue) -> TemplateResult<bool> {
        match expr.trim() {
            "" | "true" | "True" => Ok(true),
            "false" | "False" => Ok(false),
            trimmed => {
                // `{{ x }}` is accepted and treated as the bare expression
                let bare = trimmed
                    .strip_prefix("{{")
                    .and_then(|s| s.strip_suffix("}}"))
                    .unwrap_or(trimmed);
                self.engine.eval_bool(bare.trim(), context)
            }
        }
    }

    /// All conditions must hold; stops at the first false one
    pub fn evaluate_all(&self, conditions: &[String], context: &JsonValue) -> TemplateResult<bool> {
        for condition in conditions {
            if !self.evaluate(condition, context)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
