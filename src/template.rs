//! Template engine for provisor using minijinja.
//!
//! Two flavours are used during a run:
//!
//! - [`TemplateEngine::strict`] renders task arguments, `template` sources
//!   and reports. Any reference to an undefined name is an error.
//! - [`TemplateEngine::predicate`] evaluates `when` expressions. Missing
//!   attributes evaluate to undefined (and therefore false) so that
//!   `result.rc == 0` is simply false when `result` was never recorded.

use minijinja::{AutoEscape, Environment, ErrorKind, UndefinedBehavior, Value};
use std::collections::HashSet;
use thiserror::Error;

/// Errors raised while rendering or evaluating templates
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("undefined variable in '{template}': {message}")]
    Undefined { template: String, message: String },

    #[error("syntax error in '{template}': {message}")]
    Syntax { template: String, message: String },

    #[error("failed to render '{template}': {message}")]
    Render { template: String, message: String },
}

impl TemplateError {
    fn from_minijinja(template: &str, err: minijinja::Error) -> Self {
        let template = template.to_string();
        let message = match err.line() {
            Some(line) => format!("{} (line {})", err, line),
            None => err.to_string(),
        };
        match err.kind() {
            ErrorKind::UndefinedError => TemplateError::Undefined { template, message },
            ErrorKind::SyntaxError => TemplateError::Syntax { template, message },
            _ => TemplateError::Render { template, message },
        }
    }

    pub fn template(&self) -> &str {
        match self {
            TemplateError::Undefined { template, .. }
            | TemplateError::Syntax { template, .. }
            | TemplateError::Render { template, .. } => template,
        }
    }
}

pub type TemplateResult<T> = Result<T, TemplateError>;

/// Thin wrapper over a configured minijinja environment
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine").finish_non_exhaustive()
    }
}

impl TemplateEngine {
    fn with_behavior(behavior: UndefinedBehavior) -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(behavior);
        env.set_keep_trailing_newline(true);
        env.set_auto_escape_callback(|_| AutoEscape::None);
        Self { env }
    }

    /// Undefined references are errors
    pub fn strict() -> Self {
        Self::with_behavior(UndefinedBehavior::Strict)
    }

    /// Undefined references evaluate to falsy values
    pub fn predicate() -> Self {
        Self::with_behavior(UndefinedBehavior::Chainable)
    }

    /// Render `source` against a JSON context
    pub fn render(
        &self,
        name: &str,
        source: &str,
        context: &serde_json::Value,
    ) -> TemplateResult<String> {
        self.env
            .render_named_str(name, source, Value::from_serialize(context))
            .map_err(|e| TemplateError::from_minijinja(name, e))
    }

    /// Render a string only if it contains template markers
    pub fn render_str(
        &self,
        name: &str,
        source: &str,
        context: &serde_json::Value,
    ) -> TemplateResult<String> {
        if is_template(source) {
            self.render(name, source, context)
        } else {
            Ok(source.to_string())
        }
    }

    /// Recursively render every string inside a JSON value
    pub fn render_value(
        &self,
        name: &str,
        value: &serde_json::Value,
        context: &serde_json::Value,
    ) -> TemplateResult<serde_json::Value> {
        Ok(match value {
            serde_json::Value::String(s) => {
                serde_json::Value::String(self.render_str(name, s, context)?)
            }
            serde_json::Value::Array(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|v| self.render_value(name, v, context))
                    .collect::<TemplateResult<_>>()?,
            ),
            serde_json::Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.render_value(name, v, context)?);
                }
                serde_json::Value::Object(out)
            }
            other => other.clone(),
        })
    }

    /// Evaluate an expression and return its truthiness
    pub fn eval_bool(&self, expr: &str, context: &serde_json::Value) -> TemplateResult<bool> {
        let compiled = self
            .env
            .compile_expression_owned(expr.to_string())
            .map_err(|e| TemplateError::from_minijinja(expr, e))?;
        let value = compiled
            .eval(Value::from_serialize(context))
            .map_err(|e| TemplateError::from_minijinja(expr, e))?;
        Ok(value.is_true())
    }

    /// Names an expression reads, as dotted attribute paths (`a.b.c`),
    /// without evaluating it
    pub fn referenced_paths(&self, expr: &str) -> TemplateResult<HashSet<String>> {
        let compiled = self
            .env
            .compile_expression_owned(expr.to_string())
            .map_err(|e| TemplateError::from_minijinja(expr, e))?;
        Ok(compiled.undeclared_variables(true))
    }

    /// Names a template source reads, as dotted attribute paths
    pub fn template_paths(&self, name: &str, source: &str) -> TemplateResult<HashSet<String>> {
        let env = Environment::new();
        let template = env
            .template_from_named_str(name, source)
            .map_err(|e| TemplateError::from_minijinja(name, e))?;
        Ok(template.undeclared_variables(true))
    }
}

/// Whether a string contains Jinja markers
pub fn is_template(s: &str) -> bool {
    s.contains("{{") || s.contains("{%")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_simple() {
        let engine = TemplateEngine::strict();
        let out = engine
            .render("greeting", "Hello {{ name }}!", &json!({"name": "web1"}))
            .unwrap();
        assert_eq!(out, "Hello web1!");
    }

    #[test]
    fn test_strict_undefined_is_error() {
        let engine = TemplateEngine::strict();
        let err = engine
            .render("report.j2", "{{ missing }}", &json!({}))
            .unwrap_err();
        assert!(matches!(err, TemplateError::Undefined { .. }));
        assert_eq!(err.template(), "report.j2");
    }

    #[test]
    fn test_strict_undefined_attribute_is_error() {
        let engine = TemplateEngine::strict();
        let err = engine
            .render("t", "{{ facts.nope }}", &json!({"facts": {}}))
            .unwrap_err();
        assert!(matches!(err, TemplateError::Undefined { .. }));
    }

    #[test]
    fn test_syntax_error() {
        let engine = TemplateEngine::strict();
        let err = engine.render("t", "{% if %}", &json!({})).unwrap_err();
        assert!(matches!(err, TemplateError::Syntax { .. }));
    }

    #[test]
    fn test_trailing_newline_kept() {
        let engine = TemplateEngine::strict();
        assert_eq!(engine.render("t", "a\n", &json!({})).unwrap(), "a\n");
    }

    #[test]
    fn test_render_value_recurses() {
        let engine = TemplateEngine::strict();
        let args = json!({"dest": "/srv/{{ app }}", "mode": 420, "names": ["{{ app }}-web"]});
        let out = engine
            .render_value("args", &args, &json!({"app": "shop"}))
            .unwrap();
        assert_eq!(
            out,
            json!({"dest": "/srv/shop", "mode": 420, "names": ["shop-web"]})
        );
    }

    #[test]
    fn test_predicate_missing_is_false() {
        let engine = TemplateEngine::predicate();
        assert!(!engine.eval_bool("result.rc == 0", &json!({})).unwrap());
        assert!(engine
            .eval_bool("os_family == 'Debian'", &json!({"os_family": "Debian"}))
            .unwrap());
    }

    #[test]
    fn test_referenced_paths() {
        let engine = TemplateEngine::predicate();
        let paths = engine
            .referenced_paths("nginx_check.rc != 0 and os_family == 'Debian'")
            .unwrap();
        assert!(paths.contains("nginx_check.rc"));
        assert!(paths.contains("os_family"));
        assert_eq!(paths.len(), 2);

        let paths = engine.referenced_paths("results.version.rc == 0").unwrap();
        assert!(paths.contains("results.version.rc"));
    }

    #[test]
    fn test_template_paths_skip_loop_variables() {
        let engine = TemplateEngine::strict();
        let paths = engine
            .template_paths(
                "summary",
                "{% for line in out.stdout_lines %}{{ line }}{% endfor %}{{ results.version.stdout }}",
            )
            .unwrap();
        assert!(paths.contains("out.stdout_lines"));
        assert!(paths.contains("results.version.stdout"));
        assert!(!paths.iter().any(|p| p.starts_with("line")));
    }
}
