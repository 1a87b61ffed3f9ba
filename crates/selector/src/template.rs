//! Template selector backed by minijinja.
//!
//! The source document is the render context, so `{{ status.token }}` or
//! `{{ metadata.labels["app"] | upper }}` read straight from the tree.
//! Undefined behavior is strict: a reference to an absent field is an error,
//! never an empty string.

use dynres_core::Document;
use minijinja::value::{Value, ValueKind};
use minijinja::{escape_formatter, Environment, Error, Output, State, UndefinedBehavior};

use crate::SelectorError;

#[derive(Debug, Clone)]
pub struct TemplateSelector {
    expression: String,
}

/// Writes booleans, null and nested values the way the path and query
/// dialects render them (`true`, `null`, compact JSON).
fn canonical_formatter(out: &mut Output<'_>, state: &State<'_, '_>, value: &Value) -> Result<(), Error> {
    let text = match value.kind() {
        ValueKind::Bool => Some(if value.is_true() { "true" } else { "false" }.to_string()),
        ValueKind::None => Some("null".to_string()),
        ValueKind::Seq | ValueKind::Map => serde_json::to_string(value).ok(),
        _ => None,
    };
    match text {
        Some(t) => escape_formatter(out, state, &Value::from(t)),
        None => escape_formatter(out, state, value),
    }
}

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_formatter(canonical_formatter);
    env
}

impl TemplateSelector {
    pub fn new(expression: &str) -> Result<Self, SelectorError> {
        let env = environment();
        env.template_from_str(expression).map_err(|e| SelectorError::InvalidExpression {
            dialect: "template",
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { expression: expression.to_string() })
    }

    pub fn expression(&self) -> &str { &self.expression }

    pub fn resolve(&self, source: &Document) -> Result<String, SelectorError> {
        environment().render_str(&self.expression, source).map_err(|e| SelectorError::Template {
            expression: self.expression.clone(),
            reason: e.to_string(),
        })
    }
}
