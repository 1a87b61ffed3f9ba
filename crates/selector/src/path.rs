//! Dotted-path selector.

use dynres_core::document::{self, FieldPath};
use dynres_core::Document;

use crate::SelectorError;

#[derive(Debug, Clone)]
pub struct PathSelector {
    expression: String,
    path: FieldPath,
}

impl PathSelector {
    pub fn new(expression: &str) -> Result<Self, SelectorError> {
        let path = FieldPath::parse(expression).map_err(|e| SelectorError::InvalidExpression {
            dialect: "path",
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { expression: expression.to_string(), path })
    }

    pub fn expression(&self) -> &str { &self.expression }

    pub fn resolve(&self, source: &Document) -> Result<String, SelectorError> {
        let value = document::get(source, &self.path)
            .ok_or_else(|| SelectorError::FieldNotFound { path: self.expression.clone() })?;
        document::render_scalar(value).ok_or_else(|| SelectorError::SelectorType {
            expression: self.expression.clone(),
            found: document::type_name(value),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_scalars() {
        let src = json!({ "spec": { "replicas": 3, "paused": false, "name": "x" } });
        assert_eq!(PathSelector::new("spec.replicas").unwrap().resolve(&src).unwrap(), "3");
        assert_eq!(PathSelector::new("spec.paused").unwrap().resolve(&src).unwrap(), "false");
        assert_eq!(PathSelector::new("spec.name").unwrap().resolve(&src).unwrap(), "x");
    }

    #[test]
    fn missing_field_is_not_found() {
        let src = json!({ "status": {} });
        let err = PathSelector::new("status.token").unwrap().resolve(&src).unwrap_err();
        assert_eq!(err, SelectorError::FieldNotFound { path: "status.token".into() });
    }

    #[test]
    fn non_scalar_match_is_a_type_error() {
        let src = json!({ "spec": { "list": [1], "obj": {} } });
        let err = PathSelector::new("spec.list").unwrap().resolve(&src).unwrap_err();
        assert_eq!(err, SelectorError::SelectorType { expression: "spec.list".into(), found: "array" });
        let err = PathSelector::new("spec.obj").unwrap().resolve(&src).unwrap_err();
        assert!(matches!(err, SelectorError::SelectorType { found: "object", .. }));
    }

    #[test]
    fn malformed_path_fails_to_compile() {
        assert!(matches!(PathSelector::new("a..b"), Err(SelectorError::InvalidExpression { dialect: "path", .. })));
    }
}
