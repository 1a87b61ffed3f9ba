//! dynres selectors: resolve exactly one string from a source document.
//!
//! Three dialects share one contract, [`FieldSelector::resolve`]:
//! - [`Dialect::Path`]: dotted lookup (`status.token`), scalar matches only.
//! - [`Dialect::JsonPath`]: JSONPath query, must match exactly one node.
//! - [`Dialect::Template`]: minijinja template over the whole document, strict
//!   about undefined fields.
//!
//! The dialect is always given explicitly; expressions are never probed
//! against several parsers.

#![forbid(unsafe_code)]

use dynres_core::{Dialect, Document};

pub mod path;
pub mod query;
pub mod template;

pub use path::PathSelector;
pub use query::QuerySelector;
pub use template::TemplateSelector;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    #[error("field '{path}' not found on source object")]
    FieldNotFound { path: String },
    #[error("field '{expression}' is {found}, expected a scalar")]
    SelectorType { expression: String, found: &'static str },
    #[error("JSONPath '{expression}' did not yield any result")]
    NoResult { expression: String },
    #[error("JSONPath '{expression}' yielded {count} results, expected exactly one")]
    Ambiguous { expression: String, count: usize },
    #[error("invalid {dialect} expression '{expression}': {reason}")]
    InvalidExpression { dialect: &'static str, expression: String, reason: String },
    #[error("template '{expression}' failed to render: {reason}")]
    Template { expression: String, reason: String },
}

/// A compiled selector, tagged by dialect.
#[derive(Debug, Clone)]
pub enum FieldSelector {
    Path(PathSelector),
    Query(QuerySelector),
    Template(TemplateSelector),
}

impl FieldSelector {
    /// Compile `expression` for the given dialect. Syntax errors surface here,
    /// not at resolve time.
    pub fn new(dialect: Dialect, expression: &str) -> Result<Self, SelectorError> {
        Ok(match dialect {
            Dialect::Path => Self::Path(PathSelector::new(expression)?),
            Dialect::JsonPath => Self::Query(QuerySelector::new(expression)?),
            Dialect::Template => Self::Template(TemplateSelector::new(expression)?),
        })
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            Self::Path(_) => Dialect::Path,
            Self::Query(_) => Dialect::JsonPath,
            Self::Template(_) => Dialect::Template,
        }
    }

    pub fn expression(&self) -> &str {
        match self {
            Self::Path(s) => s.expression(),
            Self::Query(s) => s.expression(),
            Self::Template(s) => s.expression(),
        }
    }

    /// Resolve against `source`. Never mutates the source and never returns a
    /// partial value.
    pub fn resolve(&self, source: &Document) -> Result<String, SelectorError> {
        match self {
            Self::Path(s) => s.resolve(source),
            Self::Query(s) => s.resolve(source),
            Self::Template(s) => s.resolve(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dispatches_by_dialect_tag() {
        let src = json!({ "status": { "token": "abc123" } });
        let path = FieldSelector::new(Dialect::Path, "status.token").unwrap();
        let query = FieldSelector::new(Dialect::JsonPath, "{.status.token}").unwrap();
        let tmpl = FieldSelector::new(Dialect::Template, "{{ status.token }}").unwrap();
        assert_eq!(path.dialect(), Dialect::Path);
        assert_eq!(query.dialect(), Dialect::JsonPath);
        assert_eq!(tmpl.dialect(), Dialect::Template);
        for sel in [&path, &query, &tmpl] {
            assert_eq!(sel.resolve(&src).unwrap(), "abc123", "dialect {:?}", sel.dialect());
        }
    }

    #[test]
    fn a_path_is_not_reinterpreted_as_a_query() {
        // `[0]` is a literal key for the path dialect.
        let src = json!({ "items": ["a"] });
        let err = FieldSelector::new(Dialect::Path, "items[0]").unwrap().resolve(&src).unwrap_err();
        assert!(matches!(err, SelectorError::FieldNotFound { .. }));
    }
}
