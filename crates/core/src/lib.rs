//! dynres core types: schema-less documents, field paths, source references
//! and controller owner references.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

pub mod document;
pub mod owner;

pub use document::{Document, DocumentError, FieldPath};
pub use owner::{merge_owner_reference, OwnerRef};

pub mod prelude {
    pub use super::{Dialect, Document, DocumentError, FieldPath, OwnerRef, SourceRef};
}

/// Split an `apiVersion` such as `apps/v1` into `(group, version)`.
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    api_version.split_once('/').unwrap_or(("", api_version))
}

/// Reference to a source resource. The namespace always comes from the
/// controlling resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

impl SourceRef {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self { api_version: api_version.into(), kind: kind.into(), name: name.into() }
    }

    /// Split `apiVersion` into `(group, version)`; core kinds have an empty group.
    pub fn group_version(&self) -> (&str, &str) { split_api_version(&self.api_version) }

    /// Key in the `group/version/Kind` (or `version/Kind`) form used in logs.
    pub fn gvk_key(&self) -> String { format!("{}/{}", self.api_version, self.kind) }
}

/// Selector dialect stored alongside the expression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Dialect {
    /// Dotted path lookup, e.g. `status.token`.
    #[default]
    Path,
    /// JSONPath query, e.g. `{.status.conditions[?(@.type=="Ready")].status}`.
    JsonPath,
    /// minijinja template rendered against the whole source document.
    Template,
}
