//! Controller owner references and their append-if-absent merge.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{self, DocumentError, FieldPath};

/// Owner reference linking a target's lifecycle to its controlling resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    pub controller: bool,
    pub block_owner_deletion: bool,
}

impl OwnerRef {
    /// Controller reference, as written by the reconciler.
    pub fn controller(api_version: impl Into<String>, kind: impl Into<String>, name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
            uid: uid.into(),
            controller: true,
            block_owner_deletion: true,
        }
    }

    /// Identity is `{apiVersion, kind, name, uid}`; flags are not compared.
    pub fn same_owner(&self, existing: &Value) -> bool {
        let field = |k: &str| existing.get(k).and_then(Value::as_str);
        field("apiVersion") == Some(self.api_version.as_str())
            && field("kind") == Some(self.kind.as_str())
            && field("name") == Some(self.name.as_str())
            && field("uid") == Some(self.uid.as_str())
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "apiVersion": self.api_version,
            "kind": self.kind,
            "name": self.name,
            "uid": self.uid,
            "controller": self.controller,
            "blockOwnerDeletion": self.block_owner_deletion,
        })
    }
}

fn owner_references_path() -> Result<FieldPath, DocumentError> {
    FieldPath::from_segments(["metadata", "ownerReferences"])
}

/// Append `owner` to `metadata.ownerReferences` unless an entry with the same
/// identity is already present. Returns whether the list changed.
pub fn merge_owner_reference(doc: &mut Value, owner: &OwnerRef) -> Result<bool, DocumentError> {
    let path = owner_references_path()?;
    match document::get_mut(doc, &path) {
        Some(Value::Array(refs)) => {
            if refs.iter().any(|r| owner.same_owner(r)) {
                return Ok(false);
            }
            refs.push(owner.to_value());
            Ok(true)
        }
        Some(_) => Err(DocumentError::ConflictingPath { path: path.to_string(), at: path.to_string() }),
        None => {
            document::set(doc, &path, Value::Array(vec![owner.to_value()]))?;
            Ok(true)
        }
    }
}
