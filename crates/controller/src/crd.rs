//! `DynamicResource` custom resource and its compilation into a
//! [`ControllingResource`].

use dynres_core::{Dialect, OwnerRef, SourceRef};
use dynres_engine::{ControllingResource, InvalidTransformation, Transformation};
use kube::{CustomResource, Resource, ResourceExt};
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A target resource whose fields are filled from other resources before it
/// is applied.
///
/// Example:
/// ```yaml
/// apiVersion: dynres.dev/v1alpha1
/// kind: DynamicResource
/// metadata:
///   name: token-copy
/// spec:
///   target:
///     apiVersion: v1
///     kind: Secret
///     metadata:
///       name: copied-token
///     stringData: {}
///   transformations:
///     - fieldFrom:
///         apiVersion: example.dev/v1
///         kind: TokenIssuer
///         name: issuer
///         fieldSpec: status.token
///       targetField: stringData.token
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "dynres.dev",
    version = "v1alpha1",
    kind = "DynamicResource",
    namespaced,
    printcolumn = r#"{"name":"Target Kind","type":"string","jsonPath":".spec.target.kind"}"#,
    printcolumn = r#"{"name":"Target","type":"string","jsonPath":".spec.target.metadata.name"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DynamicResourceSpec {
    /// Skeleton of the resource to create or update.
    #[schemars(schema_with = "embedded_resource")]
    pub target: Value,

    /// Applied in order; a later write to the same field wins.
    #[serde(default)]
    pub transformations: Vec<TransformationSpec>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransformationSpec {
    pub field_from: FieldFrom,
    /// Dotted destination path in the target, e.g. `data.password`.
    pub target_field: String,
}

/// Source resource (same namespace as the `DynamicResource`) and the field to read.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldFrom {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub field_spec: String,
    /// Defaults to `path`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialect: Option<SelectorDialect>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SelectorDialect {
    #[default]
    Path,
    JsonPath,
    Template,
}

impl From<SelectorDialect> for Dialect {
    fn from(d: SelectorDialect) -> Self {
        match d {
            SelectorDialect::Path => Dialect::Path,
            SelectorDialect::JsonPath => Dialect::JsonPath,
            SelectorDialect::Template => Dialect::Template,
        }
    }
}

fn embedded_resource(_: &mut SchemaGenerator) -> Schema {
    let mut obj = SchemaObject { instance_type: Some(InstanceType::Object.into()), ..Default::default() };
    obj.extensions.insert("x-kubernetes-preserve-unknown-fields".into(), Value::Bool(true));
    obj.extensions.insert("x-kubernetes-embedded-resource".into(), Value::Bool(true));
    Schema::Object(obj)
}

#[derive(Debug, thiserror::Error)]
pub enum InvalidResource {
    #[error("DynamicResource '{name}' has no metadata.{field}")]
    MissingMetadata { name: String, field: &'static str },
    #[error("spec.target must be an object, found {0}")]
    TargetNotObject(&'static str),
    #[error(transparent)]
    Transformation(#[from] InvalidTransformation),
}

impl DynamicResource {
    /// Controller owner reference for targets of this resource.
    pub fn controller_owner_ref(&self) -> Result<OwnerRef, InvalidResource> {
        let name = self.name_any();
        let uid = self.uid().ok_or_else(|| InvalidResource::MissingMetadata { name: name.clone(), field: "uid" })?;
        Ok(OwnerRef::controller(Self::api_version(&()), Self::kind(&()), name, uid))
    }

    /// Validate and compile into the engine's input form.
    pub fn compile(&self) -> Result<ControllingResource, InvalidResource> {
        let owner = self.controller_owner_ref()?;
        let namespace = self
            .namespace()
            .ok_or_else(|| InvalidResource::MissingMetadata { name: self.name_any(), field: "namespace" })?;
        if !self.spec.target.is_object() {
            return Err(InvalidResource::TargetNotObject(dynres_core::document::type_name(&self.spec.target)));
        }
        let transformations = self
            .spec
            .transformations
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let from = &t.field_from;
                let source = SourceRef::new(&from.api_version, &from.kind, &from.name);
                let dialect = from.dialect.unwrap_or_default().into();
                Transformation::compile(i, source, dialect, &from.field_spec, &t.target_field)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ControllingResource { owner, namespace, target: self.spec.target.clone(), transformations })
    }
}
