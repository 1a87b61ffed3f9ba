//! Projection engine.

use dynres_core::{document, merge_owner_reference, Document, DocumentError};
use dynres_selector::SelectorError;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::resource::ControllingResource;
use crate::source::{SourceError, SourceResolver};

#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error("transformation {index}: fetch source: {source}")]
    Fetch { index: usize, source: SourceError },
    #[error("transformation {index}: resolve field: {source}")]
    Select { index: usize, source: SelectorError },
    #[error("transformation {index}: write target field: {source}")]
    Write { index: usize, source: DocumentError },
    #[error("attach owner reference: {0}")]
    Owner(#[source] DocumentError),
    #[error("projection cancelled before transformation {index}")]
    Cancelled { index: usize },
}

impl ProjectionError {
    /// Index of the transformation that failed, if the failure belongs to one.
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::Fetch { index, .. } | Self::Select { index, .. } | Self::Write { index, .. } | Self::Cancelled { index } => Some(*index),
            Self::Owner(_) => None,
        }
    }

    pub fn is_cancelled(&self) -> bool { matches!(self, Self::Cancelled { .. }) }
}

/// Stateless engine over a [`SourceResolver`]; safe to share across
/// concurrent reconciliations.
pub struct Projector<R> {
    resolver: R,
}

impl<R: SourceResolver> Projector<R> {
    pub fn new(resolver: R) -> Self { Self { resolver } }

    pub fn resolver(&self) -> &R { &self.resolver }

    /// Build the target document for `resource`.
    ///
    /// Transformations run strictly in order, one fetch at a time. The token
    /// is checked before every transformation and handed to each fetch.
    pub async fn project(&self, resource: &ControllingResource, cancel: &CancellationToken) -> Result<Document, ProjectionError> {
        let mut target = resource.target.clone();

        for (index, t) in resource.transformations.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ProjectionError::Cancelled { index });
            }
            let source = match self.resolver.fetch(&t.source, &resource.namespace, cancel).await {
                Ok(doc) => doc,
                Err(SourceError::Cancelled) => return Err(ProjectionError::Cancelled { index }),
                Err(source) => return Err(ProjectionError::Fetch { index, source }),
            };
            let value = t.selector.resolve(&source).map_err(|source| ProjectionError::Select { index, source })?;
            debug!(
                index,
                source = %t.source.gvk_key(),
                name = %t.source.name,
                dialect = ?t.selector.dialect(),
                destination = %t.destination,
                "transformation resolved"
            );
            document::set(&mut target, &t.destination, Value::String(value))
                .map_err(|source| ProjectionError::Write { index, source })?;
        }

        merge_owner_reference(&mut target, &resource.owner).map_err(ProjectionError::Owner)?;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Transformation;
    use crate::source::StaticSourceResolver;
    use dynres_core::{Dialect, OwnerRef, SourceRef};
    use serde_json::json;

    fn owner() -> OwnerRef { OwnerRef::controller("dynres.dev/v1alpha1", "DynamicResource", "demo", "uid-1") }

    fn resource(target: Value, ts: Vec<Transformation>) -> ControllingResource {
        ControllingResource { owner: owner(), namespace: "default".into(), target, transformations: ts }
    }

    fn t(name: &str, spec: &str, dest: &str) -> Transformation {
        Transformation::compile(0, SourceRef::new("v1", "ConfigMap", name), Dialect::Path, spec, dest).unwrap()
    }

    #[tokio::test]
    async fn skeleton_is_not_mutated() {
        let cm = SourceRef::new("v1", "ConfigMap", "cfg");
        let resolver = StaticSourceResolver::new().with("default", &cm, json!({ "data": { "k": "v" } }));
        let res = resource(json!({ "kind": "Secret" }), vec![t("cfg", "data.k", "data.k")]);
        let before = res.target.clone();
        let out = Projector::new(resolver).project(&res, &CancellationToken::new()).await.unwrap();
        assert_eq!(res.target, before);
        assert_eq!(out["data"]["k"], json!("v"));
    }

    #[tokio::test]
    async fn owner_conflict_is_reported_without_index() {
        let res = resource(json!({ "metadata": { "ownerReferences": {} } }), vec![]);
        let err = Projector::new(StaticSourceResolver::new()).project(&res, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ProjectionError::Owner(_)));
        assert_eq!(err.index(), None);
    }

    #[tokio::test]
    async fn write_conflict_is_wrapped_with_index() {
        let cm = SourceRef::new("v1", "ConfigMap", "cfg");
        let resolver = StaticSourceResolver::new().with("default", &cm, json!({ "data": { "k": "v" } }));
        let res = resource(json!({ "a": { "b": 5 } }), vec![t("cfg", "data.k", "a.b.c")]);
        let err = Projector::new(resolver).project(&res, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ProjectionError::Write { index: 0, .. }));
        assert_eq!(err.to_string(), "transformation 0: write target field: cannot set 'a.b.c': 'a.b' holds a non-object value");
    }
}
