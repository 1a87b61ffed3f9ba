//! Compiled form of a controlling resource.

use dynres_core::{Dialect, Document, DocumentError, FieldPath, OwnerRef, SourceRef};
use dynres_selector::{FieldSelector, SelectorError};

/// One `fieldFrom -> targetField` step.
#[derive(Debug, Clone)]
pub struct Transformation {
    pub source: SourceRef,
    pub selector: FieldSelector,
    pub destination: FieldPath,
}

#[derive(Debug, thiserror::Error)]
pub enum InvalidTransformation {
    #[error("transformation {index}: invalid fieldSpec: {source}")]
    Selector { index: usize, source: SelectorError },
    #[error("transformation {index}: invalid targetField: {source}")]
    Destination { index: usize, source: DocumentError },
}

impl Transformation {
    /// Compile a declared transformation; `index` is only used for errors.
    pub fn compile(
        index: usize,
        source: SourceRef,
        dialect: Dialect,
        field_spec: &str,
        target_field: &str,
    ) -> Result<Self, InvalidTransformation> {
        let selector = FieldSelector::new(dialect, field_spec)
            .map_err(|source| InvalidTransformation::Selector { index, source })?;
        let destination = FieldPath::parse(target_field)
            .map_err(|source| InvalidTransformation::Destination { index, source })?;
        Ok(Self { source, selector, destination })
    }
}

/// Declarative input to a projection.
#[derive(Debug, Clone)]
pub struct ControllingResource {
    /// Reference appended to the target's `metadata.ownerReferences`.
    pub owner: OwnerRef,
    /// Namespace sources are fetched from.
    pub namespace: String,
    /// Skeleton target; never mutated by the engine.
    pub target: Document,
    /// Application order; later writes win.
    pub transformations: Vec<Transformation>,
}
