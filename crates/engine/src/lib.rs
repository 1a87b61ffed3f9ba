//! dynres projection engine.
//!
//! [`Projector::project`] seeds a target from the skeleton, applies each
//! transformation in declared order (fetch source, resolve selector, write
//! destination), attaches the controller owner reference and returns the
//! finished document. The first failure aborts the run; no partial target is
//! ever returned.

#![forbid(unsafe_code)]

pub mod projector;
pub mod resource;
pub mod source;

pub use projector::{ProjectionError, Projector};
pub use resource::{ControllingResource, InvalidTransformation, Transformation};
pub use source::{SourceError, SourceResolver, StaticSourceResolver};

/// Re-exported so callers do not need a direct tokio-util dependency.
pub use tokio_util::sync::CancellationToken;
