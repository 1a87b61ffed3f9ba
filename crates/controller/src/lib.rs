//! dynres controller: the `DynamicResource` CRD, the reconciliation driver and
//! its kube runtime wiring.

#![forbid(unsafe_code)]

pub mod crd;
pub mod driver;
pub mod runner;

pub use crd::{DynamicResource, DynamicResourceSpec, FieldFrom, InvalidResource, SelectorDialect, TransformationSpec};
pub use driver::{
    Driver, DriverConfig, DriverState, ObjectKey, ReconcileOutcome, ResourceLoader, StoreError, TargetStore,
    DEFAULT_RECHECK, DEFAULT_RETRY,
};
pub use runner::{run, KubeResourceLoader, RunConfig};
