//! Reconciliation driver: load, project, persist, then decide when to come back.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dynres_core::Document;
use dynres_engine::{CancellationToken, ControllingResource, Projector, SourceResolver};
use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use crate::crd::InvalidResource;

pub const DEFAULT_RECHECK: Duration = Duration::from_secs(10);
pub const DEFAULT_RETRY: Duration = Duration::from_secs(10);

/// Namespaced name of a controlling resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}/{}", self.namespace, self.name) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Loading,
    Projecting,
    Persisting,
    Retrying,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Requeue delay after a successful pass; sources are re-read on every pass.
    pub recheck_interval: Duration,
    pub retry_interval: Duration,
    /// Deadline for one pass. When it elapses the token fires, which stops the
    /// load, the remaining fetches and the persist call alike.
    pub reconcile_timeout: Option<Duration>,
}

impl Default for DriverConfig {
    fn default() -> Self { Self { recheck_interval: DEFAULT_RECHECK, retry_interval: DEFAULT_RETRY, reconcile_timeout: None } }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid controlling resource: {0}")]
    Invalid(#[from] InvalidResource),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Loads and compiles the controlling resource; `Ok(None)` when it is gone.
#[async_trait::async_trait]
pub trait ResourceLoader: Send + Sync {
    async fn load(&self, key: &ObjectKey) -> Result<Option<ControllingResource>, StoreError>;
}

/// Creates the target or brings the existing one in line with `target`.
#[async_trait::async_trait]
pub trait TargetStore: Send + Sync {
    async fn create_or_update(&self, target: &Document, namespace: &str) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
impl<T: ResourceLoader + ?Sized> ResourceLoader for Arc<T> {
    async fn load(&self, key: &ObjectKey) -> Result<Option<ControllingResource>, StoreError> { (**self).load(key).await }
}

#[async_trait::async_trait]
impl<T: TargetStore + ?Sized> TargetStore for Arc<T> {
    async fn create_or_update(&self, target: &Document, namespace: &str) -> Result<(), StoreError> {
        (**self).create_or_update(target, namespace).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub state: DriverState,
    pub requeue_after: Option<Duration>,
    pub error: Option<String>,
    /// The pass stopped because its token fired (deadline or shutdown).
    pub cancelled: bool,
    pub transitions: Vec<DriverState>,
}

impl ReconcileOutcome {
    pub fn is_retrying(&self) -> bool { self.state == DriverState::Retrying }
}

enum Failure {
    Cancelled(String),
    Failed(String),
}

pub struct Driver<L, R, S> {
    loader: L,
    projector: Projector<R>,
    store: S,
    config: DriverConfig,
}

impl<L, R, S> Driver<L, R, S>
where
    L: ResourceLoader,
    R: SourceResolver,
    S: TargetStore,
{
    pub fn new(loader: L, resolver: R, store: S, config: DriverConfig) -> Self {
        Self { loader, projector: Projector::new(resolver), store, config }
    }

    pub fn config(&self) -> &DriverConfig { &self.config }

    /// One reconciliation pass for `key`. Never fails: every error is folded
    /// into a `Retrying` outcome carrying its text.
    pub async fn reconcile(&self, key: &ObjectKey, cancel: &CancellationToken) -> ReconcileOutcome {
        let t0 = Instant::now();
        counter!("reconcile_attempts", 1u64);
        let token = cancel.child_token();
        let mut transitions = Vec::with_capacity(4);

        let result = {
            let pass = self.pass(key, &token, &mut transitions);
            tokio::pin!(pass);
            match self.config.reconcile_timeout {
                Some(limit) => {
                    let bounded = tokio::time::timeout(limit, &mut pass).await;
                    match bounded {
                        Ok(r) => r,
                        Err(_) => {
                            debug!(resource = %key, ?limit, "reconcile deadline elapsed; cancelling");
                            token.cancel();
                            pass.await
                        }
                    }
                }
                None => pass.await,
            }
        };

        let (state, requeue_after, error, cancelled) = match result {
            Ok(true) => {
                counter!("reconcile_ok", 1u64);
                info!(resource = %key, "target reconciled");
                (DriverState::Idle, Some(self.config.recheck_interval), None, false)
            }
            Ok(false) => {
                debug!(resource = %key, "controlling resource gone; nothing to do");
                (DriverState::Idle, None, None, false)
            }
            Err(Failure::Cancelled(text)) => {
                counter!("reconcile_cancelled", 1u64);
                info!(resource = %key, reason = %text, "reconcile cancelled");
                (DriverState::Retrying, Some(self.config.retry_interval), Some(text), true)
            }
            Err(Failure::Failed(text)) => {
                counter!("reconcile_err", 1u64);
                warn!(resource = %key, error = %text, "reconcile failed");
                (DriverState::Retrying, Some(self.config.retry_interval), Some(text), false)
            }
        };
        transitions.push(state);
        histogram!("reconcile_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        ReconcileOutcome { state, requeue_after, error, cancelled, transitions }
    }

    async fn pass(&self, key: &ObjectKey, token: &CancellationToken, transitions: &mut Vec<DriverState>) -> Result<bool, Failure> {
        transitions.push(DriverState::Loading);
        let loaded = tokio::select! {
            biased;
            r = self.loader.load(key) => r,
            _ = token.cancelled() => return Err(Failure::Cancelled(format!("cancelled while loading {key}"))),
        };
        let resource = match loaded {
            Ok(Some(r)) => r,
            Ok(None) => return Ok(false),
            Err(e) => return Err(Failure::Failed(format!("load {key}: {e:#}"))),
        };

        transitions.push(DriverState::Projecting);
        let target = self.projector.project(&resource, token).await.map_err(|e| {
            if e.is_cancelled() { Failure::Cancelled(e.to_string()) } else { Failure::Failed(e.to_string()) }
        })?;
        if token.is_cancelled() {
            return Err(Failure::Cancelled("cancelled before persisting target".into()));
        }

        transitions.push(DriverState::Persisting);
        let persisted = tokio::select! {
            biased;
            r = self.store.create_or_update(&target, &resource.namespace) => r,
            _ = token.cancelled() => return Err(Failure::Cancelled("cancelled while persisting target".into())),
        };
        persisted.map_err(|e| Failure::Failed(format!("persist target: {e:#}")))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_ten_second_cadence() {
        let c = DriverConfig::default();
        assert_eq!(c.recheck_interval, Duration::from_secs(10));
        assert_eq!(c.retry_interval, Duration::from_secs(10));
        assert!(c.reconcile_timeout.is_none());
    }

    #[test]
    fn object_key_displays_namespaced_name() {
        assert_eq!(ObjectKey::new("apps", "token-copy").to_string(), "apps/token-copy");
    }
}
