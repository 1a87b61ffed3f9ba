//! kube runtime wiring for the driver.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use dynres_core::Document;
use dynres_engine::{CancellationToken, ControllingResource};
use dynres_kubehub::{ApiResources, KubeSourceResolver, KubeTargetStore};
use futures::StreamExt;
use kube::api::{Api, ListParams};
use kube::runtime::controller::{Action, Controller, Error as ControllerError};
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use tracing::{debug, info, warn};

use crate::crd::DynamicResource;
use crate::driver::{Driver, DriverConfig, ObjectKey, ReconcileOutcome, ResourceLoader, StoreError, TargetStore};

/// Reads the current `DynamicResource` from the API server on every pass.
pub struct KubeResourceLoader {
    client: Client,
}

impl KubeResourceLoader {
    pub fn new(client: Client) -> Self { Self { client } }
}

#[async_trait::async_trait]
impl ResourceLoader for KubeResourceLoader {
    async fn load(&self, key: &ObjectKey) -> Result<Option<ControllingResource>, StoreError> {
        let api: Api<DynamicResource> = Api::namespaced(self.client.clone(), &key.namespace);
        let Some(dr) = api.get_opt(&key.name).await.with_context(|| format!("get DynamicResource {key}"))? else {
            return Ok(None);
        };
        Ok(Some(dr.compile()?))
    }
}

#[async_trait::async_trait]
impl TargetStore for KubeTargetStore {
    async fn create_or_update(&self, target: &Document, namespace: &str) -> Result<(), StoreError> {
        self.apply(target, namespace).await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub driver: DriverConfig,
    pub field_manager: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self { driver: DriverConfig::default(), field_manager: dynres_kubehub::DEFAULT_FIELD_MANAGER.to_string() }
    }
}

type KubeDriver = Driver<KubeResourceLoader, KubeSourceResolver, KubeTargetStore>;

struct Context {
    driver: KubeDriver,
    shutdown: CancellationToken,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ReconcileError(String);

fn outcome_action(requeue_after: Option<std::time::Duration>) -> Action {
    match requeue_after {
        Some(d) => Action::requeue(d),
        None => Action::await_change(),
    }
}

/// Cancelled passes requeue quietly; only real failures reach `error_policy`.
fn outcome_result(outcome: ReconcileOutcome) -> Result<Action, ReconcileError> {
    match outcome.error {
        Some(_) if outcome.cancelled => Ok(outcome_action(outcome.requeue_after)),
        Some(text) if outcome.is_retrying() => Err(ReconcileError(text)),
        _ => Ok(outcome_action(outcome.requeue_after)),
    }
}

async fn reconcile(dr: Arc<DynamicResource>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let key = ObjectKey::new(dr.namespace().unwrap_or_default(), dr.name_any());
    outcome_result(ctx.driver.reconcile(&key, &ctx.shutdown).await)
}

fn error_policy(dr: Arc<DynamicResource>, error: &ReconcileError, ctx: Arc<Context>) -> Action {
    // The driver already logged the failure with its full context.
    debug!(resource = %dr.name_any(), error = %error, "requeue after failed reconcile");
    Action::requeue(ctx.driver.config().retry_interval)
}

/// Run the `DynamicResource` controller until a shutdown signal arrives.
pub async fn run(client: Client, config: RunConfig) -> Result<()> {
    let api: Api<DynamicResource> = Api::all(client.clone());
    api.list(&ListParams::default().limit(1))
        .await
        .context("DynamicResource CRD is not served; install it with `dynresctl crd | kubectl apply -f -`")?;

    let resources = Arc::new(ApiResources::new(client.clone()));
    let driver = Driver::new(
        KubeResourceLoader::new(client),
        KubeSourceResolver::new(resources.clone()),
        KubeTargetStore::new(resources, config.field_manager.clone()),
        config.driver.clone(),
    );
    let shutdown = CancellationToken::new();
    let ctx = Arc::new(Context { driver, shutdown: shutdown.clone() });

    // In-flight projections stop at their next fetch once a signal arrives.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    info!(
        field_manager = %config.field_manager,
        recheck = ?config.driver.recheck_interval,
        retry = ?config.driver.retry_interval,
        "DynamicResource controller started"
    );
    Controller::new(api, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| {
            match res {
                Ok((obj, action)) => debug!(resource = %obj.name, ?action, "reconciled"),
                // Already reported by the driver.
                Err(ControllerError::ReconcilerFailed(e, obj)) => debug!(resource = %obj, error = %e, "reconcile failed"),
                Err(e) => warn!(error = %e, "controller error"),
            }
            futures::future::ready(())
        })
        .await;
    info!("DynamicResource controller stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverState;
    use std::time::Duration;

    #[test]
    fn idle_without_requeue_waits_for_change() {
        assert_eq!(outcome_action(None), Action::await_change());
        assert_eq!(outcome_action(Some(Duration::from_secs(10))), Action::requeue(Duration::from_secs(10)));
    }

    fn outcome(state: DriverState, error: Option<&str>, cancelled: bool) -> ReconcileOutcome {
        ReconcileOutcome {
            state,
            requeue_after: Some(Duration::from_secs(7)),
            error: error.map(str::to_string),
            cancelled,
            transitions: vec![DriverState::Loading, state],
        }
    }

    #[test]
    fn cancelled_pass_requeues_without_error() {
        let out = outcome(DriverState::Retrying, Some("cancelled while persisting target"), true);
        assert_eq!(outcome_result(out).unwrap(), Action::requeue(Duration::from_secs(7)));
    }

    #[test]
    fn failed_pass_goes_through_error_policy() {
        let out = outcome(DriverState::Retrying, Some("persist target: forbidden"), false);
        let err = outcome_result(out).unwrap_err();
        assert_eq!(err.to_string(), "persist target: forbidden");

        let ok = outcome(DriverState::Idle, None, false);
        assert_eq!(outcome_result(ok).unwrap(), Action::requeue(Duration::from_secs(7)));
    }

    #[test]
    fn run_config_defaults_to_dynres_field_manager() {
        let c = RunConfig::default();
        assert_eq!(c.field_manager, "dynres");
        assert_eq!(c.driver, DriverConfig::default());
    }
}
