//! dynres kubehub: API resource lookup, source fetches and server-side apply
//! against a live cluster.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use dynres_core::{split_api_version, Document, SourceRef};
use dynres_engine::{SourceError, SourceResolver};
use kube::{
    api::{Api, Patch, PatchParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{self, Scope},
    Client,
};
use metrics::counter;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const DEFAULT_FIELD_MANAGER: &str = "dynres";

pub async fn get_kube_client() -> Result<Client> {
    Client::try_default().await.context("building kube client from kubeconfig or in-cluster env")
}

pub fn gvk_of(api_version: &str, kind: &str) -> GroupVersionKind {
    let (group, version) = split_api_version(api_version);
    GroupVersionKind::gvk(group, version, kind)
}

fn source_gvk(source: &SourceRef) -> GroupVersionKind {
    let (group, version) = source.group_version();
    GroupVersionKind::gvk(group, version, &source.kind)
}

fn gvk_key(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        format!("{}/{}", gvk.version, gvk.kind)
    } else {
        format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind)
    }
}

/// Pinned-kind discovery with a per-process cache; served kinds do not change
/// shape while the controller runs.
pub struct ApiResources {
    client: Client,
    cache: Mutex<HashMap<String, (ApiResource, bool)>>,
}

impl ApiResources {
    pub fn new(client: Client) -> Self { Self { client, cache: Mutex::new(HashMap::new()) } }

    pub fn client(&self) -> &Client { &self.client }

    /// Resolve `gvk` to its API resource and whether it is namespaced.
    pub async fn find(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, bool)> {
        let key = gvk_key(gvk);
        if let Some(hit) = self.cache.lock().ok().and_then(|c| c.get(&key).cloned()) {
            return Ok(hit);
        }
        let (ar, caps) = discovery::pinned_kind(&self.client, gvk)
            .await
            .with_context(|| format!("GVK not found: {key}"))?;
        let namespaced = matches!(caps.scope, Scope::Namespaced);
        debug!(gvk = %key, namespaced, "api resource discovered");
        if let Ok(mut c) = self.cache.lock() {
            c.insert(key, (ar.clone(), namespaced));
        }
        Ok((ar, namespaced))
    }

    /// Dynamic API handle; cluster-scoped kinds ignore `namespace`.
    pub async fn api_for(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Result<(Api<DynamicObject>, bool)> {
        let (ar, namespaced) = self.find(gvk).await?;
        let api = match (namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            (true, None) => return Err(anyhow!("namespace required for namespaced kind {}", gvk_key(gvk))),
            (false, _) => Api::all_with(self.client.clone(), &ar),
        };
        Ok((api, namespaced))
    }
}

fn strip_managed_fields(v: &mut Value) {
    if let Some(meta) = v.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.remove("managedFields");
    }
}

/// Reads sources straight from the API server. No caching across calls.
pub struct KubeSourceResolver {
    resources: Arc<ApiResources>,
}

impl KubeSourceResolver {
    pub fn new(resources: Arc<ApiResources>) -> Self { Self { resources } }

    async fn get(&self, source: &SourceRef, namespace: &str) -> Result<Document, SourceError> {
        let gvk = source_gvk(source);
        let (api, _) = self.resources.api_for(&gvk, Some(namespace)).await?;
        let obj = api
            .get_opt(&source.name)
            .await
            .with_context(|| format!("get {} '{}/{}'", source.gvk_key(), namespace, source.name))?;
        let Some(obj) = obj else {
            counter!("source_not_found", 1u64);
            return Err(SourceError::not_found(source, namespace));
        };
        let mut raw = serde_json::to_value(&obj).context("serializing DynamicObject")?;
        strip_managed_fields(&mut raw);
        Ok(raw)
    }
}

#[async_trait::async_trait]
impl SourceResolver for KubeSourceResolver {
    async fn fetch(&self, source: &SourceRef, namespace: &str, cancel: &CancellationToken) -> Result<Document, SourceError> {
        counter!("source_fetches", 1u64);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SourceError::Cancelled),
            res = self.get(source, namespace) => res,
        }
    }
}

/// Identity of a projected target as declared in the document itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetIdentity {
    pub gvk: GroupVersionKind,
    pub name: String,
}

fn str_field<'a>(v: Option<&'a Value>, what: &str) -> Result<&'a str> {
    v.and_then(Value::as_str).filter(|s| !s.is_empty()).ok_or_else(|| anyhow!("target missing {what}"))
}

pub fn target_identity(doc: &Value) -> Result<TargetIdentity> {
    let api_version = str_field(doc.get("apiVersion"), "apiVersion")?;
    let kind = str_field(doc.get("kind"), "kind")?;
    let name = str_field(doc.get("metadata").and_then(|m| m.get("name")), "metadata.name")?;
    Ok(TargetIdentity { gvk: gvk_of(api_version, kind), name: name.to_string() })
}

/// Set `metadata.namespace` when the document does not carry one.
/// Returns the namespace the document ends up in.
fn default_namespace(doc: &mut Value, namespace: &str) -> Result<String> {
    let obj = doc.as_object_mut().ok_or_else(|| anyhow!("target is not an object"))?;
    let meta = obj
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| anyhow!("target metadata is not an object"))?;
    match meta.get("namespace").and_then(Value::as_str).filter(|s| !s.is_empty()) {
        Some(ns) => Ok(ns.to_string()),
        None => {
            meta.insert("namespace".into(), Value::String(namespace.to_string()));
            Ok(namespace.to_string())
        }
    }
}

/// Create-or-update through server-side apply.
pub struct KubeTargetStore {
    resources: Arc<ApiResources>,
    field_manager: String,
}

impl KubeTargetStore {
    pub fn new(resources: Arc<ApiResources>, field_manager: impl Into<String>) -> Self {
        Self { resources, field_manager: field_manager.into() }
    }

    pub fn field_manager(&self) -> &str { &self.field_manager }

    /// Apply `target`, defaulting a namespaced target into `namespace`.
    /// Returns the new resourceVersion if the server reported one.
    pub async fn apply(&self, target: &Document, namespace: &str) -> Result<Option<String>> {
        let id = target_identity(target)?;
        let (ar, namespaced) = self.resources.find(&id.gvk).await?;
        let mut doc = target.clone();
        let api: Api<DynamicObject> = if namespaced {
            let ns = default_namespace(&mut doc, namespace)?;
            Api::namespaced_with(self.resources.client().clone(), &ns, &ar)
        } else {
            Api::all_with(self.resources.client().clone(), &ar)
        };
        let pp = PatchParams::apply(self.field_manager()).force();
        let obj = api
            .patch(&id.name, &pp, &Patch::Apply(&doc))
            .await
            .with_context(|| format!("server-side apply of {} '{}'", gvk_key(&id.gvk), id.name))?;
        let rv = obj.metadata.resource_version.clone();
        info!(gvk = %gvk_key(&id.gvk), name = %id.name, rv = ?rv, manager = %self.field_manager(), "target applied");
        Ok(rv)
    }
}
