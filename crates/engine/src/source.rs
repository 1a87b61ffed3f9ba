//! Source resolution seam.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dynres_core::{Document, SourceRef};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source {kind} '{namespace}/{name}' ({api_version}) not found")]
    NotFound { api_version: String, kind: String, namespace: String, name: String },
    #[error("source fetch cancelled")]
    Cancelled,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl SourceError {
    pub fn not_found(source: &SourceRef, namespace: &str) -> Self {
        Self::NotFound {
            api_version: source.api_version.clone(),
            kind: source.kind.clone(),
            namespace: namespace.to_string(),
            name: source.name.clone(),
        }
    }
}

/// Fetches source documents by reference. Implementations must not retry on
/// their own; absence is reported as [`SourceError::NotFound`].
#[async_trait::async_trait]
pub trait SourceResolver: Send + Sync {
    async fn fetch(&self, source: &SourceRef, namespace: &str, cancel: &CancellationToken) -> Result<Document, SourceError>;
}

#[async_trait::async_trait]
impl<T: SourceResolver + ?Sized> SourceResolver for Arc<T> {
    async fn fetch(&self, source: &SourceRef, namespace: &str, cancel: &CancellationToken) -> Result<Document, SourceError> {
        (**self).fetch(source, namespace, cancel).await
    }
}

type Key = (String, String, String, String);

/// In-memory resolver over a fixed set of documents. Documents stored without
/// a namespace match lookups from any namespace.
#[derive(Debug, Default)]
pub struct StaticSourceResolver {
    docs: HashMap<Key, Document>,
    fetched: Mutex<Vec<SourceRef>>,
}

impl StaticSourceResolver {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&mut self, namespace: &str, source: &SourceRef, doc: Document) {
        let key = (namespace.to_string(), source.api_version.clone(), source.kind.clone(), source.name.clone());
        self.docs.insert(key, doc);
    }

    pub fn with(mut self, namespace: &str, source: &SourceRef, doc: Document) -> Self {
        self.insert(namespace, source, doc);
        self
    }

    /// Store a document under the identity it declares (`apiVersion`, `kind`,
    /// `metadata.name`, optional `metadata.namespace`).
    pub fn insert_document(&mut self, doc: Document) -> anyhow::Result<()> {
        let field = |v: Option<&Value>, what: &str| -> anyhow::Result<String> {
            v.and_then(Value::as_str).map(str::to_string).ok_or_else(|| anyhow::anyhow!("source document missing {what}"))
        };
        let api_version = field(doc.get("apiVersion"), "apiVersion")?;
        let kind = field(doc.get("kind"), "kind")?;
        let meta = doc.get("metadata");
        let name = field(meta.and_then(|m| m.get("name")), "metadata.name")?;
        let namespace = meta.and_then(|m| m.get("namespace")).and_then(Value::as_str).unwrap_or("").to_string();
        self.docs.insert((namespace, api_version, kind, name), doc);
        Ok(())
    }

    /// Every reference fetched so far, in call order.
    pub fn fetched(&self) -> Vec<SourceRef> {
        self.fetched.lock().map(|f| f.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl SourceResolver for StaticSourceResolver {
    async fn fetch(&self, source: &SourceRef, namespace: &str, cancel: &CancellationToken) -> Result<Document, SourceError> {
        if cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }
        if let Ok(mut f) = self.fetched.lock() {
            f.push(source.clone());
        }
        let lookup = |ns: &str| {
            self.docs.get(&(ns.to_string(), source.api_version.clone(), source.kind.clone(), source.name.clone()))
        };
        lookup(namespace)
            .or_else(|| lookup(""))
            .cloned()
            .ok_or_else(|| SourceError::not_found(source, namespace))
    }
}
