//! Offline projection: run a `DynamicResource` against source manifests on disk.

use anyhow::{anyhow, Context, Result};
use dynres_controller::DynamicResource;
use dynres_engine::{CancellationToken, Projector, StaticSourceResolver};
use serde::Deserialize;
use serde_json::Value as Json;

/// Owner uid used when the manifest has never been stored by an API server.
pub const OFFLINE_UID: &str = "00000000-0000-0000-0000-000000000000";

fn max_yaml_bytes() -> usize {
    std::env::var("DYNRES_MAX_YAML_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1_000_000)
}

/// All non-empty documents of a (possibly multi-document) YAML stream.
pub fn parse_documents(yaml: &str) -> Result<Vec<Json>> {
    if yaml.len() > max_yaml_bytes() {
        return Err(anyhow!("YAML payload too large (>{} bytes)", max_yaml_bytes()));
    }
    let mut out = Vec::new();
    for de in serde_yaml::Deserializer::from_str(yaml) {
        let val = serde_yaml::Value::deserialize(de).context("parsing YAML")?;
        if val.is_null() {
            continue;
        }
        out.push(serde_json::to_value(val).context("converting YAML to JSON")?);
    }
    Ok(out)
}

/// Parse a single `DynamicResource`, filling namespace and uid for offline use.
pub fn load_resource(yaml: &str, ns_override: Option<&str>) -> Result<DynamicResource> {
    let mut docs = parse_documents(yaml)?;
    if docs.len() != 1 {
        return Err(anyhow!("expected exactly one DynamicResource document, found {}", docs.len()));
    }
    let mut dr: DynamicResource = serde_json::from_value(docs.remove(0)).context("decoding DynamicResource")?;
    if let Some(ns) = ns_override {
        dr.metadata.namespace = Some(ns.to_string());
    }
    dr.metadata.namespace.get_or_insert_with(|| "default".to_string());
    dr.metadata.uid.get_or_insert_with(|| OFFLINE_UID.to_string());
    Ok(dr)
}

pub fn resolver_from(sources: &[Json]) -> Result<StaticSourceResolver> {
    let mut resolver = StaticSourceResolver::new();
    for (i, doc) in sources.iter().enumerate() {
        resolver.insert_document(doc.clone()).with_context(|| format!("source document {i}"))?;
    }
    Ok(resolver)
}

pub async fn project(resource_yaml: &str, source_yamls: &[String], ns_override: Option<&str>) -> Result<Json> {
    let dr = load_resource(resource_yaml, ns_override)?;
    let resource = dr.compile()?;
    let mut sources = Vec::new();
    for y in source_yamls {
        sources.extend(parse_documents(y)?);
    }
    let projector = Projector::new(resolver_from(&sources)?);
    let target = projector.project(&resource, &CancellationToken::new()).await?;
    Ok(target)
}
