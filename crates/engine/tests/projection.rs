#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use dynres_core::{Dialect, Document, OwnerRef, SourceRef};
use dynres_engine::{
    CancellationToken, ControllingResource, ProjectionError, Projector, SourceError, SourceResolver, StaticSourceResolver,
    Transformation,
};
use dynres_selector::SelectorError;
use serde_json::json;

fn owner() -> OwnerRef {
    OwnerRef::controller("dynres.dev/v1alpha1", "DynamicResource", "token-copy", "8d1c0a44-7d39-4a8e-9d7f-1f1c2b3a4d5e")
}

fn secret(name: &str) -> SourceRef { SourceRef::new("v1", "Secret", name) }

fn tr(source: SourceRef, dialect: Dialect, spec: &str, dest: &str) -> Transformation {
    Transformation::compile(0, source, dialect, spec, dest).unwrap()
}

fn controlling(target: Document, transformations: Vec<Transformation>) -> ControllingResource {
    ControllingResource { owner: owner(), namespace: "apps".into(), target, transformations }
}

#[tokio::test]
async fn end_to_end_copies_token_into_secret() {
    let issuer = SourceRef::new("example.dev/v1", "TokenIssuer", "issuer");
    let resolver = StaticSourceResolver::new().with("apps", &issuer, json!({ "status": { "token": "abc123" } }));
    let res = controlling(
        json!({ "kind": "Secret", "data": {} }),
        vec![tr(issuer, Dialect::Path, "status.token", "data.value")],
    );

    let out = Projector::new(resolver).project(&res, &CancellationToken::new()).await.unwrap();

    assert_eq!(out, json!({
        "kind": "Secret",
        "data": { "value": "abc123" },
        "metadata": { "ownerReferences": [ {
            "apiVersion": "dynres.dev/v1alpha1",
            "kind": "DynamicResource",
            "name": "token-copy",
            "uid": "8d1c0a44-7d39-4a8e-9d7f-1f1c2b3a4d5e",
            "controller": true,
            "blockOwnerDeletion": true
        } ] }
    }));
}

#[tokio::test]
async fn projection_is_idempotent_and_does_not_duplicate_owner() {
    let a = secret("a");
    let resolver = StaticSourceResolver::new().with("apps", &a, json!({ "data": { "x": "1" } }));
    let projector = Projector::new(resolver);
    let res = controlling(json!({ "kind": "ConfigMap" }), vec![tr(a, Dialect::Path, "data.x", "data.x")]);

    let first = projector.project(&res, &CancellationToken::new()).await.unwrap();
    let second = projector.project(&res, &CancellationToken::new()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(serde_json::to_vec(&first).unwrap(), serde_json::to_vec(&second).unwrap());

    // Feeding the output back as skeleton keeps a single owner reference.
    let again = controlling(first.clone(), res.transformations.clone());
    let third = projector.project(&again, &CancellationToken::new()).await.unwrap();
    assert_eq!(third, first);
    assert_eq!(third["metadata"]["ownerReferences"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn later_transformations_win() {
    let a = secret("a");
    let b = secret("b");
    let resolver = StaticSourceResolver::new()
        .with("apps", &a, json!({ "v": "from-a" }))
        .with("apps", &b, json!({ "v": "from-b" }));
    let res = controlling(json!({}), vec![
        tr(a, Dialect::Path, "v", "path.x"),
        tr(b, Dialect::Path, "v", "path.x"),
    ]);
    let out = Projector::new(resolver).project(&res, &CancellationToken::new()).await.unwrap();
    assert_eq!(out["path"]["x"], json!("from-b"));
}

#[tokio::test]
async fn fail_fast_stops_at_first_error() {
    let a = secret("a");
    let b = secret("b");
    let c = secret("c");
    let resolver = StaticSourceResolver::new()
        .with("apps", &a, json!({ "v": "ok" }))
        .with("apps", &b, json!({ "other": "x" }))
        .with("apps", &c, json!({ "v": "never" }));
    let res = controlling(json!({}), vec![
        tr(a.clone(), Dialect::Path, "v", "out.a"),
        tr(b.clone(), Dialect::Path, "v", "out.b"),
        tr(c, Dialect::Path, "v", "out.c"),
    ]);
    let projector = Projector::new(resolver);
    let err = projector.project(&res, &CancellationToken::new()).await.unwrap_err();

    assert_eq!(err.index(), Some(1));
    assert!(matches!(err, ProjectionError::Select { index: 1, source: SelectorError::FieldNotFound { .. } }));
    assert!(err.to_string().starts_with("transformation 1: resolve field:"), "{err}");
    assert_eq!(projector.resolver().fetched(), vec![a, b]);
}

#[tokio::test]
async fn missing_source_propagates_not_found() {
    let res = controlling(json!({}), vec![tr(secret("ghost"), Dialect::Path, "v", "x")]);
    let err = Projector::new(StaticSourceResolver::new()).project(&res, &CancellationToken::new()).await.unwrap_err();
    match err {
        ProjectionError::Fetch { index: 0, source: SourceError::NotFound { name, namespace, .. } } => {
            assert_eq!(name, "ghost");
            assert_eq!(namespace, "apps");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn query_cardinality_errors_surface() {
    let pod = SourceRef::new("v1", "Pod", "web");
    let resolver = StaticSourceResolver::new().with("apps", &pod, json!({
        "spec": { "containers": [ { "name": "a" }, { "name": "b" } ] }
    }));
    let projector = Projector::new(resolver);

    let none = controlling(json!({}), vec![tr(pod.clone(), Dialect::JsonPath, "{.status.podIP}", "ip")]);
    let err = projector.project(&none, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ProjectionError::Select { source: SelectorError::NoResult { .. }, .. }));

    let many = controlling(json!({}), vec![tr(pod, Dialect::JsonPath, "{.spec.containers[*].name}", "name")]);
    let err = projector.project(&many, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ProjectionError::Select { source: SelectorError::Ambiguous { count: 2, .. }, .. }));
}

#[tokio::test]
async fn path_conflict_returns_no_document() {
    let a = secret("a");
    let resolver = StaticSourceResolver::new().with("apps", &a, json!({ "v": "x" }));
    let res = controlling(json!({ "a": { "b": 5 } }), vec![tr(a, Dialect::Path, "v", "a.b.c")]);
    let err = Projector::new(resolver).project(&res, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ProjectionError::Write { index: 0, .. }));
    assert_eq!(res.target, json!({ "a": { "b": 5 } }));
}

#[tokio::test]
async fn mixed_dialects_compose_into_one_target() {
    let db = SourceRef::new("example.dev/v1", "Database", "orders");
    let resolver = StaticSourceResolver::new().with("apps", &db, json!({
        "spec": { "port": 5432, "user": "orders" },
        "status": { "endpoints": [ { "role": "primary", "host": "10.0.0.4" }, { "role": "replica", "host": "10.0.0.5" } ] }
    }));
    let res = controlling(json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "orders-db" } }), vec![
        tr(db.clone(), Dialect::Path, "spec.user", "data.user"),
        tr(db.clone(), Dialect::JsonPath, r#"{.status.endpoints[?(@.role=="primary")].host}"#, "data.host"),
        tr(db, Dialect::Template, "postgres://{{ spec.user }}@{{ status.endpoints[0].host }}:{{ spec.port }}", "data.url"),
    ]);
    let out = Projector::new(resolver).project(&res, &CancellationToken::new()).await.unwrap();
    assert_eq!(out["data"], json!({
        "user": "orders",
        "host": "10.0.0.4",
        "url": "postgres://orders@10.0.0.4:5432"
    }));
    assert_eq!(out["metadata"]["name"], json!("orders-db"));
}

#[tokio::test]
async fn cancelled_token_aborts_before_any_fetch() {
    let a = secret("a");
    let resolver = StaticSourceResolver::new().with("apps", &a, json!({ "v": "x" }));
    let res = controlling(json!({}), vec![tr(a, Dialect::Path, "v", "x")]);
    let token = CancellationToken::new();
    token.cancel();
    let projector = Projector::new(resolver);
    let err = projector.project(&res, &token).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.index(), Some(0));
    assert!(projector.resolver().fetched().is_empty());
}

/// Cancels the shared token while serving the first fetch.
struct CancelAfterFirst {
    inner: StaticSourceResolver,
    token: CancellationToken,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl SourceResolver for CancelAfterFirst {
    async fn fetch(&self, source: &SourceRef, namespace: &str, cancel: &CancellationToken) -> Result<Document, SourceError> {
        let doc = self.inner.fetch(source, namespace, cancel).await;
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.token.cancel();
        }
        doc
    }
}

#[tokio::test]
async fn cancellation_between_transformations_stops_the_run() {
    let a = secret("a");
    let b = secret("b");
    let token = CancellationToken::new();
    let resolver = CancelAfterFirst {
        inner: StaticSourceResolver::new().with("apps", &a, json!({ "v": "1" })).with("apps", &b, json!({ "v": "2" })),
        token: token.clone(),
        calls: AtomicUsize::new(0),
    };
    let res = controlling(json!({}), vec![tr(a, Dialect::Path, "v", "x"), tr(b, Dialect::Path, "v", "y")]);
    let projector = Projector::new(resolver);
    let err = projector.project(&res, &token).await.unwrap_err();
    assert!(matches!(err, ProjectionError::Cancelled { index: 1 }));
    assert_eq!(projector.resolver().calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn namespace_less_documents_match_any_namespace() {
    let mut resolver = StaticSourceResolver::new();
    resolver
        .insert_document(json!({ "apiVersion": "v1", "kind": "Node", "metadata": { "name": "n1" }, "status": { "zone": "eu-1" } }))
        .unwrap();
    assert!(resolver.insert_document(json!({ "kind": "Node" })).is_err());
    let res = controlling(json!({}), vec![tr(SourceRef::new("v1", "Node", "n1"), Dialect::Path, "status.zone", "zone")]);
    let out = Projector::new(resolver).project(&res, &CancellationToken::new()).await.unwrap();
    assert_eq!(out["zone"], json!("eu-1"));
}
