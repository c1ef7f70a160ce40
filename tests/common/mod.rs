//! Common test utilities shared across integration tests.

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use taskd::{DenylistValidator, DisabledDispatcher, LocalRunner, Orchestrator, TaskStore};
use tower::ServiceExt;

/// An orchestrator that never reaches a cluster and runs commands with `sh -c`.
pub fn local_orchestrator<S: TaskStore>(store: Arc<S>) -> Orchestrator<S> {
    Orchestrator::new(
        store,
        Arc::new(DenylistValidator::default()),
        Arc::new(DisabledDispatcher),
        Arc::new(LocalRunner::new()),
    )
}

/// Send one request through the router and decode the JSON body.
///
/// Empty bodies decode to `Value::Null`.
pub async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    match body {
        Some(json) => send_raw(router, method, uri, "application/json", json.to_string()).await,
        None => {
            let request = Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap();
            dispatch(router, request).await
        }
    }
}

/// Send a body verbatim with the given content type.
pub async fn send_raw(
    router: &Router,
    method: Method,
    uri: &str,
    content_type: &str,
    body: impl Into<Body>,
) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", content_type)
        .body(body.into())
        .unwrap();
    dispatch(router, request).await
}

async fn dispatch(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}
