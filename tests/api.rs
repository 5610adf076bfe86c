//! HTTP surface: status codes per resolution outcome and the operational routes.

mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use common::{Answer, CountingBackend};
use logsnarf::api::{self, AppState};
use logsnarf::credentials::BackendError;
use logsnarf::destination::HttpWriterFactory;
use logsnarf::ingest::Pipeline;
use logsnarf::metrics::Metrics;
use logsnarf::resolver::{Resolver, ResolverConfig};

const LINE: &str =
    "<13>1 2024-03-01T12:00:01Z host app web.1 - State changed from starting to up\n";

fn app(backend: &Arc<CountingBackend>) -> Router {
    let metrics = Metrics::new().unwrap();
    let resolver = Resolver::new(backend.clone(), ResolverConfig::default())
        .with_metrics(metrics.clone());
    let writers = HttpWriterFactory::new(std::time::Duration::from_secs(1), 0).unwrap();
    let pipeline = Pipeline::new(Arc::new(resolver), Arc::new(writers)).with_metrics(metrics.clone());
    api::router(Arc::new(AppState { pipeline, metrics }))
}

fn ingress(token: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/ingress/{}", token))
        .header("content-type", "application/logplex-1")
        .body(body.into())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(res: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(res.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_known_token_is_accepted() {
    let backend = CountingBackend::with_tenants(&["acme"]);
    let res = app(&backend).oneshot(ingress("acme", LINE)).await.unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_unknown_token_is_forbidden() {
    let backend = CountingBackend::new();
    let res = app(&backend).oneshot(ingress("ghost", LINE)).await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let json = body_json(res).await;
    assert_eq!(json["error"]["code"], "unknown_token");
}

#[tokio::test]
async fn test_malformed_record_looks_like_unknown_token() {
    let backend = CountingBackend::new();
    backend.tenant("nameless", "");
    let res = app(&backend).oneshot(ingress("nameless", LINE)).await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let json = body_json(res).await;
    assert_eq!(json["error"]["code"], "unknown_token");
    assert_eq!(json["error"]["message"], "bad credentials");
}

#[tokio::test]
async fn test_store_outage_is_service_unavailable() {
    let backend = CountingBackend::new();
    backend.answer("acme", Answer::Fail(BackendError::Unavailable("pool timed out".into())));
    let res = app(&backend).oneshot(ingress("acme", LINE)).await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(res.headers()["retry-after"], "5");
}

#[tokio::test]
async fn test_whitespace_token_is_bad_request() {
    let backend = CountingBackend::with_tenants(&["acme"]);
    let res = app(&backend).oneshot(ingress("ac%20me", LINE)).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_non_utf8_body_is_bad_request() {
    let backend = CountingBackend::with_tenants(&["acme"]);
    let res = app(&backend)
        .oneshot(ingress("acme", vec![0xff, 0xfe, 0x00]))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_healthz() {
    let backend = CountingBackend::new();
    let res = app(&backend).oneshot(get("/healthz")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_stats_reflect_resolutions() {
    let backend = CountingBackend::with_tenants(&["acme"]);
    let app = app(&backend);

    for _ in 0..3 {
        let res = app.clone().oneshot(ingress("acme", LINE)).await.unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
    }

    let res = app.oneshot(get("/stats")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json["backend"], "counting");
    assert_eq!(json["resolver"]["lookups"], 3);
    assert_eq!(json["resolver"]["hits"], 2);
    assert_eq!(json["resolver"]["backend_calls"], 1);
    assert_eq!(json["resolver"]["cached"], 1);
    assert_eq!(json["resolver"]["capacity"], 1000);
}

#[tokio::test]
async fn test_metrics_exposition() {
    let backend = CountingBackend::with_tenants(&["acme"]);
    let app = app(&backend);
    app.clone().oneshot(ingress("acme", LINE)).await.unwrap();
    app.clone().oneshot(ingress("ghost", LINE)).await.unwrap();

    let res = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let bytes = to_bytes(res.into_body(), 1024 * 1024).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("logsnarf_credential_resolutions_total{outcome=\"miss\"} 1"));
    assert!(text.contains("logsnarf_credential_resolutions_total{outcome=\"unknown_token\"} 1"));
    assert!(text.contains("logsnarf_batches_dropped_total{reason=\"unknown_token\"} 1"));
}

#[tokio::test]
async fn test_request_id_is_generated_or_echoed() {
    let backend = CountingBackend::new();
    let app = app(&backend);

    let res = app.clone().oneshot(get("/healthz")).await.unwrap();
    let generated = res.headers()["x-request-id"].to_str().unwrap();
    assert!(uuid::Uuid::parse_str(generated).is_ok());

    let req = Request::builder()
        .uri("/healthz")
        .header("x-request-id", "d7c1e2a0-drain")
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.headers()["x-request-id"], "d7c1e2a0-drain");
}
