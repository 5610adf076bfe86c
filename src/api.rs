use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::ingest::Pipeline;
use crate::metrics::Metrics;

/// Shared application state passed to handlers.
pub struct AppState {
    pub pipeline: Pipeline,
    pub metrics: Metrics,
}

/// Ingress bodies above this size are refused.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

const REQUEST_ID: &str = "x-request-id";

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints (no auth)
        .route("/healthz", get(|| async { "ok" }))
        .route("/metrics", get(metrics_handler))
        .route("/stats", get(stats_handler))
        .route("/ingress/:token", post(ingress_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(request_id_middleware))
}

/// Tags every response with an X-Request-Id, echoing the drain's own id
/// when it sent one.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = req
        .headers()
        .get(REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert(REQUEST_ID, val);
    }
    resp
}

async fn ingress_handler(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let body = std::str::from_utf8(&body)
        .map_err(|_| AppError::BadRequest("body is not valid UTF-8".into()))?;
    let report = state.pipeline.ingest(&token, body).await?;
    tracing::debug!(
        lines = report.lines,
        points = report.points,
        unparsed = report.unparsed,
        "ingress handled"
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let resolver = state.pipeline.resolver();
    Json(serde_json::json!({
        "backend": resolver.backend_kind(),
        "resolver": resolver.stats(),
    }))
}
