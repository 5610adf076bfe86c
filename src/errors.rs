use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::destination::WriteError;
use crate::ingest::IngestError;
use crate::resolver::ResolveError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("destination write failed: {0}")]
    Write(#[from] WriteError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<IngestError> for AppError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Resolve(e) => AppError::Resolve(e),
            IngestError::Write(e) => AppError::Write(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::Resolve(ResolveError::InvalidToken) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_token",
                "missing or malformed token".to_string(),
            ),
            // malformed records answer exactly like unknown tokens
            AppError::Resolve(e) if e.is_unknown() => (
                StatusCode::FORBIDDEN,
                "authentication_error",
                "unknown_token",
                "bad credentials".to_string(),
            ),
            AppError::Resolve(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable_error",
                "credentials_unavailable",
                "credential store unavailable, retry later".to_string(),
            ),
            AppError::Write(e) => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                "destination_write_failed",
                e.to_string(),
            ),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "bad_request",
                msg.clone(),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        let mut response = (status, body).into_response();

        if status == StatusCode::SERVICE_UNAVAILABLE {
            response.headers_mut().insert(
                "retry-after",
                axum::http::HeaderValue::from_static("5"),
            );
        }

        response
    }
}
