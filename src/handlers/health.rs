//! Home, liveness and fallback handlers.
//!
//! - `GET /` - Plain-text greeting
//! - `GET /healthz` - Liveness probe, always `OK` while the process serves
//! - anything else - `404` JSON envelope
//! - a known path with the wrong method - `405` JSON envelope

use axum::Extension;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::middleware::RequestId;
use crate::models::Envelope;

pub async fn home() -> &'static str {
    "Welcome to Playground!"
}

/// Liveness probe.
///
/// ```yaml
/// livenessProbe:
///   httpGet:
///     path: /healthz
///     port: 8080
/// ```
pub async fn healthz() -> &'static str {
    "OK"
}

pub async fn not_found(request_id: Option<Extension<RequestId>>) -> impl IntoResponse {
    let request_id = request_id.map(|Extension(id)| id);

    Envelope::from_status(StatusCode::NOT_FOUND)
        .with_request_id(request_id.as_ref().map(RequestId::as_str))
}

/// Answer for a known path requested with an unsupported method.
pub async fn method_not_allowed(request_id: Option<Extension<RequestId>>) -> impl IntoResponse {
    let request_id = request_id.map(|Extension(id)| id);

    Envelope::error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
        .with_request_id(request_id.as_ref().map(RequestId::as_str))
}
