use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::validation::query_param;

/// Uniform response body for every JSON endpoint.
///
/// ```json
/// { "code": 200, "message": "OK", "data": { "result": 3 }, "request_id": "..." }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// HTTP status code, repeated in the body
    pub code: u16,
    /// Human-readable status or error message
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl<T> Envelope<T> {
    /// 200 OK envelope carrying `data`.
    pub fn ok(data: T) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            message: canonical_reason(StatusCode::OK),
            data: Some(data),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: Option<&str>) -> Self {
        self.request_id = request_id.map(str::to_string);
        self
    }

    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl Envelope<()> {
    /// Error envelope with no data.
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code: status.as_u16(),
            message: message.into(),
            data: None,
            request_id: None,
        }
    }

    /// Error envelope whose message is the status's canonical reason phrase
    /// (e.g. `"Too Many Requests"`).
    pub fn from_status(status: StatusCode) -> Self {
        Self::error(status, canonical_reason(status))
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self)).into_response()
    }
}

fn canonical_reason(status: StatusCode) -> String {
    status.canonical_reason().unwrap_or("Unknown").to_string()
}

/// Result payload of an arithmetic operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalcResult {
    pub result: i64,
}

/// Raw `?a=&b=` operands; parsed and validated by the handler.
#[derive(Debug, Default)]
pub struct OperandsQuery {
    pub a: Option<String>,
    pub b: Option<String>,
}

impl OperandsQuery {
    /// Pick `a` and `b` out of a raw query string, first occurrence wins.
    pub fn from_raw(raw: Option<&str>) -> Self {
        Self {
            a: query_param(raw, "a"),
            b: query_param(raw, "b"),
        }
    }
}

/// Raw `?limit=` for the history endpoint.
#[derive(Debug, Default)]
pub struct HistoryQuery {
    pub limit: Option<String>,
}

impl HistoryQuery {
    pub fn from_raw(raw: Option<&str>) -> Self {
        Self {
            limit: query_param(raw, "limit"),
        }
    }
}
