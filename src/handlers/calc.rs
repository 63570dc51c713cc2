//! Arithmetic handlers.
//!
//! # Endpoints
//!
//! - `GET /add?a=&b=`
//! - `GET /subtract?a=&b=`
//! - `GET /multiply?a=&b=`
//! - `GET /divide?a=&b=`
//!
//! Each is mounted under `/api/v1` and at the root. Operands are signed
//! 64-bit integers; when a parameter repeats, its first value is used. The result is returned immediately; recording it happens
//! write-behind.
//!
//! # Response Body
//!
//! ```json
//! { "code": 200, "message": "OK", "data": { "result": 3 }, "request_id": "..." }
//! ```

use axum::Extension;
use axum::extract::{RawQuery, State};
use tracing::instrument;

use crate::error::ApiError;
use crate::middleware::{ClientIp, RequestId};
use crate::models::{CalcResult, Envelope, OperandsQuery, Operation};
use crate::state::AppState;
use crate::validation::parse_operands;

type CalcResponse = Result<Envelope<CalcResult>, ApiError>;

#[instrument(skip(state, query, request_id, client_ip))]
pub async fn add(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    request_id: Option<Extension<RequestId>>,
    client_ip: Option<Extension<ClientIp>>,
) -> CalcResponse {
    calculate(&state, Operation::Add, query.as_deref(), request_id, client_ip)
}

#[instrument(skip(state, query, request_id, client_ip))]
pub async fn subtract(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    request_id: Option<Extension<RequestId>>,
    client_ip: Option<Extension<ClientIp>>,
) -> CalcResponse {
    calculate(&state, Operation::Subtract, query.as_deref(), request_id, client_ip)
}

#[instrument(skip(state, query, request_id, client_ip))]
pub async fn multiply(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    request_id: Option<Extension<RequestId>>,
    client_ip: Option<Extension<ClientIp>>,
) -> CalcResponse {
    calculate(&state, Operation::Multiply, query.as_deref(), request_id, client_ip)
}

#[instrument(skip(state, query, request_id, client_ip))]
pub async fn divide(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    request_id: Option<Extension<RequestId>>,
    client_ip: Option<Extension<ClientIp>>,
) -> CalcResponse {
    calculate(&state, Operation::Divide, query.as_deref(), request_id, client_ip)
}

fn calculate(
    state: &AppState,
    operation: Operation,
    query: Option<&str>,
    request_id: Option<Extension<RequestId>>,
    client_ip: Option<Extension<ClientIp>>,
) -> CalcResponse {
    let request_id = request_id.map(|Extension(id)| id);
    let request_id = request_id.as_ref().map(RequestId::as_str);
    // Outside the pipeline (e.g. router-only tests) no identity was resolved
    let client_ip = client_ip.map_or_else(ClientIp::unknown, |Extension(ip)| ip);

    let query = OperandsQuery::from_raw(query);
    let (a, b) = parse_operands(query.a.as_deref(), query.b.as_deref())
        .map_err(|e| e.with_request_id(request_id))?;

    let result = state
        .calculator
        .calculate(operation, a, b, client_ip.as_str(), request_id)
        .map_err(|e| e.with_request_id(request_id))?;

    Ok(Envelope::ok(CalcResult { result }).with_request_id(request_id))
}
