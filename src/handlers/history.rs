//! Calculation history endpoint.
//!
//! `GET /history?limit=N` (also under `/api/v1`) returns the most recent recorded calculations,
//! newest first. Missing, non-numeric or non-positive limits fall back to
//! `HISTORY_DEFAULT_LIMIT`.
//!
//! Recording is write-behind, so a calculation answered a moment ago may not
//! be listed yet.

use axum::Extension;
use axum::extract::{RawQuery, State};
use tracing::instrument;

use crate::error::ApiError;
use crate::middleware::RequestId;
use crate::models::{Envelope, HistoryQuery, StoredRecord};
use crate::state::AppState;
use crate::validation::parse_limit;

#[instrument(skip(state, query, request_id))]
pub async fn history(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    request_id: Option<Extension<RequestId>>,
) -> Result<Envelope<Vec<StoredRecord>>, ApiError> {
    let request_id = request_id.map(|Extension(id)| id);
    let request_id = request_id.as_ref().map(RequestId::as_str);

    let query = HistoryQuery::from_raw(query.as_deref());
    let limit = parse_limit(query.limit.as_deref(), state.config.history_default_limit);
    let records = state
        .calculator
        .history(limit)
        .await
        .map_err(|e| e.with_request_id(request_id))?;

    Ok(Envelope::ok(records).with_request_id(request_id))
}
