use crate::error::{AppError, AppResult};

// =============================================================================
// Validation Constants
// =============================================================================

/// Message for a missing `a` or `b` query parameter.
pub const MSG_PARAMETER_REQUIRED: &str = "Parameter is required";

/// Message for a parameter that is not a base-10 integer.
pub const MSG_INVALID_PARAMETER: &str = "Invalid parameter format";

/// Default number of history records returned.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Parse one calculator operand.
///
/// Rules:
/// - Must be present and non-empty
/// - Must be a signed base-10 integer that fits in an `i64`
/// - Surrounding whitespace is not accepted
pub fn parse_operand(raw: Option<&str>) -> AppResult<i64> {
    let raw = match raw {
        Some(value) if !value.is_empty() => value,
        _ => return Err(AppError::BadRequest(MSG_PARAMETER_REQUIRED.to_string())),
    };

    raw.parse::<i64>()
        .map_err(|_| AppError::BadRequest(MSG_INVALID_PARAMETER.to_string()))
}

/// Parse both operands, reporting the first failure.
pub fn parse_operands(a: Option<&str>, b: Option<&str>) -> AppResult<(i64, i64)> {
    Ok((parse_operand(a)?, parse_operand(b)?))
}

/// Value of the first `key` parameter in a raw query string.
///
/// Later repeats of the same key are ignored, so `a=1&a=2` yields `1`.
/// Values are percent-decoded and `+` reads as a space.
pub fn query_param(raw: Option<&str>, key: &str) -> Option<String> {
    form_urlencoded::parse(raw?.as_bytes())
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.into_owned())
}

/// Resolve the `limit` query parameter for the history endpoint.
///
/// Absent, unparsable, zero or negative values fall back to `default`.
pub fn parse_limit(raw: Option<&str>, default: usize) -> usize {
    raw.and_then(|value| value.parse::<i64>().ok())
        .filter(|&limit| limit > 0)
        .and_then(|limit| usize::try_from(limit).ok())
        .unwrap_or(default)
}
