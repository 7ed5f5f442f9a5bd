//! Header helpers shared by handlers and extractors.

use axum::http::HeaderMap;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Extract a Bearer token from the Authorization header.
///
/// Returns the token without the "Bearer " prefix, or None if the header is
/// missing, malformed, or empty after the prefix.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Correlation id supplied by the caller, capped to a sane length.
pub fn correlation_id_from_headers(headers: &HeaderMap) -> Option<String> {
    header_str(headers, CORRELATION_HEADER)
        .filter(|id| id.len() <= 128)
        .map(String::from)
}
