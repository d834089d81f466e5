//! Request parsing helpers shared by the auth handlers.

use axum::http::{header::AUTHORIZATION, HeaderMap};
use regex::Regex;
use std::net::SocketAddr;

/// Basic email format check on already-normalized input.
pub(super) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// The token of an `Authorization: Bearer <token>` header.
pub(super) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn header_ip<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty() && !value.eq_ignore_ascii_case("unknown"))
}

/// Client IP for rate limiting: the usual proxy headers first, then the peer address.
pub(super) fn extract_client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
) -> Option<String> {
    ["x-forwarded-for", "x-real-ip", "x-client-ip"]
        .into_iter()
        .find_map(|name| header_ip(headers, name))
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}
