use super::codec::{TokenKind, MIN_KEY_LEN};
use thiserror::Error;

/// Why a bearer token was not accepted.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("token expired")]
    Expired,
    #[error("expected {expected} token, got {found}")]
    WrongKind { expected: TokenKind, found: TokenKind },
    #[error("token revoked")]
    Revoked,
    #[error("token subject is not a known identity")]
    UnknownIdentity,
    #[error("identity directory unavailable")]
    DirectoryUnavailable,
    #[error("failed to encode token claims")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SigningKeyError {
    #[error("signing key is not valid base64")]
    Encoding,
    #[error("signing key must be at least {min} bytes, got {0}", min = MIN_KEY_LEN)]
    TooShort(usize),
}
