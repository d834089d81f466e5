//! Compact HS256 bearer tokens.
//!
//! Tokens are `base64url(header).base64url(claims).base64url(hmac)`. The codec is a pure
//! function of the signing key and its input; revocation lives in the ledger.

use super::error::{SigningKeyError, TokenError};
use base64ct::{Base64, Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use ulid::Ulid;

type HmacSha256 = Hmac<Sha256>;

pub const MIN_KEY_LEN: usize = 32;
pub const DEFAULT_ACCESS_TTL_SECONDS: i64 = 30 * 60;
pub const DEFAULT_REFRESH_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

const ALG: &str = "HS256";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Access => f.write_str("access"),
            Self::Refresh => f.write_str("refresh"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct TokenHeader {
    alg: String,
    typ: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub typ: TokenKind,
    pub jti: String,
}

impl TokenClaims {
    #[must_use]
    pub fn kind(&self) -> TokenKind {
        self.typ
    }

    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, TokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}

#[derive(Clone)]
pub struct TokenCodec {
    mac: HmacSha256,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Build a codec from raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns `SigningKeyError::TooShort` for keys under 256 bits.
    pub fn new(key: &[u8]) -> Result<Self, SigningKeyError> {
        if key.len() < MIN_KEY_LEN {
            return Err(SigningKeyError::TooShort(key.len()));
        }
        let mac =
            HmacSha256::new_from_slice(key).map_err(|_| SigningKeyError::TooShort(key.len()))?;
        Ok(Self {
            mac,
            access_ttl: Duration::seconds(DEFAULT_ACCESS_TTL_SECONDS),
            refresh_ttl: Duration::seconds(DEFAULT_REFRESH_TTL_SECONDS),
        })
    }

    /// Build a codec from a standard base64 encoded key, as stored in configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not base64 or is too short.
    pub fn from_base64_key(encoded: &str) -> Result<Self, SigningKeyError> {
        let key = Base64::decode_vec(encoded.trim()).map_err(|_| SigningKeyError::Encoding)?;
        Self::new(&key)
    }

    #[must_use]
    pub fn with_access_ttl(mut self, ttl: Duration) -> Self {
        self.access_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_ttl = ttl;
        self
    }

    #[must_use]
    pub fn ttl(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        }
    }

    /// Sign a new token for `subject` using the current time.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Encoding` if the claims cannot be serialized.
    pub fn issue(&self, subject: &str, kind: TokenKind) -> Result<String, TokenError> {
        self.issue_at(subject, kind, Utc::now())
    }

    /// Sign a new token for `subject` as of `now`.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Encoding` if the claims cannot be serialized.
    pub fn issue_at(
        &self,
        subject: &str,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let iat = now.timestamp();
        let claims = TokenClaims {
            sub: subject.to_string(),
            iat,
            exp: iat + self.ttl(kind).num_seconds(),
            typ: kind,
            jti: Ulid::new().to_string(),
        };
        let header = TokenHeader {
            alg: ALG.to_string(),
            typ: "JWT".to_string(),
        };

        let signing_input = format!("{}.{}", b64e_json(&header)?, b64e_json(&claims)?);
        let mut mac = self.mac.clone();
        mac.update(signing_input.as_bytes());
        let signature = Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes());

        Ok(format!("{signing_input}.{signature}"))
    }

    /// Verify and decode a token using the current time.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Malformed` or `TokenError::Expired`.
    pub fn decode(&self, token: &str) -> Result<TokenClaims, TokenError> {
        self.decode_at(token, Utc::now())
    }

    /// Verify structure and signature, then check `exp` against `now`.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Malformed` if the token cannot be parsed or the signature does
    /// not verify, `TokenError::Expired` once `exp` is reached.
    pub fn decode_at(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims, TokenError> {
        let mut parts = token.trim().split('.');
        let header_b64 = parts.next().ok_or(TokenError::Malformed)?;
        let claims_b64 = parts.next().ok_or(TokenError::Malformed)?;
        let sig_b64 = parts.next().ok_or(TokenError::Malformed)?;
        if parts.next().is_some() {
            return Err(TokenError::Malformed);
        }

        let header: TokenHeader = b64d_json(header_b64)?;
        if header.alg != ALG {
            return Err(TokenError::Malformed);
        }

        let signature =
            Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| TokenError::Malformed)?;
        let mut mac = self.mac.clone();
        mac.update(format!("{header_b64}.{claims_b64}").as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::Malformed)?;

        let claims: TokenClaims = b64d_json(claims_b64)?;
        if claims.exp <= now.timestamp() {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8; 32] = b"0123456789abcdef0123456789abcdef";

    fn codec() -> TokenCodec {
        TokenCodec::new(KEY).expect("valid key")
    }

    #[test]
    fn issue_and_decode_access_token() {
        let now = Utc::now();
        let token = codec()
            .issue_at("u1@example.com", TokenKind::Access, now)
            .expect("issue");

        let claims = codec().decode_at(&token, now).expect("decode");
        assert_eq!(claims.sub, "u1@example.com");
        assert_eq!(claims.kind(), TokenKind::Access);
        assert_eq!(claims.exp - claims.iat, DEFAULT_ACCESS_TTL_SECONDS);
    }

    #[test]
    fn refresh_tokens_live_seven_days() {
        let now = Utc::now();
        let token = codec()
            .issue_at("u1@example.com", TokenKind::Refresh, now)
            .expect("issue");
        let claims = codec().decode_at(&token, now).expect("decode");
        assert_eq!(claims.kind(), TokenKind::Refresh);
        assert_eq!(
            claims.expires_at().map(|exp| exp.timestamp()),
            Some(now.timestamp() + DEFAULT_REFRESH_TTL_SECONDS)
        );
    }

    #[test]
    fn tokens_issued_in_the_same_second_differ() {
        let now = Utc::now();
        let first = codec().issue_at("u1", TokenKind::Refresh, now).expect("issue");
        let second = codec().issue_at("u1", TokenKind::Refresh, now).expect("issue");
        assert_ne!(first, second);
    }

    #[test]
    fn expired_is_distinct_from_malformed() {
        let now = Utc::now();
        let token = codec().issue_at("u1", TokenKind::Access, now).expect("issue");

        let later = now + Duration::seconds(DEFAULT_ACCESS_TTL_SECONDS);
        assert!(matches!(
            codec().decode_at(&token, later),
            Err(TokenError::Expired)
        ));
        assert!(codec()
            .decode_at(&token, later - Duration::seconds(1))
            .is_ok());
    }

    #[test]
    fn rejects_tampered_claims() {
        let now = Utc::now();
        let token = codec().issue_at("u1", TokenKind::Access, now).expect("issue");
        let parts: Vec<&str> = token.split('.').collect();

        let forged_claims = TokenClaims {
            sub: "admin".to_string(),
            iat: now.timestamp(),
            exp: now.timestamp() + 60,
            typ: TokenKind::Access,
            jti: "x".to_string(),
        };
        let forged = format!(
            "{}.{}.{}",
            parts[0],
            b64e_json(&forged_claims).expect("encode"),
            parts[2]
        );
        assert!(matches!(
            codec().decode_at(&forged, now),
            Err(TokenError::Malformed)
        ));
    }

    #[test]
    fn rejects_other_keys_and_garbage() {
        let now = Utc::now();
        let token = codec().issue_at("u1", TokenKind::Access, now).expect("issue");
        let other = TokenCodec::new(b"ffffffffffffffffffffffffffffffff").expect("valid key");
        assert!(matches!(
            other.decode_at(&token, now),
            Err(TokenError::Malformed)
        ));

        for garbage in ["", "a.b", "a.b.c.d", "not-a-token", "..."] {
            assert!(
                matches!(codec().decode_at(garbage, now), Err(TokenError::Malformed)),
                "{garbage} should be malformed"
            );
        }
    }

    #[test]
    fn rejects_unsigned_algorithm() {
        let now = Utc::now();
        let token = codec().issue_at("u1", TokenKind::Access, now).expect("issue");
        let parts: Vec<&str> = token.split('.').collect();
        let header = TokenHeader {
            alg: "none".to_string(),
            typ: "JWT".to_string(),
        };
        let forged = format!("{}.{}.", b64e_json(&header).expect("encode"), parts[1]);
        assert!(matches!(
            codec().decode_at(&forged, now),
            Err(TokenError::Malformed)
        ));
    }

    #[test]
    fn signing_key_validation() {
        assert_eq!(
            TokenCodec::new(b"short").err(),
            Some(SigningKeyError::TooShort(5))
        );
        assert_eq!(
            TokenCodec::from_base64_key("***").err(),
            Some(SigningKeyError::Encoding)
        );
        let encoded = Base64::encode_string(KEY);
        assert!(TokenCodec::from_base64_key(&encoded).is_ok());
    }

    #[test]
    fn debug_does_not_leak_key() {
        let rendered = format!("{:?}", codec());
        assert!(!rendered.contains("0123456789abcdef"));
    }
}
