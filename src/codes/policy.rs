//! Per-flow parameters for one-time codes.

use crate::hashing::SecretHasher;
use chrono::Duration;
use rand::Rng;
use std::fmt;

pub const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const DIGITS: &[u8] = b"0123456789";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodeKind {
    PasswordReset,
    EmailVerification,
}

impl CodeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PasswordReset => "password_reset",
            Self::EmailVerification => "email_verification",
        }
    }

    #[must_use]
    pub fn table(self) -> &'static str {
        match self {
            Self::PasswordReset => "password_reset_codes",
            Self::EmailVerification => "email_verification_codes",
        }
    }
}

impl fmt::Display for CodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct CodePolicy {
    kind: CodeKind,
    alphabet: &'static [u8],
    length: usize,
    ttl: Duration,
    max_attempts: Option<u32>,
    rate_window: Duration,
    identity_limit: Option<u32>,
    origin_limit: Option<u32>,
    revokes_sessions: bool,
    max_age: Duration,
    expiry_sweep_every: std::time::Duration,
    age_sweep_every: std::time::Duration,
    hasher: SecretHasher,
}

impl CodePolicy {
    /// Six uppercase alphanumerics, 30 minutes, five attempts, one request per minute per
    /// identity and per origin. Success ends every session of the identity.
    #[must_use]
    pub fn password_reset() -> Self {
        Self {
            kind: CodeKind::PasswordReset,
            alphabet: ALPHANUMERIC,
            length: 6,
            ttl: Duration::minutes(30),
            max_attempts: Some(5),
            rate_window: Duration::seconds(60),
            identity_limit: Some(1),
            origin_limit: Some(1),
            revokes_sessions: true,
            max_age: Duration::hours(24),
            expiry_sweep_every: std::time::Duration::from_secs(5 * 60),
            age_sweep_every: std::time::Duration::from_secs(2 * 60 * 60),
            hasher: SecretHasher::default(),
        }
    }

    /// Six digits, 10 minutes, no attempt cap and no rate limit.
    #[must_use]
    pub fn email_verification() -> Self {
        Self {
            kind: CodeKind::EmailVerification,
            alphabet: DIGITS,
            ttl: Duration::minutes(10),
            max_attempts: None,
            identity_limit: None,
            origin_limit: None,
            revokes_sessions: false,
            ..Self::password_reset()
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length.max(1);
        self
    }

    /// `0` disables the cap.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = (max_attempts > 0).then_some(max_attempts);
        self
    }

    /// Requests allowed per identity and per origin within the rate window. `0` disables.
    #[must_use]
    pub fn with_rate_limit(mut self, per_window: u32) -> Self {
        let limit = (per_window > 0).then_some(per_window);
        self.identity_limit = limit;
        self.origin_limit = limit;
        self
    }

    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    #[must_use]
    pub fn with_sweep_intervals(
        mut self,
        expiry: std::time::Duration,
        age: std::time::Duration,
    ) -> Self {
        self.expiry_sweep_every = expiry;
        self.age_sweep_every = age;
        self
    }

    #[must_use]
    pub fn with_hasher(mut self, hasher: SecretHasher) -> Self {
        self.hasher = hasher;
        self
    }

    #[must_use]
    pub fn kind(&self) -> CodeKind {
        self.kind
    }

    #[must_use]
    pub fn length(&self) -> usize {
        self.length
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    #[must_use]
    pub fn rate_window(&self) -> Duration {
        self.rate_window
    }

    #[must_use]
    pub fn identity_limit(&self) -> Option<u32> {
        self.identity_limit
    }

    #[must_use]
    pub fn origin_limit(&self) -> Option<u32> {
        self.origin_limit
    }

    #[must_use]
    pub fn revokes_sessions(&self) -> bool {
        self.revokes_sessions
    }

    #[must_use]
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    #[must_use]
    pub fn expiry_sweep_every(&self) -> std::time::Duration {
        self.expiry_sweep_every
    }

    #[must_use]
    pub fn age_sweep_every(&self) -> std::time::Duration {
        self.age_sweep_every
    }

    #[must_use]
    pub fn hasher(&self) -> &SecretHasher {
        &self.hasher
    }

    #[must_use]
    pub fn template(&self) -> &'static str {
        self.kind.as_str()
    }

    /// Draw a fresh code uniformly from the policy alphabet.
    #[must_use]
    pub fn generate_code(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.length)
            .map(|_| char::from(self.alphabet[rng.gen_range(0..self.alphabet.len())]))
            .collect()
    }

    /// Codes are compared trimmed and, for alphanumeric codes, uppercased.
    #[must_use]
    pub fn normalize(&self, presented: &str) -> String {
        presented.trim().to_ascii_uppercase()
    }
}
