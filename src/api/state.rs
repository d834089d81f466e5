//! Shared state for the auth handlers.

use crate::codes::{EmailVerification, PasswordReset};
use crate::directory::IdentityDirectory;
use crate::session::SessionIssuer;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// How a rate-limited reset request is answered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RateLimitDisclosure {
    /// Same generic success as every other request.
    Generic,
    /// 429 for known identities that hit the limit.
    #[default]
    Distinct,
}

impl FromStr for RateLimitDisclosure {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "generic" => Ok(Self::Generic),
            "distinct" => Ok(Self::Distinct),
            other => Err(format!("unknown rate limit disclosure: {other}")),
        }
    }
}

impl fmt::Display for RateLimitDisclosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic => f.write_str("generic"),
            Self::Distinct => f.write_str("distinct"),
        }
    }
}

pub struct AuthState {
    sessions: Arc<SessionIssuer>,
    directory: Arc<dyn IdentityDirectory>,
    password_reset: PasswordReset,
    verification: EmailVerification,
    disclosure: RateLimitDisclosure,
}

impl AuthState {
    #[must_use]
    pub fn new(
        sessions: Arc<SessionIssuer>,
        directory: Arc<dyn IdentityDirectory>,
        password_reset: PasswordReset,
        verification: EmailVerification,
    ) -> Self {
        Self {
            sessions,
            directory,
            password_reset,
            verification,
            disclosure: RateLimitDisclosure::default(),
        }
    }

    #[must_use]
    pub fn with_disclosure(mut self, disclosure: RateLimitDisclosure) -> Self {
        self.disclosure = disclosure;
        self
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionIssuer {
        &self.sessions
    }

    #[must_use]
    pub fn directory(&self) -> &dyn IdentityDirectory {
        self.directory.as_ref()
    }

    #[must_use]
    pub fn password_reset(&self) -> &PasswordReset {
        &self.password_reset
    }

    #[must_use]
    pub fn verification(&self) -> &EmailVerification {
        &self.verification
    }

    #[must_use]
    pub fn disclosure(&self) -> RateLimitDisclosure {
        self.disclosure
    }
}
