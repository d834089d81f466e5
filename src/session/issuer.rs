use super::codec::{TokenCodec, TokenKind};
use super::error::TokenError;
use super::ledger::RevocationLedger;
use crate::clock::Clock;
use crate::directory::{Identity, IdentityDirectory};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Session lifecycle over a codec, a revocation ledger and the identity directory.
pub struct SessionIssuer {
    codec: TokenCodec,
    ledger: Arc<RevocationLedger>,
    directory: Arc<dyn IdentityDirectory>,
    clock: Arc<dyn Clock>,
}

impl SessionIssuer {
    #[must_use]
    pub fn new(
        codec: TokenCodec,
        ledger: Arc<RevocationLedger>,
        directory: Arc<dyn IdentityDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            codec,
            ledger,
            directory,
            clock,
        }
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<RevocationLedger> {
        &self.ledger
    }

    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Issue a fresh access/refresh pair for an already authenticated subject.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Encoding` if the claims cannot be serialized.
    #[instrument(skip(self))]
    pub fn login(&self, subject: &str) -> Result<TokenPair, TokenError> {
        let pair = self.sign_pair(subject)?;
        self.ledger.record_ownership(&pair.access_token, subject);
        self.ledger.record_ownership(&pair.refresh_token, subject);
        info!("Session issued");
        Ok(pair)
    }

    fn sign_pair(&self, subject: &str) -> Result<TokenPair, TokenError> {
        let now = self.clock.now();
        Ok(TokenPair {
            access_token: self.codec.issue_at(subject, TokenKind::Access, now)?,
            refresh_token: self.codec.issue_at(subject, TokenKind::Refresh, now)?,
        })
    }

    /// Accept `token` only if it is well formed, unexpired, of the expected kind, not
    /// revoked, and its subject still resolves to an identity.
    ///
    /// # Errors
    ///
    /// Returns the first failed check as a `TokenError`.
    #[instrument(skip_all, fields(expected = %expected))]
    pub async fn validate(&self, token: &str, expected: TokenKind) -> Result<Identity, TokenError> {
        let claims = self.codec.decode_at(token, self.clock.now())?;
        if claims.kind() != expected {
            return Err(TokenError::WrongKind {
                expected,
                found: claims.kind(),
            });
        }
        if self.ledger.is_revoked(token) {
            return Err(TokenError::Revoked);
        }
        self.resolve(&claims.sub).await
    }

    async fn resolve(&self, subject: &str) -> Result<Identity, TokenError> {
        match self.directory.find_by_email(subject).await {
            Ok(Some(identity)) => Ok(identity),
            Ok(None) => Err(TokenError::UnknownIdentity),
            Err(err) => {
                error!("Identity lookup failed: {err}");
                Err(TokenError::DirectoryUnavailable)
            }
        }
    }

    /// Rotate a refresh token: the presented token is revoked and a new pair issued.
    ///
    /// Of several concurrent refreshes of the same token exactly one succeeds; the
    /// others get `TokenError::Revoked`. A concurrent `logout_all` of the subject
    /// revokes the new pair too.
    ///
    /// # Errors
    ///
    /// Returns a `TokenError` when the token is not an acceptable refresh token.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, TokenError> {
        let claims = self.codec.decode_at(refresh_token, self.clock.now())?;
        if claims.kind() != TokenKind::Refresh {
            return Err(TokenError::WrongKind {
                expected: TokenKind::Refresh,
                found: claims.kind(),
            });
        }
        if self.ledger.is_revoked(refresh_token) {
            return Err(TokenError::Revoked);
        }
        self.resolve(&claims.sub).await?;

        // The new pair only becomes live if this call wins the revocation of the old token.
        let pair = self.sign_pair(&claims.sub)?;
        let replacements = [pair.access_token.as_str(), pair.refresh_token.as_str()];
        if !self
            .ledger
            .rotate(refresh_token, &replacements, &claims.sub)
        {
            warn!("Refresh token was rotated or revoked concurrently");
            return Err(TokenError::Revoked);
        }
        info!("Session refreshed");
        Ok(pair)
    }

    /// Revoke every token issued to `identity`. Returns the number newly revoked.
    pub fn logout_all(&self, identity: &str) -> usize {
        self.ledger.revoke_all(identity)
    }

    /// End every session of the refresh token's owner.
    ///
    /// # Errors
    ///
    /// Returns a `TokenError` when `refresh_token` does not validate.
    pub async fn logout(&self, refresh_token: &str) -> Result<usize, TokenError> {
        let identity = self.validate(refresh_token, TokenKind::Refresh).await?;
        Ok(self.logout_all(&identity.email))
    }
}
