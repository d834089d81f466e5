//! Password reset and email verification built on a `OneTimeCodeVault`.

use super::error::CodeError;
use super::vault::{OneTimeCodeVault, RequestOutcome};
use crate::directory::{Identity, IdentityDirectory};
use anyhow::Context;
use std::sync::Arc;

#[derive(Clone)]
pub struct PasswordReset {
    vault: Arc<OneTimeCodeVault>,
    directory: Arc<dyn IdentityDirectory>,
}

impl PasswordReset {
    #[must_use]
    pub fn new(vault: Arc<OneTimeCodeVault>, directory: Arc<dyn IdentityDirectory>) -> Self {
        Self { vault, directory }
    }

    #[must_use]
    pub fn vault(&self) -> &Arc<OneTimeCodeVault> {
        &self.vault
    }

    /// # Errors
    ///
    /// See `OneTimeCodeVault::request`.
    pub async fn request_reset(
        &self,
        email: &str,
        origin: Option<&str>,
    ) -> Result<RequestOutcome, CodeError> {
        self.vault.request(email, origin).await
    }

    /// Redeem the code and store `new_password` for the identity.
    ///
    /// # Errors
    ///
    /// See `OneTimeCodeVault::verify`.
    pub async fn reset_password(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<Identity, CodeError> {
        let directory = Arc::clone(&self.directory);
        self.vault
            .verify(email, code, |identity| async move {
                directory
                    .set_password(identity.user_id, new_password)
                    .await
                    .context("failed to store new password")
            })
            .await
    }
}

#[derive(Clone)]
pub struct EmailVerification {
    vault: Arc<OneTimeCodeVault>,
    directory: Arc<dyn IdentityDirectory>,
}

impl EmailVerification {
    #[must_use]
    pub fn new(vault: Arc<OneTimeCodeVault>, directory: Arc<dyn IdentityDirectory>) -> Self {
        Self { vault, directory }
    }

    #[must_use]
    pub fn vault(&self) -> &Arc<OneTimeCodeVault> {
        &self.vault
    }

    /// # Errors
    ///
    /// See `OneTimeCodeVault::request`.
    pub async fn send_code(&self, email: &str) -> Result<RequestOutcome, CodeError> {
        self.vault.request(email, None).await
    }

    /// # Errors
    ///
    /// See `OneTimeCodeVault::verify`.
    pub async fn verify_email(&self, email: &str, code: &str) -> Result<Identity, CodeError> {
        let directory = Arc::clone(&self.directory);
        self.vault
            .verify(email, code, |identity| async move {
                directory
                    .mark_email_verified(identity.user_id)
                    .await
                    .context("failed to mark email verified")
            })
            .await
    }
}
