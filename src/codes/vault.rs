use super::error::CodeError;
use super::policy::{CodeKind, CodePolicy};
use super::rate_limit::{RateLimitDecision, RateLimiter};
use super::store::{CodeRecord, CodeStore, InsertOutcome};
use crate::clock::Clock;
use crate::directory::{normalize_email, Identity, IdentityDirectory};
use crate::email::{EmailMessage, EmailSender};
use crate::session::SessionIssuer;
use crate::sweeper::spawn_periodic;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    Issued,
    /// Nothing was stored or sent. Callers must answer exactly as for `Issued`.
    UnknownIdentity,
    AlreadyVerified,
}

/// Issues, delivers and redeems single-use codes under one `CodePolicy`.
pub struct OneTimeCodeVault {
    policy: CodePolicy,
    store: Arc<dyn CodeStore>,
    limiter: RateLimiter,
    directory: Arc<dyn IdentityDirectory>,
    sender: Arc<dyn EmailSender>,
    sessions: Option<Arc<SessionIssuer>>,
    clock: Arc<dyn Clock>,
}

impl OneTimeCodeVault {
    #[must_use]
    pub fn new(
        policy: CodePolicy,
        store: Arc<dyn CodeStore>,
        directory: Arc<dyn IdentityDirectory>,
        sender: Arc<dyn EmailSender>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let limiter = RateLimiter::new(Arc::clone(&store), Arc::clone(&clock))
            .with_window(policy.rate_window())
            .with_identity_limit(policy.identity_limit())
            .with_origin_limit(policy.origin_limit());
        Self {
            policy,
            store,
            limiter,
            directory,
            sender,
            sessions: None,
            clock,
        }
    }

    /// Sessions to end when the policy revokes sessions on success.
    #[must_use]
    pub fn with_sessions(mut self, sessions: Arc<SessionIssuer>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    #[must_use]
    pub fn policy(&self) -> &CodePolicy {
        &self.policy
    }

    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    async fn lookup(&self, email: &str) -> Result<Option<Identity>, CodeError> {
        self.directory.find_by_email(email).await.map_err(|err| {
            error!("Identity lookup failed: {err}");
            CodeError::StorageUnavailable
        })
    }

    /// Issue a new code for `email`, replacing any earlier one, and deliver it.
    ///
    /// # Errors
    ///
    /// `RateLimited` when the identity or origin already requested within the window,
    /// `DeliveryFailed` when the sender rejects the message (the code is removed again),
    /// `StorageUnavailable` on store or directory failures.
    #[instrument(skip(self), fields(kind = %self.policy.kind()))]
    pub async fn request(
        &self,
        email: &str,
        origin: Option<&str>,
    ) -> Result<RequestOutcome, CodeError> {
        let email = normalize_email(email);
        let Some(identity) = self.lookup(&email).await? else {
            info!("Code requested for unknown identity");
            return Ok(RequestOutcome::UnknownIdentity);
        };
        if self.policy.kind() == CodeKind::EmailVerification && identity.email_verified {
            return Ok(RequestOutcome::AlreadyVerified);
        }

        // skip hashing when the request is going to be refused anyway
        if let RateLimitDecision::Limited(scope) = self.limiter.check(&email, origin).await? {
            warn!(?scope, "Code request rate limited");
            return Err(CodeError::RateLimited(scope));
        }

        let code = self.policy.generate_code();
        let now = self.clock.now();
        let record = CodeRecord {
            id: Uuid::now_v7(),
            user_id: identity.user_id,
            email: email.clone(),
            code_hash: self.policy.hasher().hash(&code)?,
            expires_at: now + self.policy.ttl(),
            attempts: 0,
            consumed: false,
            created_at: now,
            ip_address: origin.map(str::to_string),
        };

        if let InsertOutcome::Limited(scope) = self
            .store
            .insert_replacing(&record, &self.limiter.window(now))
            .await?
        {
            warn!(?scope, "Code request rate limited");
            return Err(CodeError::RateLimited(scope));
        }

        let message = EmailMessage {
            to_email: email,
            template: self.policy.template().to_string(),
            payload_json: serde_json::json!({
                "code": code,
                "expires_in_minutes": self.policy.ttl().num_minutes(),
            })
            .to_string(),
        };
        if let Err(err) = self.sender.send(&message) {
            error!("Failed to deliver code: {err:#}");
            if let Err(err) = self.store.delete(record.id).await {
                error!("Failed to remove undelivered code: {err}");
            }
            return Err(CodeError::DeliveryFailed);
        }

        info!(expires_at = %record.expires_at, "Code issued");
        Ok(RequestOutcome::Issued)
    }

    /// Redeem `presented` for `email` and run `on_success` with the owning identity.
    ///
    /// Once the code is consumed it stays consumed, even when `on_success` fails.
    ///
    /// # Errors
    ///
    /// Returns the `CodeError` describing why the code was not accepted, or
    /// `CodeError::Action` when `on_success` failed.
    #[instrument(skip(self, presented, on_success), fields(kind = %self.policy.kind()))]
    pub async fn verify<F, Fut>(
        &self,
        email: &str,
        presented: &str,
        on_success: F,
    ) -> Result<Identity, CodeError>
    where
        F: FnOnce(Identity) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let email = normalize_email(email);
        let presented = self.policy.normalize(presented);
        let Some(identity) = self.lookup(&email).await? else {
            return Err(CodeError::InvalidCode);
        };

        let candidates = self.store.codes_for_email(&email).await?;
        let Some(code) = candidates
            .into_iter()
            .find(|candidate| self.policy.hasher().verify(&presented, &candidate.code_hash))
        else {
            warn!("Presented code matches no stored code");
            return Err(CodeError::InvalidCode);
        };

        if code.consumed {
            return Err(CodeError::AlreadyUsed);
        }
        if code.is_expired(self.clock.now()) {
            return Err(CodeError::Expired);
        }
        if let Some(max) = self.policy.max_attempts() {
            if i64::from(code.attempts) >= i64::from(max) {
                return Err(CodeError::TooManyAttempts);
            }
        }

        self.store.increment_attempts(code.id).await?;
        if !self.store.mark_consumed(code.id).await? {
            warn!("Code consumed concurrently");
            return Err(CodeError::AlreadyUsed);
        }

        on_success(identity.clone()).await.map_err(|err| {
            error!("Post-verification action failed: {err:#}");
            CodeError::Action(err)
        })?;

        if self.policy.revokes_sessions() {
            match &self.sessions {
                Some(sessions) => {
                    let revoked = sessions.logout_all(&identity.email);
                    info!(revoked, "Sessions revoked after code redemption");
                }
                None => warn!("No session issuer attached; sessions were not revoked"),
            }
        }

        info!("Code redeemed");
        Ok(identity)
    }

    /// # Errors
    ///
    /// Returns `StorageUnavailable` when the store fails.
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, CodeError> {
        Ok(self.store.delete_expired(now).await?)
    }

    /// # Errors
    ///
    /// Returns `StorageUnavailable` when the store fails.
    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, CodeError> {
        Ok(self.store.delete_created_before(cutoff).await?)
    }

    /// Start the expired-code and aged-code sweeps.
    pub fn spawn_sweepers(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let kind = self.policy.kind();

        let vault = Arc::clone(self);
        let expired = spawn_periodic(
            "expired-codes",
            self.policy.expiry_sweep_every(),
            shutdown.clone(),
            move || {
                let vault = Arc::clone(&vault);
                async move {
                    match vault.delete_expired(vault.clock.now()).await {
                        Ok(0) | Err(_) => {}
                        Ok(deleted) => info!(%kind, deleted, "Deleted expired codes"),
                    }
                }
            },
        );

        let vault = Arc::clone(self);
        let aged = spawn_periodic(
            "aged-codes",
            self.policy.age_sweep_every(),
            shutdown,
            move || {
                let vault = Arc::clone(&vault);
                async move {
                    let cutoff = vault.clock.now() - vault.policy.max_age();
                    match vault.delete_older_than(cutoff).await {
                        Ok(0) | Err(_) => {}
                        Ok(deleted) => info!(%kind, deleted, "Deleted aged codes"),
                    }
                }
            },
        );

        vec![expired, aged]
    }
}
