use crate::api::{self, AuthState, RateLimitDisclosure};
use crate::clock::{Clock, SystemClock};
use crate::codes::{
    CodeKind, CodePolicy, CodeStore, EmailVerification, OneTimeCodeVault, PasswordReset,
    PgCodeStore,
};
use crate::directory::{IdentityDirectory, PgDirectory};
use crate::email::{EmailSender, LogEmailSender};
use crate::session::{RevocationLedger, SessionIssuer, TokenCodec};
use anyhow::{Context, Result};
use chrono::Duration;
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: SecretString,
    pub signing_key: SecretString,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
    pub reset_code_ttl_minutes: i64,
    pub reset_rate_limit_per_minute: u32,
    pub reset_max_attempts: u32,
    pub rate_limit_disclosure: RateLimitDisclosure,
    pub verification_code_ttl_minutes: i64,
    pub verification_code_length: usize,
    pub ledger_retention_hours: i64,
    pub ledger_sweep_seconds: u64,
    pub code_expiry_sweep_seconds: u64,
    pub code_age_sweep_seconds: u64,
    pub code_max_age_hours: i64,
}

impl Args {
    fn sweep_intervals(&self) -> (std::time::Duration, std::time::Duration) {
        (
            std::time::Duration::from_secs(self.code_expiry_sweep_seconds),
            std::time::Duration::from_secs(self.code_age_sweep_seconds),
        )
    }

    #[must_use]
    pub fn reset_policy(&self) -> CodePolicy {
        let (expiry, age) = self.sweep_intervals();
        CodePolicy::password_reset()
            .with_ttl(Duration::minutes(self.reset_code_ttl_minutes))
            .with_rate_limit(self.reset_rate_limit_per_minute)
            .with_max_attempts(self.reset_max_attempts)
            .with_max_age(Duration::hours(self.code_max_age_hours))
            .with_sweep_intervals(expiry, age)
    }

    #[must_use]
    pub fn verification_policy(&self) -> CodePolicy {
        let (expiry, age) = self.sweep_intervals();
        CodePolicy::email_verification()
            .with_ttl(Duration::minutes(self.verification_code_ttl_minutes))
            .with_length(self.verification_code_length)
            .with_max_age(Duration::hours(self.code_max_age_hours))
            .with_sweep_intervals(expiry, age)
    }
}

/// Flip the shutdown channel on ctrl-c so sweepers and the HTTP server stop together.
fn spawn_signal_handler(shutdown: Arc<watch::Sender<bool>>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
        let _ = shutdown.send(true);
    });
}

/// Execute the server action.
/// # Errors
/// Returns an error if the signing key is invalid, the database is unreachable, or the
/// server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!("Server args: {:?}", args);

    let codec = TokenCodec::from_base64_key(args.signing_key.expose_secret())
        .context("Invalid signing key")?
        .with_access_ttl(Duration::seconds(args.access_ttl_seconds))
        .with_refresh_ttl(Duration::seconds(args.refresh_ttl_seconds));

    let dsn_url = Url::parse(args.dsn.expose_secret()).context("Invalid database DSN")?;
    info!(
        host = dsn_url.host_str().unwrap_or("localhost"),
        database = dsn_url.path().trim_start_matches('/'),
        "Connecting to database"
    );

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(std::time::Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(args.dsn.expose_secret())
        .await
        .context("Failed to connect to database")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let directory: Arc<dyn IdentityDirectory> = Arc::new(PgDirectory::new(pool.clone()));
    let sender: Arc<dyn EmailSender> = Arc::new(LogEmailSender);

    let ledger = Arc::new(
        RevocationLedger::new(clock.clone())
            .with_retention(Duration::hours(args.ledger_retention_hours)),
    );
    let sessions = Arc::new(SessionIssuer::new(
        codec,
        ledger.clone(),
        directory.clone(),
        clock.clone(),
    ));

    let reset_store: Arc<dyn CodeStore> =
        Arc::new(PgCodeStore::new(pool.clone(), CodeKind::PasswordReset));
    let reset_vault = Arc::new(
        OneTimeCodeVault::new(
            args.reset_policy(),
            reset_store,
            directory.clone(),
            sender.clone(),
            clock.clone(),
        )
        .with_sessions(sessions.clone()),
    );

    let verification_store: Arc<dyn CodeStore> =
        Arc::new(PgCodeStore::new(pool.clone(), CodeKind::EmailVerification));
    let verification_vault = Arc::new(OneTimeCodeVault::new(
        args.verification_policy(),
        verification_store,
        directory.clone(),
        sender,
        clock,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let mut sweepers = vec![ledger.spawn_sweeper(
        std::time::Duration::from_secs(args.ledger_sweep_seconds),
        shutdown_rx.clone(),
    )];
    sweepers.extend(reset_vault.spawn_sweepers(shutdown_rx.clone()));
    sweepers.extend(verification_vault.spawn_sweepers(shutdown_rx.clone()));

    let auth_state = Arc::new(
        AuthState::new(
            sessions,
            directory.clone(),
            PasswordReset::new(reset_vault, directory.clone()),
            EmailVerification::new(verification_vault, directory),
        )
        .with_disclosure(args.rate_limit_disclosure),
    );

    spawn_signal_handler(shutdown_tx.clone());

    let result = api::new(args.port, pool, auth_state, shutdown_rx).await;
    let _ = shutdown_tx.send(true);

    for sweeper in sweepers {
        let _ = sweeper.await;
    }
    result
}
