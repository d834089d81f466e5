use chrono::Duration;
use credvault::clock::{Clock, ManualClock};
use credvault::codes::{
    CodeError, CodePolicy, CodeStore, EmailVerification, LimitScope, MemoryCodeStore,
    OneTimeCodeVault, PasswordReset, RequestOutcome,
};
use credvault::directory::{Identity, IdentityDirectory, MemoryDirectory};
use credvault::email::MemoryEmailSender;
use credvault::hashing::SecretHasher;
use credvault::session::{RevocationLedger, SessionIssuer, TokenCodec, TokenError, TokenKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const EMAIL: &str = "u1@example.com";

struct Harness {
    clock: Arc<ManualClock>,
    directory: Arc<MemoryDirectory>,
    sender: Arc<MemoryEmailSender>,
    store: Arc<MemoryCodeStore>,
    sessions: Arc<SessionIssuer>,
    vault: Arc<OneTimeCodeVault>,
}

async fn harness(policy: CodePolicy) -> Harness {
    let clock = Arc::new(ManualClock::default());
    let directory = Arc::new(MemoryDirectory::default());
    directory.insert(EMAIL, "old password").await.expect("seed");
    let sender = Arc::new(MemoryEmailSender::default());
    let store = Arc::new(MemoryCodeStore::default());
    let sessions = Arc::new(SessionIssuer::new(
        TokenCodec::new(&[3u8; 32]).expect("key"),
        Arc::new(RevocationLedger::new(clock.clone())),
        directory.clone(),
        clock.clone(),
    ));
    let vault = Arc::new(
        OneTimeCodeVault::new(
            policy.with_hasher(SecretHasher::light()),
            store.clone(),
            directory.clone(),
            sender.clone(),
            clock.clone(),
        )
        .with_sessions(sessions.clone()),
    );
    Harness {
        clock,
        directory,
        sender,
        store,
        sessions,
        vault,
    }
}

impl Harness {
    async fn issue(&self, origin: Option<&str>) -> String {
        let outcome = self.vault.request(EMAIL, origin).await.expect("request");
        assert_eq!(outcome, RequestOutcome::Issued);
        self.sender.last_code_for(EMAIL).expect("code delivered")
    }

    async fn redeem(&self, code: &str) -> Result<Identity, CodeError> {
        self.vault.verify(EMAIL, code, |_| async { Ok(()) }).await
    }
}

#[tokio::test]
async fn consumed_code_cannot_be_reused() {
    let h = harness(CodePolicy::password_reset()).await;
    let code = h.issue(None).await;

    let identity = h.redeem(&code).await.expect("first redemption");
    assert_eq!(identity.email, EMAIL);
    assert!(matches!(h.redeem(&code).await, Err(CodeError::AlreadyUsed)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_redemptions_consume_the_code_once() {
    let h = harness(CodePolicy::email_verification()).await;
    let code = h.issue(None).await;
    let calls = Arc::new(AtomicUsize::new(0));

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let vault = Arc::clone(&h.vault);
            let code = code.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                vault
                    .verify(EMAIL, &code, move |_| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            })
        })
        .collect();

    let mut redeemed = 0;
    let mut already_used = 0;
    for attempt in attempts {
        match attempt.await.expect("task") {
            Ok(identity) => {
                assert_eq!(identity.email, EMAIL);
                redeemed += 1;
            }
            Err(CodeError::AlreadyUsed) => already_used += 1,
            Err(other) => panic!("unexpected verify error: {other}"),
        }
    }

    assert_eq!(redeemed, 1);
    assert_eq!(already_used, 7);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn wrong_code_is_invalid_and_does_not_count() {
    let h = harness(CodePolicy::password_reset()).await;
    let code = h.issue(None).await;

    for _ in 0..10 {
        assert!(matches!(h.redeem("ZZZZZZZ").await, Err(CodeError::InvalidCode)));
    }
    let stored = h.store.codes_for_email(EMAIL).await.expect("codes");
    assert_eq!(stored[0].attempts, 0);
    assert!(h.redeem(&code).await.is_ok());
}

#[tokio::test]
async fn second_request_within_a_minute_is_rate_limited() {
    let h = harness(CodePolicy::password_reset()).await;
    h.issue(Some("198.51.100.1")).await;

    h.clock.advance(Duration::seconds(30));
    assert!(matches!(
        h.vault.request(EMAIL, Some("198.51.100.2")).await,
        Err(CodeError::RateLimited(LimitScope::Identity))
    ));

    h.clock.advance(Duration::seconds(31));
    h.issue(Some("198.51.100.2")).await;
}

#[tokio::test]
async fn origin_limit_applies_across_identities() {
    let h = harness(CodePolicy::password_reset()).await;
    h.directory
        .insert("u2@example.com", "pw")
        .await
        .expect("seed");
    h.issue(Some("198.51.100.1")).await;

    assert!(matches!(
        h.vault.request("u2@example.com", Some("198.51.100.1")).await,
        Err(CodeError::RateLimited(LimitScope::Origin))
    ));
    assert_eq!(
        h.vault
            .request("u2@example.com", Some("198.51.100.7"))
            .await
            .expect("request"),
        RequestOutcome::Issued
    );
}

#[tokio::test]
async fn new_request_replaces_earlier_code() {
    let h = harness(CodePolicy::password_reset()).await;
    let first = h.issue(None).await;
    h.clock.advance(Duration::seconds(61));
    let second = h.issue(None).await;

    assert_eq!(h.store.snapshot().await.len(), 1);
    if first != second {
        assert!(matches!(h.redeem(&first).await, Err(CodeError::InvalidCode)));
    }
    assert!(h.redeem(&second).await.is_ok());
}

#[tokio::test]
async fn expired_code_reports_expired() {
    let h = harness(CodePolicy::password_reset()).await;
    let code = h.issue(None).await;

    h.clock.advance(Duration::minutes(31));
    assert!(matches!(h.redeem(&code).await, Err(CodeError::Expired)));
}

#[tokio::test]
async fn attempts_cap_blocks_even_the_correct_code() {
    let h = harness(CodePolicy::password_reset()).await;
    let code = h.issue(None).await;

    let id = h.store.codes_for_email(EMAIL).await.expect("codes")[0].id;
    for _ in 0..5 {
        h.store.increment_attempts(id).await.expect("bump");
    }
    assert!(matches!(
        h.redeem(&code).await,
        Err(CodeError::TooManyAttempts)
    ));
}

#[tokio::test]
async fn unknown_identity_is_a_silent_no_op() {
    let h = harness(CodePolicy::password_reset()).await;
    assert_eq!(
        h.vault
            .request("ghost@example.com", Some("198.51.100.1"))
            .await
            .expect("request"),
        RequestOutcome::UnknownIdentity
    );
    assert!(h.sender.sent().is_empty());
    assert!(h.store.snapshot().await.is_empty());
    assert!(matches!(
        h.vault
            .verify("ghost@example.com", "ABC123", |_| async { Ok(()) })
            .await,
        Err(CodeError::InvalidCode)
    ));
}

#[tokio::test]
async fn failed_delivery_removes_the_code() {
    let h = harness(CodePolicy::password_reset()).await;
    h.sender.set_failing(true);
    assert!(matches!(
        h.vault.request(EMAIL, None).await,
        Err(CodeError::DeliveryFailed)
    ));
    assert!(h.store.snapshot().await.is_empty());
}

#[tokio::test]
async fn failed_action_keeps_code_consumed() {
    let h = harness(CodePolicy::password_reset()).await;
    let code = h.issue(None).await;

    let result = h
        .vault
        .verify(EMAIL, &code, |_| async { Err(anyhow::anyhow!("boom")) })
        .await;
    assert!(matches!(result, Err(CodeError::Action(_))));
    assert!(matches!(h.redeem(&code).await, Err(CodeError::AlreadyUsed)));
}

#[tokio::test]
async fn password_reset_changes_password_and_ends_sessions() {
    let h = harness(CodePolicy::password_reset()).await;
    let reset = PasswordReset::new(h.vault.clone(), h.directory.clone());
    let pair = h.sessions.login(EMAIL).expect("login");

    reset.request_reset(EMAIL, None).await.expect("request");
    let code = h.sender.last_code_for(EMAIL).expect("code");
    reset
        .reset_password(EMAIL, &code, "new password")
        .await
        .expect("reset");

    assert!(h
        .directory
        .verify_password(EMAIL, "new password")
        .await
        .expect("verify")
        .is_some());
    assert!(matches!(
        h.sessions.validate(&pair.access_token, TokenKind::Access).await,
        Err(TokenError::Revoked)
    ));
    assert!(matches!(
        h.sessions.refresh(&pair.refresh_token).await,
        Err(TokenError::Revoked)
    ));
}

#[tokio::test]
async fn email_verification_flow() {
    let h = harness(CodePolicy::email_verification()).await;
    let verification = EmailVerification::new(h.vault.clone(), h.directory.clone());
    let pair = h.sessions.login(EMAIL).expect("login");

    assert_eq!(
        verification.send_code(EMAIL).await.expect("send"),
        RequestOutcome::Issued
    );
    // no rate limit by default
    assert_eq!(
        verification.send_code(EMAIL).await.expect("send"),
        RequestOutcome::Issued
    );
    let code = h.sender.last_code_for(EMAIL).expect("code");
    assert!(code.bytes().all(|b| b.is_ascii_digit()));

    verification.verify_email(EMAIL, &code).await.expect("verify");
    let identity = h
        .directory
        .find_by_email(EMAIL)
        .await
        .expect("lookup")
        .expect("present");
    assert!(identity.email_verified);

    assert!(h
        .sessions
        .validate(&pair.access_token, TokenKind::Access)
        .await
        .is_ok());
    assert_eq!(
        verification.send_code(EMAIL).await.expect("send"),
        RequestOutcome::AlreadyVerified
    );
}

#[tokio::test]
async fn sweeps_remove_expired_and_aged_codes() {
    let h = harness(CodePolicy::password_reset()).await;
    h.issue(None).await;

    assert_eq!(h.vault.delete_expired(h.clock.now()).await.expect("sweep"), 0);
    h.clock.advance(Duration::minutes(30));
    assert_eq!(h.vault.delete_expired(h.clock.now()).await.expect("sweep"), 1);

    h.issue(None).await;
    h.clock.advance(Duration::hours(25));
    let cutoff = h.clock.now() - Duration::hours(24);
    assert_eq!(h.vault.delete_older_than(cutoff).await.expect("sweep"), 1);
    assert!(h.store.snapshot().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn background_sweepers_run_and_stop() {
    let policy = CodePolicy::password_reset().with_sweep_intervals(
        std::time::Duration::from_secs(300),
        std::time::Duration::from_secs(7200),
    );
    let h = harness(policy).await;
    h.issue(None).await;
    h.clock.advance(Duration::minutes(31));

    let (tx, rx) = tokio::sync::watch::channel(false);
    let handles = h.vault.spawn_sweepers(rx);
    tokio::time::sleep(std::time::Duration::from_secs(301)).await;
    assert!(h.store.snapshot().await.is_empty());

    tx.send(true).expect("sweepers alive");
    for handle in handles {
        handle.await.expect("sweeper joined");
    }
}
