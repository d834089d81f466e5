//! Sliding-window request limits for code issuance, counted from the code store itself.

use super::store::{CodeStore, LimitScope, RateWindow, StoreError};
use crate::clock::Clock;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited(LimitScope),
}

pub struct RateLimiter {
    store: Arc<dyn CodeStore>,
    clock: Arc<dyn Clock>,
    window: Duration,
    per_identity: Option<u32>,
    per_origin: Option<u32>,
}

impl RateLimiter {
    /// A limiter with a 60 second window and no limits set.
    #[must_use]
    pub fn new(store: Arc<dyn CodeStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            window: Duration::seconds(60),
            per_identity: None,
            per_origin: None,
        }
    }

    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// `None` or `Some(0)` disables the limit.
    #[must_use]
    pub fn with_identity_limit(mut self, limit: Option<u32>) -> Self {
        self.per_identity = limit.filter(|limit| *limit > 0);
        self
    }

    /// `None` or `Some(0)` disables the limit.
    #[must_use]
    pub fn with_origin_limit(mut self, limit: Option<u32>) -> Self {
        self.per_origin = limit.filter(|limit| *limit > 0);
        self
    }

    #[must_use]
    pub fn window(&self, now: DateTime<Utc>) -> RateWindow {
        RateWindow {
            since: now - self.window,
            per_identity: self.per_identity,
            per_origin: self.per_origin,
        }
    }

    /// Read-only check. The authoritative check happens inside the store's insert.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the counts cannot be read.
    pub async fn check(
        &self,
        email: &str,
        origin: Option<&str>,
    ) -> Result<RateLimitDecision, StoreError> {
        let window = self.window(self.clock.now());

        let identity_count = match window.per_identity {
            Some(_) => self.store.count_for_email_since(email, window.since).await?,
            None => 0,
        };
        let origin_count = match (window.per_origin, origin) {
            (Some(_), Some(origin)) => {
                self.store
                    .count_for_origin_since(origin, window.since)
                    .await?
            }
            _ => 0,
        };

        Ok(window
            .exceeded(identity_count, origin_count)
            .map_or(RateLimitDecision::Allowed, RateLimitDecision::Limited))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::codes::store::{CodeRecord, MemoryCodeStore};
    use uuid::Uuid;

    async fn seed(store: &MemoryCodeStore, email: &str, origin: &str, at: DateTime<Utc>) {
        let record = CodeRecord {
            id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
            email: email.to_string(),
            code_hash: "hash".to_string(),
            expires_at: at + Duration::minutes(30),
            attempts: 0,
            consumed: false,
            created_at: at,
            ip_address: Some(origin.to_string()),
        };
        let open = RateWindow {
            since: at,
            per_identity: None,
            per_origin: None,
        };
        store.insert_replacing(&record, &open).await.expect("seed");
    }

    #[tokio::test]
    async fn limits_by_identity_then_origin_until_window_passes() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryCodeStore::default());
        let limiter = RateLimiter::new(store.clone(), clock.clone())
            .with_identity_limit(Some(1))
            .with_origin_limit(Some(1));

        assert_eq!(
            limiter.check("a@example.com", Some("10.0.0.1")).await.expect("check"),
            RateLimitDecision::Allowed
        );

        seed(&store, "a@example.com", "10.0.0.1", clock.now()).await;
        assert_eq!(
            limiter.check("a@example.com", Some("10.0.0.9")).await.expect("check"),
            RateLimitDecision::Limited(LimitScope::Identity)
        );
        assert_eq!(
            limiter.check("b@example.com", Some("10.0.0.1")).await.expect("check"),
            RateLimitDecision::Limited(LimitScope::Origin)
        );
        assert_eq!(
            limiter.check("b@example.com", None).await.expect("check"),
            RateLimitDecision::Allowed
        );

        clock.advance(Duration::seconds(60));
        assert_eq!(
            limiter.check("a@example.com", Some("10.0.0.1")).await.expect("check"),
            RateLimitDecision::Allowed
        );
    }

    #[tokio::test]
    async fn disabled_limits_always_allow() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryCodeStore::default());
        seed(&store, "a@example.com", "10.0.0.1", clock.now()).await;

        let limiter = RateLimiter::new(store, clock.clone())
            .with_identity_limit(Some(0))
            .with_origin_limit(None);
        assert_eq!(
            limiter.check("a@example.com", Some("10.0.0.1")).await.expect("check"),
            RateLimitDecision::Allowed
        );
        assert_eq!(limiter.window(clock.now()).per_identity, None);
    }
}
