//! Process-local record of revoked tokens and of which identity owns each issued token.

use crate::clock::Clock;
use crate::sweeper::spawn_periodic;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_RETENTION_HOURS: i64 = 7 * 24;
pub const DEFAULT_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60 * 60);

const IDENTITY_STRIPES: u64 = 64;

#[derive(Clone, Debug)]
struct Ownership {
    identity: String,
    recorded_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub revocations: usize,
    pub ownerships: usize,
}

#[derive(Debug)]
pub struct RevocationLedger {
    revoked: DashMap<String, DateTime<Utc>>,
    owners: DashMap<String, Ownership>,
    // Serializes `rotate` and `revoke_all` per identity.
    stripes: Box<[Mutex<()>]>,
    retention: Duration,
    clock: Arc<dyn Clock>,
}

impl RevocationLedger {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            revoked: DashMap::new(),
            owners: DashMap::new(),
            stripes: (0..IDENTITY_STRIPES).map(|_| Mutex::new(())).collect(),
            retention: Duration::hours(DEFAULT_RETENTION_HOURS),
            clock,
        }
    }

    /// Entries younger than `retention` are never swept. Keep it at least as long as the
    /// refresh token lifetime.
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    #[must_use]
    pub fn retention(&self) -> Duration {
        self.retention
    }

    fn identity_lock(&self, identity: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        identity.hash(&mut hasher);
        let index = usize::try_from(hasher.finish() % IDENTITY_STRIPES).unwrap_or_default();
        self.stripes[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `token` revoked.
    ///
    /// Returns `true` only for the caller that performed the revocation; every later or
    /// concurrent caller gets `false`. The refresh flow relies on this to pick a single
    /// winner among racing refreshes of the same token.
    pub fn revoke(&self, token: &str) -> bool {
        if token.trim().is_empty() {
            warn!("Ignoring revocation of a blank token");
            return false;
        }

        match self.revoked.entry(token.to_string()) {
            Entry::Occupied(entry) => {
                debug!(revoked_at = %entry.get(), "Token already revoked");
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(self.clock.now());
                true
            }
        }
    }

    pub fn record_ownership(&self, token: &str, identity: &str) {
        if token.trim().is_empty() || identity.trim().is_empty() {
            warn!("Refusing to record ownership for a blank token or identity");
            return;
        }
        self.owners.insert(
            token.to_string(),
            Ownership {
                identity: identity.to_string(),
                recorded_at: self.clock.now(),
            },
        );
    }

    /// Revoke `current` and record `replacements` as owned by `identity`.
    ///
    /// Runs under the identity's lock, so a concurrent `revoke_all(identity)` either
    /// sees the replacements or revokes `current` first. Returns `false`, recording
    /// nothing, when `current` was already revoked.
    pub fn rotate(&self, current: &str, replacements: &[&str], identity: &str) -> bool {
        let _guard = self.identity_lock(identity);
        if !self.revoke(current) {
            return false;
        }
        for token in replacements {
            self.record_ownership(token, identity);
        }
        true
    }

    /// Blank tokens are treated as revoked.
    #[must_use]
    pub fn is_revoked(&self, token: &str) -> bool {
        if token.trim().is_empty() {
            return true;
        }
        self.revoked.contains_key(token)
    }

    /// Revoke every tracked token owned by `identity`. Returns how many were newly revoked.
    pub fn revoke_all(&self, identity: &str) -> usize {
        let _guard = self.identity_lock(identity);
        let owned: Vec<String> = self
            .owners
            .iter()
            .filter(|entry| entry.value().identity == identity)
            .map(|entry| entry.key().clone())
            .collect();

        let revoked = owned.iter().filter(|token| self.revoke(token)).count();
        info!(revoked, tracked = owned.len(), "Revoked all sessions for identity");
        revoked
    }

    #[must_use]
    pub fn revocation_time(&self, token: &str) -> Option<DateTime<Utc>> {
        self.revoked.get(token).map(|entry| *entry.value())
    }

    #[must_use]
    pub fn revoked_count(&self) -> usize {
        self.revoked.len()
    }

    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.owners.len()
    }

    /// Drop revocation and ownership entries recorded at or before `now - retention`.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepStats {
        let cutoff = now - self.retention;
        let mut stats = SweepStats::default();

        self.revoked.retain(|_, revoked_at| {
            let keep = *revoked_at > cutoff;
            if !keep {
                stats.revocations += 1;
            }
            keep
        });
        self.owners.retain(|_, ownership| {
            let keep = ownership.recorded_at > cutoff;
            if !keep {
                stats.ownerships += 1;
            }
            keep
        });

        if stats != SweepStats::default() {
            info!(
                revocations = stats.revocations,
                ownerships = stats.ownerships,
                "Swept revocation ledger"
            );
        }
        stats
    }

    pub fn spawn_sweeper(
        self: &Arc<Self>,
        every: std::time::Duration,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let ledger = Arc::clone(self);
        spawn_periodic("revocation-ledger", every, shutdown, move || {
            let ledger = Arc::clone(&ledger);
            async move {
                ledger.sweep(ledger.clock.now());
            }
        })
    }
}
