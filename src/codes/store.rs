//! Durable storage for hashed one-time codes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub email: String,
    pub code_hash: String,
    pub expires_at: DateTime<Utc>,
    pub attempts: i32,
    pub consumed: bool,
    pub created_at: DateTime<Utc>,
    pub ip_address: Option<String>,
}

impl CodeRecord {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimitScope {
    Identity,
    Origin,
}

/// Counting window passed to `CodeStore::insert_replacing`; rows created strictly after
/// `since` count against the limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateWindow {
    pub since: DateTime<Utc>,
    pub per_identity: Option<u32>,
    pub per_origin: Option<u32>,
}

impl RateWindow {
    /// Which limit, if any, `identity_count` / `origin_count` already reach.
    #[must_use]
    pub fn exceeded(&self, identity_count: u64, origin_count: u64) -> Option<LimitScope> {
        if self
            .per_identity
            .is_some_and(|limit| identity_count >= u64::from(limit))
        {
            return Some(LimitScope::Identity);
        }
        if self
            .per_origin
            .is_some_and(|limit| origin_count >= u64::from(limit))
        {
            return Some(LimitScope::Origin);
        }
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Limited(LimitScope),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("code storage query failed: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait CodeStore: Send + Sync {
    async fn count_for_email_since(
        &self,
        email: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn count_for_origin_since(
        &self,
        origin: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Atomically check `window`, drop every earlier code for the email and store `record`.
    async fn insert_replacing(
        &self,
        record: &CodeRecord,
        window: &RateWindow,
    ) -> Result<InsertOutcome, StoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    /// Every stored code for `email`, newest first.
    async fn codes_for_email(&self, email: &str) -> Result<Vec<CodeRecord>, StoreError>;

    async fn increment_attempts(&self, id: Uuid) -> Result<(), StoreError>;

    /// Flip `consumed` if it is still false. Returns whether this call did it.
    async fn mark_consumed(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Code store kept in process memory. Each operation holds the lock for its duration.
#[derive(Debug, Default)]
pub struct MemoryCodeStore {
    rows: Mutex<Vec<CodeRecord>>,
}

impl MemoryCodeStore {
    pub async fn snapshot(&self) -> Vec<CodeRecord> {
        self.rows.lock().await.clone()
    }
}

fn count_since<'a>(
    rows: impl Iterator<Item = &'a CodeRecord>,
    since: DateTime<Utc>,
) -> u64 {
    rows.filter(|row| row.created_at > since).count() as u64
}

#[async_trait]
impl CodeStore for MemoryCodeStore {
    async fn count_for_email_since(
        &self,
        email: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let rows = self.rows.lock().await;
        Ok(count_since(rows.iter().filter(|row| row.email == email), since))
    }

    async fn count_for_origin_since(
        &self,
        origin: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let rows = self.rows.lock().await;
        Ok(count_since(
            rows.iter()
                .filter(|row| row.ip_address.as_deref() == Some(origin)),
            since,
        ))
    }

    async fn insert_replacing(
        &self,
        record: &CodeRecord,
        window: &RateWindow,
    ) -> Result<InsertOutcome, StoreError> {
        let mut rows = self.rows.lock().await;
        let identity_count = count_since(
            rows.iter().filter(|row| row.email == record.email),
            window.since,
        );
        let origin_count = record.ip_address.as_deref().map_or(0, |origin| {
            count_since(
                rows.iter()
                    .filter(|row| row.ip_address.as_deref() == Some(origin)),
                window.since,
            )
        });
        if let Some(scope) = window.exceeded(identity_count, origin_count) {
            return Ok(InsertOutcome::Limited(scope));
        }

        rows.retain(|row| row.email != record.email);
        rows.push(record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.rows.lock().await.retain(|row| row.id != id);
        Ok(())
    }

    async fn codes_for_email(&self, email: &str) -> Result<Vec<CodeRecord>, StoreError> {
        let rows = self.rows.lock().await;
        let mut codes: Vec<CodeRecord> = rows
            .iter()
            .filter(|row| row.email == email)
            .cloned()
            .collect();
        codes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(codes)
    }

    async fn increment_attempts(&self, id: Uuid) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        if let Some(row) = rows.iter_mut().find(|row| row.id == id) {
            row.attempts += 1;
        }
        Ok(())
    }

    async fn mark_consumed(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock().await;
        Ok(match rows.iter_mut().find(|row| row.id == id) {
            Some(row) if !row.consumed => {
                row.consumed = true;
                true
            }
            _ => false,
        })
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|row| !row.is_expired(now));
        Ok((before - rows.len()) as u64)
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|row| row.created_at >= cutoff);
        Ok((before - rows.len()) as u64)
    }
}
