//! Lookup of identities and their credentials.

mod memory;
mod pg;

pub use memory::MemoryDirectory;
pub use pg::PgDirectory;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: String,
    pub email_verified: bool,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("identity store query failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Hash(#[from] crate::hashing::HashError),
}

#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, DirectoryError>;

    /// Returns the identity only when `password` matches its stored hash.
    async fn verify_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<Identity>, DirectoryError>;

    async fn set_password(&self, user_id: Uuid, password: &str) -> Result<(), DirectoryError>;

    async fn mark_email_verified(&self, user_id: Uuid) -> Result<(), DirectoryError>;
}

/// Identities are keyed by trimmed, lowercased email.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
