use super::{normalize_email, DirectoryError, Identity, IdentityDirectory};
use crate::hashing::SecretHasher;
use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

/// Identities backed by the `users` table.
#[derive(Clone, Debug)]
pub struct PgDirectory {
    pool: PgPool,
    hasher: SecretHasher,
}

impl PgDirectory {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            hasher: SecretHasher::default(),
        }
    }
}

fn identity_from_row(row: &PgRow) -> Result<Identity, sqlx::Error> {
    Ok(Identity {
        user_id: row.try_get("id")?,
        email: row.try_get("email")?,
        email_verified: row.try_get("email_verified")?,
    })
}

#[async_trait]
impl IdentityDirectory for PgDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, DirectoryError> {
        let query = "SELECT id, email, email_verified FROM users WHERE email = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;

        Ok(row.as_ref().map(identity_from_row).transpose()?)
    }

    async fn verify_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<Identity>, DirectoryError> {
        let query =
            "SELECT id, email, email_verified, password_hash FROM users WHERE email = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let Some(row) = sqlx::query(query)
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?
        else {
            return Ok(None);
        };

        let stored: String = row.try_get("password_hash")?;
        if !self.hasher.verify(password, &stored) {
            return Ok(None);
        }
        Ok(Some(identity_from_row(&row)?))
    }

    async fn set_password(&self, user_id: Uuid, password: &str) -> Result<(), DirectoryError> {
        let password_hash = self.hasher.hash(password)?;
        let query = "UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn mark_email_verified(&self, user_id: Uuid) -> Result<(), DirectoryError> {
        let query = r"
            UPDATE users
            SET email_verified = TRUE, email_verified_at = NOW(), updated_at = NOW()
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }
}
