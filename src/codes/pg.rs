use super::policy::CodeKind;
use super::store::{CodeRecord, CodeStore, InsertOutcome, RateWindow, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};
use tracing::{info_span, Instrument, Span};
use uuid::Uuid;

/// Code rows in `password_reset_codes` or `email_verification_codes`.
#[derive(Clone, Debug)]
pub struct PgCodeStore {
    pool: PgPool,
    table: &'static str,
}

impl PgCodeStore {
    #[must_use]
    pub fn new(pool: PgPool, kind: CodeKind) -> Self {
        Self {
            pool,
            table: kind.table(),
        }
    }
}

fn db_span(operation: &'static str, statement: &str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

const COLUMNS: &str =
    "id, user_id, email, code_hash, expires_at, attempts, consumed, created_at, ip_address";

fn record_from_row(row: &PgRow) -> Result<CodeRecord, sqlx::Error> {
    Ok(CodeRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        email: row.try_get("email")?,
        code_hash: row.try_get("code_hash")?,
        expires_at: row.try_get("expires_at")?,
        attempts: row.try_get("attempts")?,
        consumed: row.try_get("consumed")?,
        created_at: row.try_get("created_at")?,
        ip_address: row.try_get("ip_address")?,
    })
}

fn to_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

impl PgCodeStore {
    async fn count_where(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        column: &str,
        value: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let query = format!(
            "SELECT COUNT(*) FROM {} WHERE {column} = $1 AND created_at > $2",
            self.table
        );
        let count: i64 = sqlx::query_scalar(&query)
            .bind(value)
            .bind(since)
            .fetch_one(&mut **tx)
            .instrument(db_span("SELECT", &query))
            .await?;
        Ok(to_count(count))
    }

    /// Serialize writers that touch the same email or origin until the transaction ends.
    async fn lock_key(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        key: &str,
    ) -> Result<(), sqlx::Error> {
        let query = "SELECT pg_advisory_xact_lock(hashtextextended($1, 0))";
        sqlx::query(query)
            .bind(format!("{}:{key}", self.table))
            .execute(&mut **tx)
            .instrument(db_span("SELECT", query))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CodeStore for PgCodeStore {
    async fn count_for_email_since(
        &self,
        email: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let count = self.count_where(&mut tx, "email", email, since).await?;
        tx.commit().await?;
        Ok(count)
    }

    async fn count_for_origin_since(
        &self,
        origin: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let count = self.count_where(&mut tx, "ip_address", origin, since).await?;
        tx.commit().await?;
        Ok(count)
    }

    async fn insert_replacing(
        &self,
        record: &CodeRecord,
        window: &RateWindow,
    ) -> Result<InsertOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        self.lock_key(&mut tx, &format!("email:{}", record.email))
            .await?;
        if let Some(origin) = record.ip_address.as_deref() {
            self.lock_key(&mut tx, &format!("origin:{origin}")).await?;
        }

        let identity_count = self
            .count_where(&mut tx, "email", &record.email, window.since)
            .await?;
        let origin_count = match record.ip_address.as_deref() {
            Some(origin) => {
                self.count_where(&mut tx, "ip_address", origin, window.since)
                    .await?
            }
            None => 0,
        };
        if let Some(scope) = window.exceeded(identity_count, origin_count) {
            tx.rollback().await?;
            return Ok(InsertOutcome::Limited(scope));
        }

        let delete = format!("DELETE FROM {} WHERE email = $1", self.table);
        sqlx::query(&delete)
            .bind(&record.email)
            .execute(&mut *tx)
            .instrument(db_span("DELETE", &delete))
            .await?;

        let insert = format!(
            "INSERT INTO {} ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            self.table
        );
        sqlx::query(&insert)
            .bind(record.id)
            .bind(record.user_id)
            .bind(&record.email)
            .bind(&record.code_hash)
            .bind(record.expires_at)
            .bind(record.attempts)
            .bind(record.consumed)
            .bind(record.created_at)
            .bind(record.ip_address.as_deref())
            .execute(&mut *tx)
            .instrument(db_span("INSERT", &insert))
            .await?;

        tx.commit().await?;
        Ok(InsertOutcome::Inserted)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let query = format!("DELETE FROM {} WHERE id = $1", self.table);
        sqlx::query(&query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", &query))
            .await?;
        Ok(())
    }

    async fn codes_for_email(&self, email: &str) -> Result<Vec<CodeRecord>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM {} WHERE email = $1 ORDER BY created_at DESC",
            self.table
        );
        let rows = sqlx::query(&query)
            .bind(email)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        Ok(rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn increment_attempts(&self, id: Uuid) -> Result<(), StoreError> {
        let query = format!(
            "UPDATE {} SET attempts = attempts + 1 WHERE id = $1",
            self.table
        );
        sqlx::query(&query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await?;
        Ok(())
    }

    async fn mark_consumed(&self, id: Uuid) -> Result<bool, StoreError> {
        let query = format!(
            "UPDATE {} SET consumed = TRUE WHERE id = $1 AND consumed = FALSE",
            self.table
        );
        let result = sqlx::query(&query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let query = format!("DELETE FROM {} WHERE expires_at <= $1", self.table);
        let result = sqlx::query(&query)
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("DELETE", &query))
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let query = format!("DELETE FROM {} WHERE created_at < $1", self.table);
        let result = sqlx::query(&query)
            .bind(cutoff)
            .execute(&self.pool)
            .instrument(db_span("DELETE", &query))
            .await?;
        Ok(result.rows_affected())
    }
}
