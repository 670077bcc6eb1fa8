//! PostgreSQL idempotency ledger

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::store::IdempotencyStore;
use super::types::{IdempotencyRecord, StoredResponse};
use crate::ledger::{StoreError, UserId};

fn row_to_record(row: &PgRow) -> Result<IdempotencyRecord, StoreError> {
    let status: Option<i16> = row.try_get("response_status")?;
    let status = status
        .map(|s| {
            u16::try_from(s).map_err(|_| StoreError::Corrupt(format!("response_status {}", s)))
        })
        .transpose()?;

    Ok(IdempotencyRecord {
        id: row.try_get("id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        user_id: row.try_get("user_id")?,
        request_path: row.try_get("request_path")?,
        request_hash: row.try_get("request_hash")?,
        response_status: status,
        response_body: row.try_get("response_body")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

pub struct PgIdempotencyStore {
    pool: PgPool,
}

impl PgIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn find(
        &self,
        key: &str,
        user_id: UserId,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, idempotency_key, user_id, request_path, request_hash,
                   response_status, response_body, created_at, expires_at
            FROM idempotency_keys
            WHERE idempotency_key = $1 AND user_id = $2
            "#,
        )
        .bind(key)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn delete_expired(
        &self,
        key: &str,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "DELETE FROM idempotency_keys WHERE idempotency_key = $1 AND user_id = $2 AND expires_at <= $3",
        )
        .bind(key)
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn try_insert(&self, record: &IdempotencyRecord) -> Result<bool, StoreError> {
        // ON CONFLICT DO NOTHING: a concurrent holder makes us lose immediately
        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_keys
                (id, idempotency_key, user_id, request_path, request_hash, created_at, expires_at)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (idempotency_key, user_id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(&record.idempotency_key)
        .bind(record.user_id)
        .bind(&record.request_path)
        .bind(&record.request_hash)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn complete(
        &self,
        record: &IdempotencyRecord,
        response: &StoredResponse,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET response_status = $1, response_body = $2
            WHERE id = $3 AND response_status IS NULL
            "#,
        )
        .bind(response.status as i16)
        .bind(&response.body)
        .bind(record.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, record: &IdempotencyRecord) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM idempotency_keys WHERE id = $1 AND response_status IS NULL")
            .bind(record.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
