//! Postgres-backed repositories.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | RepositoryError |
//! |------------|----------------------|-----------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | Any other | `Storage` |
//! | RowNotFound | N/A | `NotFound` |
//! | Other | N/A | `Storage` |
//!
//! Uniqueness is enforced by the schema (see [`ensure_schema`]): one account
//! per identifier, one document per `(account_id, year, month)`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{instrument, Span};

use payroll_core::{Account, AccountId, Credential, Document, DocumentId, Identifier, Period};

use super::{AccountRepository, DocumentRepository, RepositoryError};

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        id          UUID PRIMARY KEY,
        identifier  TEXT NOT NULL UNIQUE,
        credential  TEXT NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id             UUID PRIMARY KEY,
        account_id     UUID NOT NULL REFERENCES accounts (id),
        year           INTEGER NOT NULL CHECK (year BETWEEN 2000 AND 2100),
        month          INTEGER NOT NULL CHECK (month BETWEEN 1 AND 12),
        blob_location  TEXT NOT NULL,
        created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (account_id, year, month)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS documents_account_period_idx
        ON documents (account_id, year DESC, month DESC)
    "#,
];

/// Create the `accounts` and `documents` tables if they are missing.
#[instrument(skip(pool), err)]
pub async fn ensure_schema(pool: &PgPool) -> Result<(), RepositoryError> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
    }
    Ok(())
}

/// Postgres account repository.
#[derive(Debug, Clone)]
pub struct PostgresAccountRepository {
    pool: Arc<PgPool>,
}

impl PostgresAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

fn account_from_row(row: &PgRow) -> Result<Account, RepositoryError> {
    let decode = |e: sqlx::Error| map_sqlx_error("decode_account", e);
    let raw_identifier: String = row.try_get("identifier").map_err(decode)?;
    let identifier = Identifier::parse(&raw_identifier)
        .map_err(|e| RepositoryError::Storage(format!("stored identifier is invalid: {e}")))?;

    Ok(Account {
        id: AccountId::from_uuid(row.try_get("id").map_err(decode)?),
        identifier,
        credential: Credential::new(row.try_get::<String, _>("credential").map_err(decode)?),
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}

#[async_trait]
impl AccountRepository for PostgresAccountRepository {
    #[instrument(skip(self, identifier), fields(identifier = %identifier.masked()), err)]
    async fn find_by_identifier(&self, identifier: &Identifier) -> Result<Option<Account>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, identifier, credential, created_at
            FROM accounts
            WHERE identifier = $1
            "#,
        )
        .bind(identifier.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_account", e))?;

        row.as_ref().map(account_from_row).transpose()
    }

    #[instrument(skip(self, identifier, credential), fields(identifier = %identifier.masked(), account_id = tracing::field::Empty), err)]
    async fn create(&self, identifier: &Identifier, credential: &Credential) -> Result<Account, RepositoryError> {
        let id = AccountId::new();
        let row = sqlx::query(
            r#"
            INSERT INTO accounts (id, identifier, credential)
            VALUES ($1, $2, $3)
            RETURNING id, identifier, credential, created_at
            "#,
        )
        .bind(id.as_uuid())
        .bind(identifier.as_str())
        .bind(credential.expose())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_account", e))?;

        Span::current().record("account_id", tracing::field::display(id));
        account_from_row(&row)
    }
}

/// Postgres document repository.
#[derive(Debug, Clone)]
pub struct PostgresDocumentRepository {
    pool: Arc<PgPool>,
}

impl PostgresDocumentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

fn document_from_row(row: &PgRow) -> Result<Document, RepositoryError> {
    let decode = |e: sqlx::Error| map_sqlx_error("decode_document", e);
    let year: i32 = row.try_get("year").map_err(decode)?;
    let month: i32 = row.try_get("month").map_err(decode)?;
    let period = u32::try_from(month)
        .ok()
        .and_then(|m| Period::new(year, m).ok())
        .ok_or_else(|| RepositoryError::Storage(format!("stored period {year}-{month} is invalid")))?;

    Ok(Document {
        id: DocumentId::from_uuid(row.try_get("id").map_err(decode)?),
        account_id: AccountId::from_uuid(row.try_get("account_id").map_err(decode)?),
        period,
        blob_location: row.try_get("blob_location").map_err(decode)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(decode)?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at").map_err(decode)?,
    })
}

fn month_param(period: Period) -> i32 {
    // 1..=12 by construction
    period.month() as i32
}

#[async_trait]
impl DocumentRepository for PostgresDocumentRepository {
    #[instrument(skip(self), fields(account_id = %account_id, period = %period), err)]
    async fn find_one(&self, account_id: AccountId, period: Period) -> Result<Option<Document>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, account_id, year, month, blob_location, created_at, updated_at
            FROM documents
            WHERE account_id = $1 AND year = $2 AND month = $3
            "#,
        )
        .bind(account_id.as_uuid())
        .bind(period.year())
        .bind(month_param(period))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_document", e))?;

        row.as_ref().map(document_from_row).transpose()
    }

    #[instrument(skip(self), fields(account_id = %account_id, period = %period), err)]
    async fn upsert(
        &self,
        account_id: AccountId,
        period: Period,
        blob_location: &str,
    ) -> Result<Document, RepositoryError> {
        let row = sqlx::query(
            r#"
            INSERT INTO documents (id, account_id, year, month, blob_location)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (account_id, year, month)
            DO UPDATE SET
                blob_location = EXCLUDED.blob_location,
                updated_at = NOW()
            RETURNING id, account_id, year, month, blob_location, created_at, updated_at
            "#,
        )
        .bind(DocumentId::new().as_uuid())
        .bind(account_id.as_uuid())
        .bind(period.year())
        .bind(month_param(period))
        .bind(blob_location)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_document", e))?;

        document_from_row(&row)
    }

    #[instrument(skip(self), fields(account_id = %account_id), err)]
    async fn list_for_account(
        &self,
        account_id: AccountId,
        period: Option<Period>,
    ) -> Result<Vec<Document>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, year, month, blob_location, created_at, updated_at
            FROM documents
            WHERE account_id = $1
              AND ($2::INTEGER IS NULL OR year = $2)
              AND ($3::INTEGER IS NULL OR month = $3)
            ORDER BY year DESC, month DESC
            "#,
        )
        .bind(account_id.as_uuid())
        .bind(period.map(|p| p.year()))
        .bind(period.map(month_param))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_documents", e))?;

        rows.iter().map(document_from_row).collect()
    }

    #[instrument(skip(self), fields(account_id = %account_id), err)]
    async fn periods_for_account(&self, account_id: AccountId) -> Result<Vec<Period>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT year, month
            FROM documents
            WHERE account_id = $1
            ORDER BY year DESC, month DESC
            "#,
        )
        .bind(account_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_periods", e))?;

        rows.iter()
            .map(|row| {
                let year: i32 = row.try_get("year").map_err(|e| map_sqlx_error("decode_period", e))?;
                let month: i32 = row.try_get("month").map_err(|e| map_sqlx_error("decode_period", e))?;
                u32::try_from(month)
                    .ok()
                    .and_then(|m| Period::new(year, m).ok())
                    .ok_or_else(|| RepositoryError::Storage(format!("stored period {year}-{month} is invalid")))
            })
            .collect()
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => RepositoryError::Conflict(msg),
                _ => RepositoryError::Storage(msg),
            }
        }
        sqlx::Error::RowNotFound => RepositoryError::NotFound(format!("row not found in {operation}")),
        sqlx::Error::PoolClosed => {
            RepositoryError::Storage(format!("connection pool closed in {operation}"))
        }
        other => RepositoryError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}
