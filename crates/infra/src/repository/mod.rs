//! Account and document repositories.
//!
//! Both tables are keyed by natural keys with unique constraints: one
//! account per identifier, one document per `(account, period)`. The
//! in-memory implementations enforce the same constraints so tests exercise
//! the conflict paths the Postgres implementations hit in production.

mod in_memory;
mod postgres;

pub use in_memory::{InMemoryAccountRepository, InMemoryDocumentRepository};
pub use postgres::{ensure_schema, PostgresAccountRepository, PostgresDocumentRepository};

use std::sync::Arc;

use async_trait::async_trait;

use payroll_core::{Account, AccountId, Credential, Document, Identifier, Period};

/// Repository error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    /// A unique constraint rejected the write (e.g. concurrent account creation).
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn find_by_identifier(&self, identifier: &Identifier) -> Result<Option<Account>, RepositoryError>;

    /// Insert a new account. Fails with [`RepositoryError::Conflict`] when an
    /// account with the same identifier already exists.
    async fn create(&self, identifier: &Identifier, credential: &Credential) -> Result<Account, RepositoryError>;
}

#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn find_one(&self, account_id: AccountId, period: Period) -> Result<Option<Document>, RepositoryError>;

    /// Insert or replace the document for `(account_id, period)`.
    ///
    /// Replacing keeps the document id and `created_at`.
    async fn upsert(
        &self,
        account_id: AccountId,
        period: Period,
        blob_location: &str,
    ) -> Result<Document, RepositoryError>;

    /// Documents for an account, newest period first, optionally narrowed to one period.
    async fn list_for_account(
        &self,
        account_id: AccountId,
        period: Option<Period>,
    ) -> Result<Vec<Document>, RepositoryError>;

    /// Distinct periods an account has documents for, newest first.
    async fn periods_for_account(&self, account_id: AccountId) -> Result<Vec<Period>, RepositoryError>;
}

#[async_trait]
impl<S> AccountRepository for Arc<S>
where
    S: AccountRepository + ?Sized,
{
    async fn find_by_identifier(&self, identifier: &Identifier) -> Result<Option<Account>, RepositoryError> {
        (**self).find_by_identifier(identifier).await
    }

    async fn create(&self, identifier: &Identifier, credential: &Credential) -> Result<Account, RepositoryError> {
        (**self).create(identifier, credential).await
    }
}

#[async_trait]
impl<S> DocumentRepository for Arc<S>
where
    S: DocumentRepository + ?Sized,
{
    async fn find_one(&self, account_id: AccountId, period: Period) -> Result<Option<Document>, RepositoryError> {
        (**self).find_one(account_id, period).await
    }

    async fn upsert(
        &self,
        account_id: AccountId,
        period: Period,
        blob_location: &str,
    ) -> Result<Document, RepositoryError> {
        (**self).upsert(account_id, period, blob_location).await
    }

    async fn list_for_account(
        &self,
        account_id: AccountId,
        period: Option<Period>,
    ) -> Result<Vec<Document>, RepositoryError> {
        (**self).list_for_account(account_id, period).await
    }

    async fn periods_for_account(&self, account_id: AccountId) -> Result<Vec<Period>, RepositoryError> {
        (**self).periods_for_account(account_id).await
    }
}
