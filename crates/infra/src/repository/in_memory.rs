use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use payroll_core::{Account, AccountId, Credential, Document, DocumentId, Identifier, Period};

use super::{AccountRepository, DocumentRepository, RepositoryError};

fn poisoned() -> RepositoryError {
    RepositoryError::Storage("repository lock poisoned".to_string())
}

/// In-memory account repository for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAccountRepository {
    accounts: RwLock<HashMap<Identifier, Account>>,
}

impl InMemoryAccountRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing account (e.g. one whose credential was already changed).
    pub fn insert(&self, account: Account) -> Result<(), RepositoryError> {
        let mut accounts = self.accounts.write().map_err(|_| poisoned())?;
        accounts.insert(account.identifier.clone(), account);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.accounts.read().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccountRepository {
    async fn find_by_identifier(&self, identifier: &Identifier) -> Result<Option<Account>, RepositoryError> {
        let accounts = self.accounts.read().map_err(|_| poisoned())?;
        Ok(accounts.get(identifier).cloned())
    }

    async fn create(&self, identifier: &Identifier, credential: &Credential) -> Result<Account, RepositoryError> {
        let mut accounts = self.accounts.write().map_err(|_| poisoned())?;
        if accounts.contains_key(identifier) {
            return Err(RepositoryError::Conflict(format!(
                "account {} already exists",
                identifier.masked()
            )));
        }

        let account = Account::new(identifier.clone(), credential.clone());
        accounts.insert(identifier.clone(), account.clone());
        Ok(account)
    }
}

/// In-memory document repository for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryDocumentRepository {
    documents: RwLock<HashMap<(AccountId, Period), Document>>,
}

impl InMemoryDocumentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DocumentRepository for InMemoryDocumentRepository {
    async fn find_one(&self, account_id: AccountId, period: Period) -> Result<Option<Document>, RepositoryError> {
        let documents = self.documents.read().map_err(|_| poisoned())?;
        Ok(documents.get(&(account_id, period)).cloned())
    }

    async fn upsert(
        &self,
        account_id: AccountId,
        period: Period,
        blob_location: &str,
    ) -> Result<Document, RepositoryError> {
        let mut documents = self.documents.write().map_err(|_| poisoned())?;
        let now = Utc::now();

        let document = documents
            .entry((account_id, period))
            .and_modify(|doc| {
                doc.blob_location = blob_location.to_string();
                doc.updated_at = now;
            })
            .or_insert_with(|| Document {
                id: DocumentId::new(),
                account_id,
                period,
                blob_location: blob_location.to_string(),
                created_at: now,
                updated_at: now,
            });
        Ok(document.clone())
    }

    async fn list_for_account(
        &self,
        account_id: AccountId,
        period: Option<Period>,
    ) -> Result<Vec<Document>, RepositoryError> {
        let documents = self.documents.read().map_err(|_| poisoned())?;
        let mut found: Vec<Document> = documents
            .values()
            .filter(|d| d.account_id == account_id)
            .filter(|d| period.is_none_or(|p| d.period == p))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.period.cmp(&a.period));
        Ok(found)
    }

    async fn periods_for_account(&self, account_id: AccountId) -> Result<Vec<Period>, RepositoryError> {
        let documents = self.documents.read().map_err(|_| poisoned())?;
        let periods: BTreeSet<Period> = documents
            .keys()
            .filter(|(a, _)| *a == account_id)
            .map(|(_, p)| *p)
            .collect();
        Ok(periods.into_iter().rev().collect())
    }
}
