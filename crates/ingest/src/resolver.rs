//! Identity Resolver: identifier to account, creating accounts on first sighting.

use std::sync::Arc;

use tracing::{debug, info};

use payroll_core::{Account, Identifier};
use payroll_infra::{AccountRepository, RepositoryError};

use crate::error::IngestError;

#[derive(Clone)]
pub struct IdentityResolver {
    accounts: Arc<dyn AccountRepository>,
}

impl IdentityResolver {
    pub fn new(accounts: Arc<dyn AccountRepository>) -> Self {
        Self { accounts }
    }

    /// Find the account for `identifier`, or create it with the
    /// identifier-derived initial credential.
    ///
    /// Existing accounts are returned as stored; their credential is never
    /// recomputed. Losing a creation race to a concurrent page with the same
    /// identifier re-reads and returns the winner's account.
    pub async fn resolve(&self, identifier: &Identifier) -> Result<Account, IngestError> {
        if let Some(account) = self.accounts.find_by_identifier(identifier).await? {
            return Ok(account);
        }

        match self
            .accounts
            .create(identifier, &identifier.initial_credential())
            .await
        {
            Ok(account) => {
                info!(identifier = %identifier.masked(), account_id = %account.id, "account created");
                Ok(account)
            }
            Err(RepositoryError::Conflict(_)) => {
                debug!(identifier = %identifier.masked(), "account created concurrently, re-reading");
                self.accounts
                    .find_by_identifier(identifier)
                    .await?
                    .ok_or_else(|| {
                        IngestError::Storage(format!(
                            "account {} conflicted on create but is not readable",
                            identifier.masked()
                        ))
                    })
            }
            Err(e) => Err(e.into()),
        }
    }
}
