//! Employee account record.

use core::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::id::AccountId;
use crate::identifier::Identifier;

/// Secret an employee signs in with.
///
/// The initial value is derived from the identifier when the account is
/// created; afterwards it only changes through the credential-change flow,
/// which lives outside this workspace.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Raw secret, for handing to the persistence layer.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Employee identity keyed by national ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub id: AccountId,
    pub identifier: Identifier,
    #[serde(skip_serializing)]
    pub credential: Credential,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// A not yet persisted account with a fresh id.
    pub fn new(identifier: Identifier, credential: Credential) -> Self {
        Self {
            id: AccountId::new(),
            identifier,
            credential,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_accounts_get_distinct_ids() {
        let identifier = Identifier::parse("98765432100").unwrap();
        let a = Account::new(identifier.clone(), identifier.initial_credential());
        let b = Account::new(identifier.clone(), identifier.initial_credential());
        assert_ne!(a.id, b.id);
        assert_eq!(a.credential.expose(), "987654");
    }

    #[test]
    fn credential_is_not_serialized_or_debug_printed() {
        let identifier = Identifier::parse("98765432100").unwrap();
        let account = Account::new(identifier.clone(), identifier.initial_credential());
        let json = serde_json::to_value(&account).unwrap();
        assert!(json.get("credential").is_none());
        assert!(!format!("{account:?}").contains("987654"));
    }
}
