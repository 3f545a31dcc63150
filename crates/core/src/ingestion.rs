//! Outcome model of one ingestion run.

use serde::{Deserialize, Serialize};

use crate::id::{AccountId, DocumentId};

/// Classification of a page-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The page could not be read as a document.
    MalformedPage,
    /// No identifier-shaped text on the page.
    IdentifierNotFound,
    /// Identifier-shaped text that does not normalize to eleven digits.
    IdentifierInvalid,
    /// Blob store or repository call failed.
    Storage,
}

impl FailureKind {
    /// Only storage failures are worth another attempt; the rest are
    /// properties of the page content and would fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Storage)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Result of processing one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageOutcome {
    /// 1-indexed position in the source document.
    pub page_number: u32,
    pub success: bool,
    /// Masked identifier, when one was extracted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<AccountId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<DocumentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PageFailure>,
}

impl PageOutcome {
    pub fn succeeded(
        page_number: u32,
        identifier: String,
        account_id: AccountId,
        document_id: DocumentId,
    ) -> Self {
        Self {
            page_number,
            success: true,
            identifier: Some(identifier),
            account_id: Some(account_id),
            document_id: Some(document_id),
            error: None,
        }
    }

    pub fn failed(page_number: u32, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            page_number,
            success: false,
            identifier: None,
            account_id: None,
            document_id: None,
            error: Some(PageFailure {
                kind,
                message: message.into(),
            }),
        }
    }

    pub fn with_identifier(mut self, identifier: String) -> Self {
        self.identifier = Some(identifier);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.kind.is_retryable())
    }
}

/// Aggregate result of an ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionResult {
    pub total_pages: u32,
    /// Pages persisted successfully.
    pub processed_pages: u32,
    /// One entry per page, ordered by page number.
    pub outcomes: Vec<PageOutcome>,
    /// True when at least one page was persisted.
    pub success: bool,
}

impl IngestionResult {
    pub fn from_outcomes(total_pages: u32, mut outcomes: Vec<PageOutcome>) -> Self {
        outcomes.sort_by_key(|o| o.page_number);
        let processed_pages = outcomes.iter().filter(|o| o.success).count() as u32;
        Self {
            total_pages,
            processed_pages,
            outcomes,
            success: processed_pages > 0,
        }
    }

    pub fn failed_pages(&self) -> impl Iterator<Item = &PageOutcome> {
        self.outcomes.iter().filter(|o| !o.success)
    }
}
