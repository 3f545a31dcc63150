//! Document Persister: store a page and upsert its document record.

use std::sync::Arc;

use tracing::debug;

use payroll_core::{Account, Document, Identifier, Period};
use payroll_infra::blob::PDF_CONTENT_TYPE;
use payroll_infra::{BlobStore, DocumentRepository};

use crate::error::IngestError;
use crate::splitter::Page;

/// Stable blob key for one employee's payslip in one period.
///
/// Same inputs, same key: a retried page overwrites its earlier blob.
pub fn content_key(period: Period, identifier: &Identifier) -> String {
    format!(
        "payslips/{}/{:02}/{}.pdf",
        period.year(),
        period.month(),
        identifier.as_str()
    )
}

#[derive(Clone)]
pub struct DocumentPersister {
    blobs: Arc<dyn BlobStore>,
    documents: Arc<dyn DocumentRepository>,
}

impl DocumentPersister {
    pub fn new(blobs: Arc<dyn BlobStore>, documents: Arc<dyn DocumentRepository>) -> Self {
        Self { blobs, documents }
    }

    /// Idempotent per `(account, period)`: re-running leaves one blob and one
    /// document row, pointing at the latest bytes.
    pub async fn persist(
        &self,
        account: &Account,
        page: &Page,
        period: Period,
    ) -> Result<Document, IngestError> {
        let key = content_key(period, &account.identifier);
        let location = self
            .blobs
            .put(&key, page.bytes.clone(), PDF_CONTENT_TYPE)
            .await?;
        let document = self.documents.upsert(account.id, period, &location).await?;
        debug!(page = page.number, key = %key, document_id = %document.id, "page persisted");
        Ok(document)
    }
}
