//! Blob storage for payslip pages and uploaded source documents.

mod object;

pub use object::ObjectBlobStore;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Content type stored with every payslip blob.
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Blob storage error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("blob storage error: {0}")]
    Storage(String),
}

/// Metadata returned by [`BlobStore::head`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobMeta {
    pub size: u64,
}

/// Keyed byte storage.
///
/// `put` overwrites whatever is stored under `key` and returns the durable
/// location of the blob. Keys are `/`-separated relative paths.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<String, BlobError>;

    async fn get(&self, key: &str) -> Result<Bytes, BlobError>;

    async fn head(&self, key: &str) -> Result<BlobMeta, BlobError>;

    /// Remove a blob. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), BlobError>;
}

#[async_trait]
impl<S> BlobStore for Arc<S>
where
    S: BlobStore + ?Sized,
{
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<String, BlobError> {
        (**self).put(key, bytes, content_type).await
    }

    async fn get(&self, key: &str) -> Result<Bytes, BlobError> {
        (**self).get(key).await
    }

    async fn head(&self, key: &str) -> Result<BlobMeta, BlobError> {
        (**self).head(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        (**self).delete(key).await
    }
}
