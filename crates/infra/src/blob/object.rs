use std::path::Path as FsPath;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};
use tracing::{debug, info};

use crate::config::{S3Config, StorageBackendKind, StorageConfig};

use super::{BlobError, BlobMeta, BlobStore};

/// [`BlobStore`] on top of any `object_store` backend (memory, local disk, S3).
#[derive(Debug, Clone)]
pub struct ObjectBlobStore {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    base_url: String,
    // LocalFileSystem rejects object attributes.
    content_types: bool,
}

impl ObjectBlobStore {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into().trim_matches('/').to_string(),
            base_url: base_url.into(),
            content_types: true,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "", "memory://")
    }

    pub fn local(data_dir: &FsPath) -> Result<Self, BlobError> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| BlobError::Storage(format!("create {}: {e}", data_dir.display())))?;
        let canonical = std::fs::canonicalize(data_dir).unwrap_or_else(|_| data_dir.to_path_buf());
        let store = LocalFileSystem::new_with_prefix(&canonical)
            .map_err(|e| BlobError::Storage(format!("local filesystem error: {e}")))?;
        info!("Storage: local backend at {}", canonical.display());

        let mut blobs = Self::new(Arc::new(store), "", format!("file://{}", canonical.display()));
        blobs.content_types = false;
        Ok(blobs)
    }

    pub fn s3(config: &S3Config) -> Result<Self, BlobError> {
        let bucket = config
            .bucket
            .as_deref()
            .ok_or_else(|| BlobError::Storage("S3_BUCKET not set".into()))?;

        let mut builder = AmazonS3Builder::new().with_region(&config.region);
        if let Some(key) = &config.access_key_id {
            builder = builder.with_access_key_id(key);
        }
        if let Some(secret) = &config.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }

        match config.endpoint_url.as_deref() {
            Some(endpoint) => {
                // object_store needs an absolute URL
                let endpoint = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                    endpoint.to_string()
                } else {
                    format!("https://{endpoint}")
                };
                builder = builder
                    .with_bucket_name(bucket)
                    .with_allow_http(endpoint.starts_with("http://"))
                    .with_endpoint(endpoint);
            }
            None => {
                builder = builder.with_url(format!("s3://{bucket}"));
            }
        }

        let store = builder.build().map_err(object_error)?;
        let prefix = config.prefix.clone().unwrap_or_default();
        info!(bucket, prefix = %prefix, region = %config.region, "Storage: S3 backend");

        Ok(Self::new(Arc::new(store), prefix, format!("s3://{bucket}")))
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self, BlobError> {
        match config.backend {
            StorageBackendKind::Memory => Ok(Self::in_memory()),
            StorageBackendKind::Local => Self::local(&config.data_dir),
            StorageBackendKind::S3 => Self::s3(&config.s3),
        }
    }

    fn path(&self, key: &str) -> Result<Path, BlobError> {
        let key = key.trim_start_matches('/');
        let full = if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix, key)
        };
        Path::parse(&full).map_err(|e| BlobError::Storage(format!("invalid blob key {key:?}: {e}")))
    }

    fn location(&self, path: &Path) -> String {
        if self.base_url.ends_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

fn object_error(err: object_store::Error) -> BlobError {
    match err {
        object_store::Error::NotFound { path, .. } => BlobError::NotFound(path),
        other => BlobError::Storage(other.to_string()),
    }
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<String, BlobError> {
        let path = self.path(key)?;
        let size = bytes.len();

        let mut opts = PutOptions::default();
        if self.content_types {
            let mut attributes = Attributes::new();
            attributes.insert(Attribute::ContentType, content_type.to_string().into());
            opts.attributes = attributes;
        }

        self.store
            .put_opts(&path, PutPayload::from(bytes), opts)
            .await
            .map_err(object_error)?;
        debug!(%path, size, "blob stored");
        Ok(self.location(&path))
    }

    async fn get(&self, key: &str) -> Result<Bytes, BlobError> {
        let path = self.path(key)?;
        let result = self.store.get(&path).await.map_err(object_error)?;
        result.bytes().await.map_err(object_error)
    }

    async fn head(&self, key: &str) -> Result<BlobMeta, BlobError> {
        let path = self.path(key)?;
        let meta = self.store.head(&path).await.map_err(object_error)?;
        Ok(BlobMeta { size: meta.size as u64 })
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let path = self.path(key)?;
        match self.store.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(object_error(e)),
        }
    }
}
