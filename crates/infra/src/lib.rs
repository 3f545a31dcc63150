//! Infrastructure layer: blob storage, repositories, job status tracking, config.
//!
//! Everything the ingestion pipeline talks to lives behind a trait here, with
//! an in-memory implementation for tests/dev and a durable one for deployment.

pub mod blob;
pub mod config;
pub mod jobs;
pub mod repository;

pub use blob::{BlobError, BlobMeta, BlobStore, ObjectBlobStore};
pub use config::PayrollConfig;
pub use jobs::{IngestionJob, JobPatch, JobStatus, JobStore, JobTracker};
pub use repository::{AccountRepository, DocumentRepository, RepositoryError};
