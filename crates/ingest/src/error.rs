use payroll_core::FailureKind;
use payroll_infra::jobs::JobStoreError;
use payroll_infra::{BlobError, RepositoryError};

/// Ingestion pipeline error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IngestError {
    /// The bytes are not a readable paginated document.
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    #[error("no identifier found on page")]
    IdentifierNotFound,

    #[error("identifier is invalid: {0}")]
    IdentifierInvalid(String),

    /// Blob store or repository failure; the only retryable kind.
    #[error("storage failure: {0}")]
    Storage(String),

    #[error("source document not found: {0}")]
    SourceNotFound(String),

    #[error("source document is {size} bytes, limit is {limit}")]
    SourceTooLarge { size: u64, limit: u64 },

    #[error("job tracking failed: {0}")]
    Job(#[from] JobStoreError),
}

impl IngestError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::Storage(_))
    }

    /// Classification recorded on a failed page outcome.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            IngestError::MalformedDocument(_) => FailureKind::MalformedPage,
            IngestError::IdentifierNotFound => FailureKind::IdentifierNotFound,
            IngestError::IdentifierInvalid(_) => FailureKind::IdentifierInvalid,
            IngestError::Storage(_)
            | IngestError::SourceNotFound(_)
            | IngestError::SourceTooLarge { .. }
            | IngestError::Job(_) => FailureKind::Storage,
        }
    }
}

impl From<RepositoryError> for IngestError {
    fn from(err: RepositoryError) -> Self {
        IngestError::Storage(err.to_string())
    }
}

impl From<BlobError> for IngestError {
    fn from(err: BlobError) -> Self {
        IngestError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_storage_failures_are_retryable() {
        assert!(IngestError::Storage("s3 down".into()).is_retryable());
        assert!(IngestError::from(RepositoryError::Conflict("dup".into())).is_retryable());
        assert!(!IngestError::IdentifierNotFound.is_retryable());
        assert!(!IngestError::MalformedDocument("eof".into()).is_retryable());
        assert!(!IngestError::SourceTooLarge { size: 2, limit: 1 }.is_retryable());
    }

    #[test]
    fn page_errors_map_to_outcome_kinds() {
        assert_eq!(
            IngestError::MalformedDocument("x".into()).failure_kind(),
            FailureKind::MalformedPage
        );
        assert_eq!(
            IngestError::IdentifierInvalid("10 digits".into()).failure_kind(),
            FailureKind::IdentifierInvalid
        );
        assert_eq!(
            IngestError::from(BlobError::Storage("timeout".into())).failure_kind(),
            FailureKind::Storage
        );
    }
}
