//! Caller-facing entry points: start an ingestion, poll its status, list
//! the documents it produced.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{info, warn};

use payroll_core::{Document, Identifier, JobId, Period};
use payroll_infra::config::IngestConfig;
use payroll_infra::jobs::{JobSweeper, JobSweeperHandle, TrackerPolicy};
use payroll_infra::{
    AccountRepository, BlobError, BlobStore, DocumentRepository, IngestionJob, JobStore, JobTracker,
};

use crate::error::IngestError;
use crate::extractor::IdentifierExtractor;
use crate::orchestrator::{DEFAULT_CHUNK_SIZE, IngestionOrchestrator};
use crate::persister::DocumentPersister;
use crate::resolver::IdentityResolver;

/// Where the source document comes from.
#[derive(Debug, Clone)]
pub enum SourceRef {
    /// Previously uploaded to the blob store; deleted once the job ends.
    Blob { key: String },
    /// Bytes handed over directly.
    Inline(Bytes),
}

/// External collaborators the pipeline runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub blobs: Arc<dyn BlobStore>,
    pub accounts: Arc<dyn AccountRepository>,
    pub documents: Arc<dyn DocumentRepository>,
    pub jobs: Arc<dyn JobStore>,
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub chunk_size: usize,
    pub max_source_bytes: u64,
    pub job_timeout: Option<Duration>,
    pub tracker: TrackerPolicy,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_source_bytes: 100 * 1024 * 1024,
            job_timeout: None,
            tracker: TrackerPolicy::default(),
        }
    }
}

impl From<&IngestConfig> for ServiceSettings {
    fn from(config: &IngestConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            max_source_bytes: config.max_source_bytes,
            job_timeout: Some(config.job_timeout),
            tracker: config.tracker_policy(),
        }
    }
}

#[derive(Clone)]
pub struct IngestionService {
    orchestrator: IngestionOrchestrator,
    blobs: Arc<dyn BlobStore>,
    accounts: Arc<dyn AccountRepository>,
    documents: Arc<dyn DocumentRepository>,
    settings: ServiceSettings,
}

impl IngestionService {
    pub fn new(collaborators: Collaborators, settings: ServiceSettings) -> Self {
        let Collaborators {
            blobs,
            accounts,
            documents,
            jobs,
        } = collaborators;

        let tracker = JobTracker::new(jobs, settings.tracker.clone());
        let orchestrator = IngestionOrchestrator::new(
            IdentifierExtractor::default(),
            IdentityResolver::new(accounts.clone()),
            DocumentPersister::new(blobs.clone(), documents.clone()),
            tracker,
        )
        .with_chunk_size(settings.chunk_size);

        Self {
            orchestrator,
            blobs,
            accounts,
            documents,
            settings,
        }
    }

    pub fn tracker(&self) -> &JobTracker {
        self.orchestrator.tracker()
    }

    /// Run the periodic timeout/eviction sweep on the current runtime.
    pub fn start_sweeper(&self, interval: Duration) -> JobSweeperHandle {
        JobSweeper::new(self.tracker().clone(), interval).start()
    }

    /// Validate the source, register a job and process it in the background.
    ///
    /// Returns as soon as the job exists. A missing or oversized source is
    /// rejected here and no job is created.
    pub async fn start_ingestion(&self, source: SourceRef, period: Period) -> Result<JobId, IngestError> {
        let size = match &source {
            SourceRef::Inline(bytes) => bytes.len() as u64,
            SourceRef::Blob { key } => self.blobs.head(key).await.map_err(source_error)?.size,
        };
        if size > self.settings.max_source_bytes {
            return Err(IngestError::SourceTooLarge {
                size,
                limit: self.settings.max_source_bytes,
            });
        }

        let job_id = JobId::new();
        self.tracker().create(job_id, self.settings.job_timeout)?;
        info!(job_id = %job_id, period = %period, size, "ingestion queued");

        let orchestrator = self.orchestrator.clone();
        let blobs = self.blobs.clone();
        tokio::spawn(async move {
            match source {
                SourceRef::Inline(bytes) => {
                    let _ = orchestrator
                        .run(job_id, period, move || {
                            let bytes = bytes.clone();
                            async move { Ok(bytes) }
                        })
                        .await;
                }
                SourceRef::Blob { key } => {
                    let loader = {
                        let blobs = blobs.clone();
                        let key = key.clone();
                        move || {
                            let blobs = blobs.clone();
                            let key = key.clone();
                            async move { blobs.get(&key).await.map_err(source_error) }
                        }
                    };
                    let _ = orchestrator.run(job_id, period, loader).await;

                    if let Err(e) = blobs.delete(&key).await {
                        warn!(job_id = %job_id, key = %key, error = %e, "could not delete source upload");
                    }
                }
            }
        });

        Ok(job_id)
    }

    /// Snapshot of a job; `None` if it never existed or has been evicted.
    ///
    /// The store read runs on the blocking pool so a networked job store
    /// never stalls the caller's runtime thread.
    pub async fn get_status(&self, job_id: JobId) -> Result<Option<IngestionJob>, IngestError> {
        let tracker = self.tracker().clone();
        tokio::task::spawn_blocking(move || tracker.get(job_id))
            .await
            .map_err(|e| IngestError::Storage(format!("status read aborted: {e}")))?
            .map_err(IngestError::from)
    }

    /// Payslips stored for an employee, newest first.
    pub async fn documents_for(
        &self,
        identifier: &Identifier,
        period: Option<Period>,
    ) -> Result<Vec<Document>, IngestError> {
        match self.accounts.find_by_identifier(identifier).await? {
            Some(account) => Ok(self.documents.list_for_account(account.id, period).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Periods an employee has payslips for, newest first.
    pub async fn periods_for(&self, identifier: &Identifier) -> Result<Vec<Period>, IngestError> {
        match self.accounts.find_by_identifier(identifier).await? {
            Some(account) => Ok(self.documents.periods_for_account(account.id).await?),
            None => Ok(Vec::new()),
        }
    }
}

fn source_error(err: BlobError) -> IngestError {
    match err {
        BlobError::NotFound(key) => IngestError::SourceNotFound(key),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use payroll_core::{Account, AccountId, Credential};
    use payroll_infra::jobs::store::JobMutation;
    use payroll_infra::jobs::{InMemoryJobStore, JobStatus, JobStoreError, RetryPolicy};
    use payroll_infra::repository::{InMemoryAccountRepository, InMemoryDocumentRepository};
    use payroll_infra::ObjectBlobStore;

    use crate::test_support::{make_pdf, payslip_text};

    struct Fixture {
        service: IngestionService,
        blobs: Arc<ObjectBlobStore>,
        accounts: Arc<InMemoryAccountRepository>,
        documents: Arc<InMemoryDocumentRepository>,
    }

    fn fixture() -> Fixture {
        let blobs = Arc::new(ObjectBlobStore::in_memory());
        let accounts = Arc::new(InMemoryAccountRepository::new());
        let documents = Arc::new(InMemoryDocumentRepository::new());
        let service = IngestionService::new(
            Collaborators {
                blobs: blobs.clone(),
                accounts: accounts.clone(),
                documents: documents.clone(),
                jobs: InMemoryJobStore::arc(),
            },
            ServiceSettings {
                max_source_bytes: 1024 * 1024,
                tracker: TrackerPolicy {
                    retry: RetryPolicy::immediate(),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        Fixture {
            service,
            blobs,
            accounts,
            documents,
        }
    }

    fn march() -> Period {
        Period::new(2024, 3).unwrap()
    }

    async fn wait_terminal(service: &IngestionService, job_id: JobId) -> IngestionJob {
        for _ in 0..500 {
            let job = service.get_status(job_id).await.unwrap().unwrap();
            assert!(job.progress <= 100);
            if job.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} did not finish");
    }

    #[tokio::test]
    async fn three_page_run_with_one_unreadable_page() {
        let f = fixture();
        let p1 = payslip_text("111.222.333-44");
        let p3 = payslip_text("555.666.777-88");
        let pdf = make_pdf(&[&p1, "Holerite sem identificacao", &p3]);

        let job_id = f
            .service
            .start_ingestion(SourceRef::Inline(Bytes::from(pdf)), march())
            .await
            .unwrap();
        let job = wait_terminal(&f.service, job_id).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        let result = job.result.unwrap();
        assert!(result.success);
        assert_eq!(result.processed_pages, 2);
        assert_eq!(result.failed_pages().count(), 1);
        assert_eq!(f.accounts.len(), 2);
    }

    #[tokio::test]
    async fn existing_account_keeps_its_credential() {
        let f = fixture();
        let identifier = Identifier::parse("98765432100").unwrap();
        let existing = Account {
            id: AccountId::new(),
            identifier: identifier.clone(),
            credential: Credential::new("s3cret"),
            created_at: chrono::Utc::now(),
        };
        f.accounts.insert(existing.clone()).unwrap();

        let p1 = payslip_text("987.654.321-00");
        let job_id = f
            .service
            .start_ingestion(SourceRef::Inline(Bytes::from(make_pdf(&[&p1]))), march())
            .await
            .unwrap();
        wait_terminal(&f.service, job_id).await;

        assert_eq!(f.accounts.len(), 1);
        let stored = f.accounts.find_by_identifier(&identifier).await.unwrap().unwrap();
        assert_eq!(stored.credential.expose(), "s3cret");

        let docs = f.service.documents_for(&identifier, None).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].account_id, existing.id);
        assert_eq!(f.service.periods_for(&identifier).await.unwrap(), vec![march()]);
    }

    #[tokio::test]
    async fn blob_source_is_checked_and_cleaned_up() {
        let f = fixture();
        let missing = f
            .service
            .start_ingestion(SourceRef::Blob { key: "uploads/none.pdf".into() }, march())
            .await
            .unwrap_err();
        assert!(matches!(missing, IngestError::SourceNotFound(_)));

        let p1 = payslip_text("123.456.789-09");
        f.blobs
            .put("uploads/run.pdf", Bytes::from(make_pdf(&[&p1])), "application/pdf")
            .await
            .unwrap();
        let job_id = f
            .service
            .start_ingestion(SourceRef::Blob { key: "uploads/run.pdf".into() }, march())
            .await
            .unwrap();
        let job = wait_terminal(&f.service, job_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(f.documents.len(), 1);

        // cleanup runs right after the job is finalized
        for _ in 0..100 {
            if f.blobs.head("uploads/run.pdf").await.is_err() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("source upload was not deleted");
    }

    #[tokio::test]
    async fn oversized_source_is_rejected_before_a_job_exists() {
        let f = fixture();
        let big = Bytes::from(vec![0u8; 2 * 1024 * 1024]);
        let err = f
            .service
            .start_ingestion(SourceRef::Inline(big), march())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::SourceTooLarge { .. }));
    }

    #[tokio::test]
    async fn unknown_job_has_no_status() {
        let f = fixture();
        assert!(f.service.get_status(JobId::new()).await.unwrap().is_none());
        let nobody = Identifier::parse("00000000000").unwrap();
        assert!(f.service.documents_for(&nobody, None).await.unwrap().is_empty());
    }

    /// Job store whose reads stall the calling thread, like a remote store
    /// behind a synchronous client.
    struct SlowReads {
        inner: InMemoryJobStore,
        delay: Duration,
    }

    impl JobStore for SlowReads {
        fn insert(&self, job: IngestionJob) -> Result<(), JobStoreError> {
            self.inner.insert(job)
        }

        fn get(&self, job_id: JobId) -> Result<Option<IngestionJob>, JobStoreError> {
            std::thread::sleep(self.delay);
            self.inner.get(job_id)
        }

        fn modify(&self, job_id: JobId, mutation: JobMutation<'_>) -> Result<IngestionJob, JobStoreError> {
            self.inner.modify(job_id, mutation)
        }

        fn remove(&self, job_id: JobId) -> Result<bool, JobStoreError> {
            self.inner.remove(job_id)
        }

        fn job_ids(&self) -> Result<Vec<JobId>, JobStoreError> {
            self.inner.job_ids()
        }
    }

    #[tokio::test]
    async fn status_reads_do_not_stall_the_runtime() {
        let service = IngestionService::new(
            Collaborators {
                blobs: Arc::new(ObjectBlobStore::in_memory()),
                accounts: Arc::new(InMemoryAccountRepository::new()),
                documents: Arc::new(InMemoryDocumentRepository::new()),
                jobs: Arc::new(SlowReads {
                    inner: InMemoryJobStore::new(),
                    delay: Duration::from_millis(300),
                }),
            },
            ServiceSettings::default(),
        );
        let job_id = JobId::new();
        service.tracker().create(job_id, None).unwrap();

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = ticks.clone();
            async move {
                for _ in 0..3 {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            }
        };
        let read = async {
            let job = service.get_status(job_id).await.unwrap();
            (job, ticks.load(Ordering::SeqCst))
        };

        // single-threaded runtime: the ticker only advances if the read yields
        let ((job, ticks_during_read), ()) = tokio::join!(read, ticker);
        assert!(job.is_some());
        assert!(ticks_during_read > 0);
    }
}
