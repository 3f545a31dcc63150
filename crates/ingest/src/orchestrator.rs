//! Ingestion Orchestrator: split, then extract → resolve → persist per page.
//!
//! Pages run concurrently within a chunk and chunks run one after another.
//! A page failure becomes a failed [`PageOutcome`] and never stops its
//! siblings. Failed attempts are retried in place, bounded by the job's
//! `max_attempts`: a retry re-runs only pages whose failure was a storage
//! error, or the whole attempt when the source could not be loaded.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;

use bytes::Bytes;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use payroll_core::{FailureKind, IngestionResult, JobId, PageOutcome, Period};
use payroll_infra::jobs::{JobStoreError, RetryDecision};
use payroll_infra::JobTracker;

use crate::error::IngestError;
use crate::extractor::IdentifierExtractor;
use crate::persister::DocumentPersister;
use crate::resolver::IdentityResolver;
use crate::splitter::{Page, PageSplitter};

/// Progress reported once the source is split.
pub const SPLIT_PROGRESS: u8 = 10;

pub const DEFAULT_CHUNK_SIZE: usize = 5;

/// A source document already in memory.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub bytes: Bytes,
    pub period: Period,
}

/// Per-page steps, cloned into each page task.
#[derive(Clone)]
struct PagePipeline {
    extractor: IdentifierExtractor,
    resolver: IdentityResolver,
    persister: DocumentPersister,
}

impl PagePipeline {
    async fn process(&self, page: Page, period: Period) -> PageOutcome {
        let identifier = match self.extractor.extract(&page).await {
            Ok(identifier) => identifier,
            Err(e) => {
                debug!(page = page.number, error = %e, "no usable identifier on page");
                return PageOutcome::failed(page.number, e.failure_kind(), e.to_string());
            }
        };
        let masked = identifier.masked();

        let persisted = async {
            let account = self.resolver.resolve(&identifier).await?;
            let document = self.persister.persist(&account, &page, period).await?;
            Ok::<_, IngestError>((account, document))
        }
        .await;

        match persisted {
            Ok((account, document)) => {
                PageOutcome::succeeded(page.number, masked, account.id, document.id)
            }
            Err(e) => {
                warn!(page = page.number, identifier = %masked, error = %e, "page failed");
                PageOutcome::failed(page.number, e.failure_kind(), e.to_string()).with_identifier(masked)
            }
        }
    }
}

#[derive(Clone)]
pub struct IngestionOrchestrator {
    splitter: PageSplitter,
    pipeline: PagePipeline,
    tracker: JobTracker,
    chunk_size: usize,
}

impl IngestionOrchestrator {
    pub fn new(
        extractor: IdentifierExtractor,
        resolver: IdentityResolver,
        persister: DocumentPersister,
        tracker: JobTracker,
    ) -> Self {
        Self {
            splitter: PageSplitter::new(),
            pipeline: PagePipeline {
                extractor,
                resolver,
                persister,
            },
            tracker,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    /// Ingest an in-memory source for an already created job.
    pub async fn ingest(&self, job_id: JobId, source: &SourceDocument) -> Result<IngestionResult, IngestError> {
        let bytes = source.bytes.clone();
        self.run(job_id, source.period, move || {
            let bytes = bytes.clone();
            async move { Ok(bytes) }
        })
        .await
    }

    /// Drive a created job to a terminal state.
    ///
    /// `load` fetches the source bytes; it is called again only if an earlier
    /// attempt failed before the source was split. Returns the result the job
    /// completed with, or the error it ended on. When the job times out
    /// mid-run the in-flight pages finish on their own and their results are
    /// discarded.
    #[instrument(skip_all, fields(job_id = %job_id, period = %period))]
    pub async fn run<L, Fut>(&self, job_id: JobId, period: Period, load: L) -> Result<IngestionResult, IngestError>
    where
        L: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<Bytes, IngestError>> + Send,
    {
        let mut pages: Option<Vec<Page>> = None;
        let mut outcomes: BTreeMap<u32, PageOutcome> = BTreeMap::new();

        loop {
            self.tracker.begin_attempt(job_id).map_err(|e| self.discarded(job_id, e))?;

            let failure = match self.attempt(job_id, period, &load, &mut pages, &mut outcomes).await {
                Ok(result) => {
                    let retryable = result.outcomes.iter().filter(|o| o.is_retryable()).count();
                    if retryable == 0 {
                        return self.finish(job_id, result);
                    }
                    format!("{retryable} page(s) failed with storage errors")
                }
                Err(e) if e.is_retryable() => e.to_string(),
                Err(e) => return Err(self.abort(job_id, e)),
            };

            match self
                .tracker
                .record_failed_attempt(job_id, &failure)
                .map_err(|e| self.discarded(job_id, e))?
            {
                RetryDecision::Retry { delay, .. } => tokio::time::sleep(delay).await,
                RetryDecision::Exhausted { attempts } => {
                    let partial = pages
                        .as_ref()
                        .map(|p| IngestionResult::from_outcomes(p.len() as u32, outcomes.values().cloned().collect()))
                        .filter(|r| r.success);
                    if let Some(result) = partial {
                        info!(attempts, processed = result.processed_pages, "completing with partial result");
                        return self.finish(job_id, result);
                    }
                    let message = format!("gave up after {attempts} attempts: {failure}");
                    return Err(self.abort(job_id, IngestError::Storage(message)));
                }
            }
        }
    }

    async fn attempt<L, Fut>(
        &self,
        job_id: JobId,
        period: Period,
        load: &L,
        pages_slot: &mut Option<Vec<Page>>,
        outcomes: &mut BTreeMap<u32, PageOutcome>,
    ) -> Result<IngestionResult, IngestError>
    where
        L: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<Bytes, IngestError>> + Send,
    {
        if pages_slot.is_none() {
            let source = load().await?;
            let split = self.splitter.split(source).await?;
            info!(pages = split.len(), "source split");
            self.tracker.set_progress(job_id, SPLIT_PROGRESS)?;
            *pages_slot = Some(split);
        }
        let pages = pages_slot.as_deref().unwrap_or_default();
        let total = pages.len() as u32;

        let pending: Vec<&Page> = pages
            .iter()
            .filter(|p| outcomes.get(&p.number).is_none_or(PageOutcome::is_retryable))
            .collect();
        let mut done = total - pending.len() as u32;

        for chunk in pending.chunks(self.chunk_size) {
            let mut tasks = JoinSet::new();
            for page in chunk {
                let pipeline = self.pipeline.clone();
                let page = (*page).clone();
                tasks.spawn(async move { pipeline.process(page, period).await });
            }

            let mut settled = HashSet::with_capacity(chunk.len());
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(outcome) => {
                        settled.insert(outcome.page_number);
                        outcomes.insert(outcome.page_number, outcome);
                    }
                    Err(e) => warn!(error = %e, "page task failed"),
                }
                done += 1;

                if let Err(e) = self.tracker.set_progress(job_id, progress(done, total)) {
                    // Let in-flight pages finish; nothing will record them.
                    tasks.detach_all();
                    return Err(e.into());
                }
            }

            for page in chunk.iter().filter(|p| !settled.contains(&p.number)) {
                outcomes.insert(
                    page.number,
                    PageOutcome::failed(page.number, FailureKind::MalformedPage, "page processing panicked"),
                );
            }
        }

        Ok(IngestionResult::from_outcomes(total, outcomes.values().cloned().collect()))
    }

    fn finish(&self, job_id: JobId, result: IngestionResult) -> Result<IngestionResult, IngestError> {
        self.tracker
            .complete(job_id, result.clone())
            .map_err(|e| self.discarded(job_id, e))?;
        info!(
            total = result.total_pages,
            processed = result.processed_pages,
            success = result.success,
            "ingestion finished"
        );
        Ok(result)
    }

    /// Move the job to `error`, unless it already ended (e.g. timed out).
    fn abort(&self, job_id: JobId, err: IngestError) -> IngestError {
        if let IngestError::Job(e) = &err {
            if e.is_terminal() {
                warn!(error = %e, "job ended while running, result discarded");
                return err;
            }
        }
        if let Err(e) = self.tracker.fail(job_id, err.to_string()) {
            warn!(error = %e, "could not record job failure");
        }
        err
    }

    fn discarded(&self, job_id: JobId, err: JobStoreError) -> IngestError {
        if err.is_terminal() {
            warn!(job_id = %job_id, error = %err, "job ended while running, result discarded");
        }
        IngestError::Job(err)
    }
}

fn progress(done: u32, total: u32) -> u8 {
    if total == 0 {
        return SPLIT_PROGRESS;
    }
    let span = 100 - u32::from(SPLIT_PROGRESS);
    (u32::from(SPLIT_PROGRESS) + done.min(total) * span / total) as u8
}
