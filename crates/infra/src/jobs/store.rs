//! Job status storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use payroll_core::JobId;

use super::types::{IngestionJob, TransitionError};

/// Mutation applied atomically by [`JobStore::modify`].
pub type JobMutation<'a> = &'a mut dyn FnMut(&mut IngestionJob) -> Result<(), JobStoreError>;

/// Keyed job status storage.
///
/// `modify` is the only way to change a stored job: implementations run the
/// mutation against the current record and persist the result atomically
/// (a write lock in memory, `WATCH`/`MULTI` on Redis), so concurrent progress
/// updates cannot overwrite each other. A mutation that returns `Err` leaves
/// the stored record untouched.
pub trait JobStore: Send + Sync {
    /// Store a new job.
    fn insert(&self, job: IngestionJob) -> Result<(), JobStoreError>;

    /// Get a job by ID.
    fn get(&self, job_id: JobId) -> Result<Option<IngestionJob>, JobStoreError>;

    /// Atomically read, mutate and write back a job.
    fn modify(&self, job_id: JobId, mutation: JobMutation<'_>) -> Result<IngestionJob, JobStoreError>;

    /// Delete a job. Returns whether it existed.
    fn remove(&self, job_id: JobId) -> Result<bool, JobStoreError>;

    /// IDs of every stored job (for sweeping).
    fn job_ids(&self) -> Result<Vec<JobId>, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("storage error: {0}")]
    Storage(String),
}

impl JobStoreError {
    /// The job already reached a terminal state (late write from a timed-out run).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStoreError::Transition(TransitionError::Terminal { .. }))
    }
}

/// In-memory job store for single-process deployments and tests.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, IngestionJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn poisoned() -> JobStoreError {
        JobStoreError::Storage("job store lock poisoned".to_string())
    }
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, job: IngestionJob) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        if jobs.contains_key(&job.job_id) {
            return Err(JobStoreError::AlreadyExists(job.job_id));
        }
        jobs.insert(job.job_id, job);
        Ok(())
    }

    fn get(&self, job_id: JobId) -> Result<Option<IngestionJob>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| Self::poisoned())?;
        Ok(jobs.get(&job_id).cloned())
    }

    fn modify(&self, job_id: JobId, mutation: JobMutation<'_>) -> Result<IngestionJob, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        let current = jobs.get(&job_id).ok_or(JobStoreError::NotFound(job_id))?;

        let mut next = current.clone();
        mutation(&mut next)?;
        jobs.insert(job_id, next.clone());
        Ok(next)
    }

    fn remove(&self, job_id: JobId) -> Result<bool, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        Ok(jobs.remove(&job_id).is_some())
    }

    fn job_ids(&self) -> Result<Vec<JobId>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| Self::poisoned())?;
        Ok(jobs.keys().copied().collect())
    }
}

impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    fn insert(&self, job: IngestionJob) -> Result<(), JobStoreError> {
        (**self).insert(job)
    }

    fn get(&self, job_id: JobId) -> Result<Option<IngestionJob>, JobStoreError> {
        (**self).get(job_id)
    }

    fn modify(&self, job_id: JobId, mutation: JobMutation<'_>) -> Result<IngestionJob, JobStoreError> {
        (**self).modify(job_id, mutation)
    }

    fn remove(&self, job_id: JobId) -> Result<bool, JobStoreError> {
        (**self).remove(job_id)
    }

    fn job_ids(&self) -> Result<Vec<JobId>, JobStoreError> {
        (**self).job_ids()
    }
}
