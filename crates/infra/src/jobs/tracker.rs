//! Job Status Tracker: the only way ingestion jobs are created, mutated and read.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use payroll_core::{IngestionResult, JobId};

use super::store::{JobStore, JobStoreError};
use super::types::{IngestionJob, JobPatch, RetryPolicy};

/// Limits applied to every tracked job.
#[derive(Debug, Clone)]
pub struct TrackerPolicy {
    /// Deadline used when the caller does not pass one.
    pub default_timeout: Duration,
    /// Hard cap on any job's deadline.
    pub max_processing: Duration,
    /// How long terminal jobs stay queryable.
    pub retention: Duration,
    pub max_attempts: u32,
    pub retry: RetryPolicy,
}

impl Default for TrackerPolicy {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(10 * 60),
            max_processing: Duration::from_secs(30 * 60),
            retention: Duration::from_secs(60 * 60),
            max_attempts: 3,
            retry: RetryPolicy::default(),
        }
    }
}

/// What the orchestrator should do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Run again after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// `max_attempts` reached; the job must be finalized.
    Exhausted { attempts: u32 },
}

/// Counts from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SweepReport {
    pub timed_out: usize,
    pub evicted: usize,
}

/// Keyed, time-bounded job state store.
///
/// All writes go through [`JobStore::modify`], so progress and attempt
/// updates from concurrent callers are serialized per job.
#[derive(Clone)]
pub struct JobTracker {
    store: Arc<dyn JobStore>,
    policy: TrackerPolicy,
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

impl JobTracker {
    pub fn new(store: Arc<dyn JobStore>, policy: TrackerPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &TrackerPolicy {
        &self.policy
    }

    /// Register a new job in `queued` state.
    ///
    /// The deadline is `min(timeout, max_processing)` from now and never moves.
    pub fn create(&self, job_id: JobId, timeout: Option<Duration>) -> Result<IngestionJob, JobStoreError> {
        self.create_at(job_id, timeout, Utc::now())
    }

    pub fn create_at(
        &self,
        job_id: JobId,
        timeout: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<IngestionJob, JobStoreError> {
        let timeout = timeout
            .unwrap_or(self.policy.default_timeout)
            .min(self.policy.max_processing);
        let job = IngestionJob::new(job_id, now, to_chrono(timeout), self.policy.max_attempts);
        self.store.insert(job.clone())?;
        debug!(job_id = %job_id, timeout_at = %job.timeout_at, "job created");
        Ok(job)
    }

    /// Current snapshot of a job, or `None` if it never existed or was evicted.
    ///
    /// A live job past its deadline is moved to `timeout` before returning.
    pub fn get(&self, job_id: JobId) -> Result<Option<IngestionJob>, JobStoreError> {
        self.get_at(job_id, Utc::now())
    }

    pub fn get_at(&self, job_id: JobId, now: DateTime<Utc>) -> Result<Option<IngestionJob>, JobStoreError> {
        let Some(job) = self.store.get(job_id)? else {
            return Ok(None);
        };
        if job.is_terminal() || now <= job.timeout_at {
            return Ok(Some(job));
        }

        match self.store.modify(job_id, &mut |job| {
            if job.expire_if_due(now) {
                warn!(job_id = %job.job_id, "job timed out");
            }
            Ok(())
        }) {
            Ok(job) => Ok(Some(job)),
            Err(JobStoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn update(&self, job_id: JobId, patch: JobPatch) -> Result<IngestionJob, JobStoreError> {
        self.update_at(job_id, patch, Utc::now())
    }

    pub fn update_at(
        &self,
        job_id: JobId,
        patch: JobPatch,
        now: DateTime<Utc>,
    ) -> Result<IngestionJob, JobStoreError> {
        self.store
            .modify(job_id, &mut |job| Ok(job.apply(patch.clone(), now)?))
    }

    /// Raise progress; lower values are ignored.
    pub fn set_progress(&self, job_id: JobId, progress: u8) -> Result<IngestionJob, JobStoreError> {
        self.update(job_id, JobPatch::progress(progress))
    }

    /// Increment `attempts` and move the job to `processing`.
    pub fn begin_attempt(&self, job_id: JobId) -> Result<IngestionJob, JobStoreError> {
        let now = Utc::now();
        let job = self
            .store
            .modify(job_id, &mut |job| Ok(job.begin_attempt(now)?))?;
        info!(job_id = %job_id, attempt = job.attempts, max_attempts = job.max_attempts, "attempt started");
        Ok(job)
    }

    /// Record a recoverable failure of the current attempt.
    ///
    /// The backoff never runs past the job's deadline.
    pub fn record_failed_attempt(&self, job_id: JobId, error: &str) -> Result<RetryDecision, JobStoreError> {
        self.record_failed_attempt_at(job_id, error, Utc::now())
    }

    pub fn record_failed_attempt_at(
        &self,
        job_id: JobId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<RetryDecision, JobStoreError> {
        let job = self.store.modify(job_id, &mut |job| {
            Ok(job.apply(
                JobPatch {
                    error: Some(error.to_string()),
                    ..Default::default()
                },
                now,
            )?)
        })?;

        if job.should_retry() {
            let remaining = (job.timeout_at - now).to_std().unwrap_or(Duration::ZERO);
            let delay = self.policy.retry.delay_for_attempt(job.attempts).min(remaining);
            warn!(job_id = %job_id, attempt = job.attempts, delay_ms = delay.as_millis() as u64, error, "attempt failed, retrying");
            Ok(RetryDecision::Retry {
                attempt: job.attempts,
                delay,
            })
        } else {
            warn!(job_id = %job_id, attempts = job.attempts, error, "attempts exhausted");
            Ok(RetryDecision::Exhausted {
                attempts: job.attempts,
            })
        }
    }

    pub fn complete(&self, job_id: JobId, result: IngestionResult) -> Result<IngestionJob, JobStoreError> {
        let job = self.update(job_id, JobPatch::completed(result))?;
        info!(job_id = %job_id, attempts = job.attempts, "job completed");
        Ok(job)
    }

    pub fn fail(&self, job_id: JobId, error: impl Into<String>) -> Result<IngestionJob, JobStoreError> {
        let job = self.update(job_id, JobPatch::failed(error))?;
        warn!(job_id = %job_id, attempts = job.attempts, error = job.error.as_deref().unwrap_or(""), "job failed");
        Ok(job)
    }

    /// Time out overdue live jobs and evict terminal jobs past retention.
    pub fn sweep(&self) -> Result<SweepReport, JobStoreError> {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, JobStoreError> {
        let retention = to_chrono(self.policy.retention);
        let mut report = SweepReport::default();

        for job_id in self.store.job_ids()? {
            let Some(job) = self.store.get(job_id)? else {
                continue;
            };

            if !job.is_terminal() && now > job.timeout_at {
                let mut expired = false;
                let modified = self.store.modify(job_id, &mut |job| {
                    expired = job.expire_if_due(now);
                    Ok(())
                });
                match modified {
                    Ok(_) if expired => {
                        warn!(job_id = %job_id, "job timed out");
                        report.timed_out += 1;
                    }
                    Ok(_) | Err(JobStoreError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            } else if job.is_evictable(now, retention) && self.store.remove(job_id)? {
                debug!(job_id = %job_id, status = %job.status, "job evicted");
                report.evicted += 1;
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::JobStatus;

    fn tracker(max_attempts: u32) -> JobTracker {
        JobTracker::new(
            InMemoryJobStore::arc(),
            TrackerPolicy {
                max_attempts,
                retry: RetryPolicy::immediate(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn create_starts_queued_with_fixed_deadline() {
        let tracker = tracker(3);
        let now = Utc::now();
        let job = tracker
            .create_at(JobId::new(), Some(Duration::from_secs(60)), now)
            .unwrap();

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0);
        assert_eq!(job.timeout_at, now + chrono::Duration::seconds(60));
    }

    #[test]
    fn deadline_is_capped_by_max_processing() {
        let tracker = tracker(3);
        let now = Utc::now();
        let job = tracker
            .create_at(JobId::new(), Some(Duration::from_secs(24 * 3600)), now)
            .unwrap();
        assert_eq!(job.timeout_at, now + chrono::Duration::minutes(30));
    }

    #[test]
    fn unknown_job_is_none() {
        assert!(tracker(3).get(JobId::new()).unwrap().is_none());
    }

    #[test]
    fn overdue_job_reads_as_timeout() {
        let tracker = tracker(3);
        let id = JobId::new();
        let job = tracker.create(id, Some(Duration::from_secs(5))).unwrap();
        tracker.begin_attempt(id).unwrap();

        let after = job.timeout_at + chrono::Duration::seconds(1);
        let seen = tracker.get_at(id, after).unwrap().unwrap();
        assert_eq!(seen.status, JobStatus::Timeout);

        // Late completion from the still-running attempt is discarded.
        let err = tracker
            .update_at(id, JobPatch::completed(IngestionResult::from_outcomes(0, vec![])), after)
            .unwrap_err();
        assert!(err.is_terminal());
        assert_eq!(tracker.get(id).unwrap().unwrap().status, JobStatus::Timeout);
    }

    #[test]
    fn three_failed_attempts_exhaust_a_three_attempt_job() {
        let tracker = tracker(3);
        let id = JobId::new();
        tracker.create(id, None).unwrap();

        for expected in 1..=2 {
            tracker.begin_attempt(id).unwrap();
            let decision = tracker.record_failed_attempt(id, "blob store unavailable").unwrap();
            assert_eq!(
                decision,
                RetryDecision::Retry {
                    attempt: expected,
                    delay: Duration::ZERO
                }
            );
        }

        tracker.begin_attempt(id).unwrap();
        let decision = tracker.record_failed_attempt(id, "blob store unavailable").unwrap();
        assert_eq!(decision, RetryDecision::Exhausted { attempts: 3 });

        let job = tracker.fail(id, "blob store unavailable").unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.attempts, 3);
        assert!(tracker.begin_attempt(id).is_err());
    }

    #[test]
    fn backoff_is_clamped_to_the_deadline() {
        let tracker = JobTracker::new(
            InMemoryJobStore::arc(),
            TrackerPolicy {
                retry: RetryPolicy::fixed(Duration::from_secs(60)),
                ..Default::default()
            },
        );
        let id = JobId::new();
        let now = Utc::now();
        tracker.create_at(id, Some(Duration::from_secs(10)), now).unwrap();
        tracker.begin_attempt(id).unwrap();

        let decision = tracker
            .record_failed_attempt_at(id, "blob store unavailable", now + chrono::Duration::seconds(4))
            .unwrap();
        assert_eq!(
            decision,
            RetryDecision::Retry {
                attempt: 1,
                delay: Duration::from_secs(6)
            }
        );
    }

    #[test]
    fn progress_reaches_100_only_on_completion() {
        let tracker = tracker(3);
        let id = JobId::new();
        tracker.create(id, None).unwrap();
        tracker.begin_attempt(id).unwrap();

        assert_eq!(tracker.set_progress(id, 100).unwrap().progress, 99);
        let job = tracker
            .complete(id, IngestionResult::from_outcomes(0, vec![]))
            .unwrap();
        assert_eq!(job.progress, 100);
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn sweep_times_out_and_evicts() {
        let tracker = tracker(3);
        let now = Utc::now();

        let stuck = JobId::new();
        tracker.create_at(stuck, Some(Duration::from_secs(10)), now).unwrap();

        let done = JobId::new();
        tracker.create_at(done, None, now).unwrap();
        tracker
            .update_at(done, JobPatch::completed(IngestionResult::from_outcomes(0, vec![])), now)
            .unwrap();

        let report = tracker.sweep_at(now + chrono::Duration::seconds(11)).unwrap();
        assert_eq!(report, SweepReport { timed_out: 1, evicted: 0 });
        assert_eq!(tracker.get(stuck).unwrap().unwrap().status, JobStatus::Timeout);

        let report = tracker.sweep_at(now + chrono::Duration::hours(2)).unwrap();
        assert_eq!(report, SweepReport { timed_out: 0, evicted: 2 });
        assert!(tracker.get(done).unwrap().is_none());
        assert!(tracker.get(stuck).unwrap().is_none());
    }
}
