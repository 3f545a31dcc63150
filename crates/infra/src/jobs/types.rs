//! Ingestion job record, its state machine and the retry policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use payroll_core::{IngestionResult, JobId};

/// Highest progress a job may report before it completes.
pub const MAX_PROGRESS_BEFORE_COMPLETION: u8 = 99;

/// Job execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, no attempt started yet
    Queued,
    /// An attempt is running (or waiting out a retry backoff)
    Processing,
    /// Finished; `result` is attached
    Completed,
    /// Unrecoverable failure or exhausted attempts
    Error,
    /// Deadline passed before completion
    Timeout,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Error | JobStatus::Timeout
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
            JobStatus::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Rejected state change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("job {job_id} is already {status}")]
    Terminal { job_id: JobId, status: JobStatus },
    #[error("job {job_id} cannot move from {from} to {to}")]
    Invalid {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("job {job_id} has used all {max_attempts} attempts")]
    AttemptsExhausted { job_id: JobId, max_attempts: u32 },
}

/// Backoff strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between attempts
    Fixed,
    /// base * 2^(attempt-1)
    #[default]
    Exponential,
}

/// Delay schedule between job attempts.
///
/// The attempt bound itself lives on each job (`max_attempts`), so a job
/// keeps the bound it was created with even if configuration changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Retry immediately (tests, local runs).
    pub fn immediate() -> Self {
        Self::fixed(Duration::ZERO)
    }

    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Delay before the attempt following `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 1);
                self.base_delay
                    .checked_mul(factor)
                    .unwrap_or(self.max_delay)
                    .min(self.max_delay)
            }
        }
    }
}

/// Partial update applied through the tracker.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub progress: Option<u8>,
    pub status: Option<JobStatus>,
    pub result: Option<IngestionResult>,
    pub error: Option<String>,
}

impl JobPatch {
    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn completed(result: IngestionResult) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Error),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Status record of one ingestion job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionJob {
    pub job_id: JobId,
    pub status: JobStatus,
    /// 0..=100, never decreasing; 100 only once completed.
    pub progress: u8,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Fixed at creation.
    pub timeout_at: DateTime<Utc>,
    pub result: Option<IngestionResult>,
    pub error: Option<String>,
}

impl IngestionJob {
    pub fn new(
        job_id: JobId,
        now: DateTime<Utc>,
        timeout: chrono::Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            job_id,
            status: JobStatus::Queued,
            progress: 0,
            started_at: now,
            last_updated: now,
            completed_at: None,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            timeout_at: now + timeout,
            result: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether another attempt may start.
    pub fn should_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Move a live job past its deadline to `timeout`. Returns true if it changed.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_terminal() || now <= self.timeout_at {
            return false;
        }
        self.status = JobStatus::Timeout;
        self.error = Some("job exceeded its processing deadline".to_string());
        self.completed_at = Some(now);
        self.last_updated = now;
        true
    }

    /// Terminal and past the retention window.
    pub fn is_evictable(&self, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
        match (self.is_terminal(), self.completed_at) {
            (true, Some(done)) => now > done + retention,
            (true, None) => now > self.last_updated + retention,
            _ => false,
        }
    }

    /// Start the next attempt.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.expire_if_due(now);
        self.ensure_live()?;
        if !self.should_retry() {
            return Err(TransitionError::AttemptsExhausted {
                job_id: self.job_id,
                max_attempts: self.max_attempts,
            });
        }
        self.attempts += 1;
        self.status = JobStatus::Processing;
        self.last_updated = now;
        Ok(())
    }

    /// Apply a patch, enforcing the state machine.
    pub fn apply(&mut self, patch: JobPatch, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.expire_if_due(now);
        self.ensure_live()?;

        if let Some(progress) = patch.progress {
            let capped = progress.min(MAX_PROGRESS_BEFORE_COMPLETION);
            self.progress = self.progress.max(capped);
        }
        if let Some(error) = patch.error {
            self.error = Some(error);
        }

        match patch.status {
            None => {}
            Some(JobStatus::Queued) => {
                return Err(TransitionError::Invalid {
                    job_id: self.job_id,
                    from: self.status,
                    to: JobStatus::Queued,
                });
            }
            Some(JobStatus::Processing) => self.status = JobStatus::Processing,
            Some(JobStatus::Completed) => {
                self.status = JobStatus::Completed;
                self.progress = 100;
                self.result = patch.result;
                self.error = None;
                self.completed_at = Some(now);
            }
            Some(status @ (JobStatus::Error | JobStatus::Timeout)) => {
                self.status = status;
                self.completed_at = Some(now);
            }
        }

        self.last_updated = now;
        Ok(())
    }

    fn ensure_live(&self) -> Result<(), TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::Terminal {
                job_id: self.job_id,
                status: self.status,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(now: DateTime<Utc>) -> IngestionJob {
        IngestionJob::new(JobId::new(), now, chrono::Duration::minutes(10), 3)
    }

    fn empty_result() -> IngestionResult {
        IngestionResult::from_outcomes(0, vec![])
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let policy = RetryPolicy::exponential(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(350));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = RetryPolicy::fixed(Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn progress_never_decreases_and_stops_below_100() {
        let now = Utc::now();
        let mut job = job(now);
        job.begin_attempt(now).unwrap();

        job.apply(JobPatch::progress(40), now).unwrap();
        job.apply(JobPatch::progress(20), now).unwrap();
        assert_eq!(job.progress, 40);

        job.apply(JobPatch::progress(100), now).unwrap();
        assert_eq!(job.progress, MAX_PROGRESS_BEFORE_COMPLETION);
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[test]
    fn completion_forces_full_progress_and_is_terminal() {
        let now = Utc::now();
        let mut job = job(now);
        job.begin_attempt(now).unwrap();
        job.apply(JobPatch::completed(empty_result()), now).unwrap();

        assert_eq!(job.progress, 100);
        assert!(job.result.is_some());
        assert_eq!(job.completed_at, Some(now));

        let err = job.apply(JobPatch::progress(10), now).unwrap_err();
        assert!(matches!(err, TransitionError::Terminal { status: JobStatus::Completed, .. }));
    }

    #[test]
    fn cannot_return_to_queued() {
        let now = Utc::now();
        let mut job = job(now);
        job.begin_attempt(now).unwrap();
        let patch = JobPatch {
            status: Some(JobStatus::Queued),
            ..Default::default()
        };
        assert!(matches!(job.apply(patch, now), Err(TransitionError::Invalid { .. })));
    }

    #[test]
    fn attempts_are_bounded() {
        let now = Utc::now();
        let mut job = job(now);
        for _ in 0..3 {
            job.begin_attempt(now).unwrap();
        }
        assert_eq!(job.attempts, 3);
        assert!(!job.should_retry());
        assert!(matches!(
            job.begin_attempt(now),
            Err(TransitionError::AttemptsExhausted { max_attempts: 3, .. })
        ));
        assert_eq!(job.attempts, 3);
    }

    #[test]
    fn deadline_turns_live_job_into_timeout() {
        let now = Utc::now();
        let mut job = job(now);
        job.begin_attempt(now).unwrap();

        let later = job.timeout_at + chrono::Duration::seconds(1);
        let err = job.apply(JobPatch::completed(empty_result()), later).unwrap_err();

        assert!(matches!(err, TransitionError::Terminal { status: JobStatus::Timeout, .. }));
        assert_eq!(job.status, JobStatus::Timeout);
        assert!(job.result.is_none());
    }

    #[test]
    fn timeout_at_is_not_moved_by_activity() {
        let now = Utc::now();
        let mut job = job(now);
        let deadline = job.timeout_at;
        job.begin_attempt(now + chrono::Duration::minutes(5)).unwrap();
        job.apply(JobPatch::progress(50), now + chrono::Duration::minutes(9)).unwrap();
        assert_eq!(job.timeout_at, deadline);
    }

    #[test]
    fn eviction_waits_for_retention_after_terminal_state() {
        let now = Utc::now();
        let retention = chrono::Duration::minutes(30);
        let mut job = job(now);
        assert!(!job.is_evictable(now + chrono::Duration::days(1), retention));

        job.apply(JobPatch::failed("boom"), now).unwrap();
        assert!(!job.is_evictable(now + chrono::Duration::minutes(29), retention));
        assert!(job.is_evictable(now + chrono::Duration::minutes(31), retention));
    }
}
