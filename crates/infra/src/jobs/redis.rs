//! Redis-backed job store (optional).
//!
//! Each job is one JSON string key with an expiry, so Redis itself evicts
//! jobs once the retention window has passed. Updates use optimistic
//! `WATCH`/`MULTI` transactions and are retried by `redis::transaction` when
//! another writer touched the key in between.

use chrono::Utc;
use redis::Commands;

use payroll_core::JobId;

use super::store::{JobMutation, JobStore, JobStoreError};
use super::types::IngestionJob;

/// Redis job store for multi-process deployments.
#[derive(Debug, Clone)]
pub struct RedisJobStore {
    client: redis::Client,
    prefix: String,
    retention: chrono::Duration,
}

impl RedisJobStore {
    pub fn new(
        redis_url: impl AsRef<str>,
        prefix: impl Into<String>,
        retention: std::time::Duration,
    ) -> Result<Self, JobStoreError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(redis_error)?;
        let retention = chrono::Duration::from_std(retention)
            .map_err(|e| JobStoreError::Storage(format!("retention out of range: {e}")))?;
        Ok(Self {
            client,
            prefix: prefix.into(),
            retention,
        })
    }

    fn key(&self, job_id: JobId) -> String {
        format!("{}:{}", self.prefix, job_id)
    }

    fn connection(&self) -> Result<redis::Connection, JobStoreError> {
        self.client.get_connection().map_err(redis_error)
    }

    /// Seconds the key should live: until the deadline plus retention for
    /// live jobs, retention past completion for terminal ones.
    fn ttl_secs(&self, job: &IngestionJob) -> u64 {
        let now = Utc::now();
        let expires_at = match job.completed_at {
            Some(done) => done + self.retention,
            None => job.timeout_at + self.retention,
        };
        (expires_at - now).num_seconds().max(1) as u64
    }

    fn encode(job: &IngestionJob) -> Result<String, JobStoreError> {
        serde_json::to_string(job).map_err(|e| JobStoreError::Storage(format!("serialize job: {e}")))
    }

    fn decode(raw: &str) -> Result<IngestionJob, JobStoreError> {
        serde_json::from_str(raw).map_err(|e| JobStoreError::Storage(format!("deserialize job: {e}")))
    }
}

fn redis_error(err: redis::RedisError) -> JobStoreError {
    JobStoreError::Storage(format!("redis: {err}"))
}

impl JobStore for RedisJobStore {
    fn insert(&self, job: IngestionJob) -> Result<(), JobStoreError> {
        let mut conn = self.connection()?;
        let payload = Self::encode(&job)?;

        // SET NX EX: only create, never overwrite.
        let created: Option<String> = redis::cmd("SET")
            .arg(self.key(job.job_id))
            .arg(payload)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_secs(&job))
            .query(&mut conn)
            .map_err(redis_error)?;

        match created {
            Some(_) => Ok(()),
            None => Err(JobStoreError::AlreadyExists(job.job_id)),
        }
    }

    fn get(&self, job_id: JobId) -> Result<Option<IngestionJob>, JobStoreError> {
        let mut conn = self.connection()?;
        let raw: Option<String> = conn.get(self.key(job_id)).map_err(redis_error)?;
        raw.as_deref().map(Self::decode).transpose()
    }

    fn modify(&self, job_id: JobId, mutation: JobMutation<'_>) -> Result<IngestionJob, JobStoreError> {
        let mut conn = self.connection()?;
        let key = self.key(job_id);

        let outcome: Result<IngestionJob, JobStoreError> =
            redis::transaction(&mut conn, &[&key], |conn, pipe| {
                let raw: Option<String> = conn.get(&key)?;
                let Some(raw) = raw else {
                    return Ok(Some(Err(JobStoreError::NotFound(job_id))));
                };

                let mut job = match Self::decode(&raw) {
                    Ok(job) => job,
                    Err(e) => return Ok(Some(Err(e))),
                };
                if let Err(e) = mutation(&mut job) {
                    return Ok(Some(Err(e)));
                }
                let payload = match Self::encode(&job) {
                    Ok(p) => p,
                    Err(e) => return Ok(Some(Err(e))),
                };

                // None means the watched key changed; redis::transaction retries.
                let applied: Option<(String,)> = pipe
                    .cmd("SET")
                    .arg(&key)
                    .arg(payload)
                    .arg("EX")
                    .arg(self.ttl_secs(&job))
                    .ignore()
                    .get(&key)
                    .query(conn)?;
                Ok(applied.map(|_| Ok(job)))
            })
            .map_err(redis_error)?;

        outcome
    }

    fn remove(&self, job_id: JobId) -> Result<bool, JobStoreError> {
        let mut conn = self.connection()?;
        let removed: u64 = conn.del(self.key(job_id)).map_err(redis_error)?;
        Ok(removed > 0)
    }

    fn job_ids(&self) -> Result<Vec<JobId>, JobStoreError> {
        let mut conn = self.connection()?;
        let pattern = format!("{}:*", self.prefix);
        let keys: Vec<String> = conn
            .scan_match::<_, String>(pattern)
            .map_err(redis_error)?
            .collect();

        let prefix_len = self.prefix.len() + 1;
        Ok(keys
            .iter()
            .filter_map(|k| k.get(prefix_len..))
            .filter_map(|id| id.parse().ok())
            .collect())
    }
}
