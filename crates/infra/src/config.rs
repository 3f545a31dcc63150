//! Environment-driven configuration.
//!
//! Values come from process environment variables, optionally seeded from a
//! `.env` file via [`load_dotenv`]. Every setting has a default so a bare
//! checkout runs with local storage and in-memory repositories.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::jobs::{RetryPolicy, TrackerPolicy};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct PayrollConfig {
    pub ingest: IngestConfig,
    pub storage: StorageConfig,
    /// Postgres connection string; in-memory repositories when absent.
    #[serde(skip)]
    pub database_url: Option<String>,
    /// Redis connection string for the job store; in-memory when absent.
    #[serde(skip)]
    pub redis_url: Option<String>,
}

impl PayrollConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            ingest: IngestConfig::from_env(),
            storage: StorageConfig::from_env(),
            database_url: env_opt("DATABASE_URL"),
            redis_url: env_opt("REDIS_URL"),
        }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!(
            chunk_size = self.ingest.chunk_size,
            max_attempts = self.ingest.max_attempts,
            job_timeout_secs = self.ingest.job_timeout.as_secs(),
            "ingest config"
        );
        tracing::info!(
            backend = ?self.storage.backend,
            data_dir = %self.storage.data_dir.display(),
            bucket = self.storage.s3.bucket.as_deref().unwrap_or("(none)"),
            "storage config"
        );
        tracing::info!(
            postgres = self.database_url.is_some(),
            redis = self.redis_url.is_some(),
            "persistence config"
        );
    }
}

// ── Ingestion ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct IngestConfig {
    /// Pages processed concurrently per group.
    pub chunk_size: usize,
    pub max_attempts: u32,
    pub job_timeout: Duration,
    pub max_processing: Duration,
    pub retention: Duration,
    pub sweep_interval: Duration,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub max_source_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: 5,
            max_attempts: 3,
            job_timeout: Duration::from_secs(600),
            max_processing: Duration::from_secs(1800),
            retention: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
            retry_base_delay: Duration::from_millis(5000),
            retry_max_delay: Duration::from_secs(60),
            max_source_bytes: 100 * 1024 * 1024,
        }
    }
}

impl IngestConfig {
    fn from_env() -> Self {
        let d = Self::default();
        Self {
            chunk_size: env_parse("PAYROLL_CHUNK_SIZE", d.chunk_size).max(1),
            max_attempts: env_parse("PAYROLL_MAX_ATTEMPTS", d.max_attempts).max(1),
            job_timeout: Duration::from_secs(env_parse(
                "PAYROLL_JOB_TIMEOUT_SECS",
                d.job_timeout.as_secs(),
            )),
            max_processing: Duration::from_secs(env_parse(
                "PAYROLL_MAX_PROCESSING_SECS",
                d.max_processing.as_secs(),
            )),
            retention: Duration::from_secs(env_parse(
                "PAYROLL_RETENTION_SECS",
                d.retention.as_secs(),
            )),
            sweep_interval: Duration::from_secs(
                env_parse("PAYROLL_SWEEP_INTERVAL_SECS", d.sweep_interval.as_secs()).max(1),
            ),
            retry_base_delay: Duration::from_millis(env_parse(
                "PAYROLL_RETRY_BASE_DELAY_MS",
                d.retry_base_delay.as_millis() as u64,
            )),
            retry_max_delay: Duration::from_millis(env_parse(
                "PAYROLL_RETRY_MAX_DELAY_MS",
                d.retry_max_delay.as_millis() as u64,
            )),
            max_source_bytes: env_parse("PAYROLL_MAX_SOURCE_BYTES", d.max_source_bytes),
        }
    }

    pub fn tracker_policy(&self) -> TrackerPolicy {
        TrackerPolicy {
            default_timeout: self.job_timeout,
            max_processing: self.max_processing,
            retention: self.retention,
            max_attempts: self.max_attempts,
            retry: RetryPolicy::exponential(self.retry_base_delay, self.retry_max_delay),
        }
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    Local,
    Memory,
    S3,
}

impl std::str::FromStr for StorageBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" | "fs" => Ok(Self::Local),
            "memory" | "mem" => Ok(Self::Memory),
            "s3" => Ok(Self::S3),
            other => Err(format!("unknown storage backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageConfig {
    pub backend: StorageBackendKind,
    pub data_dir: PathBuf,
    pub s3: S3Config,
}

impl StorageConfig {
    fn from_env() -> Self {
        Self {
            backend: env_parse("PAYROLL_STORAGE_BACKEND", StorageBackendKind::Local),
            data_dir: PathBuf::from(env_or("PAYROLL_DATA_DIR", "data")),
            s3: S3Config::from_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct S3Config {
    pub region: String,
    pub bucket: Option<String>,
    pub prefix: Option<String>,
    pub endpoint_url: Option<String>,
    #[serde(skip)]
    pub access_key_id: Option<String>,
    #[serde(skip)]
    pub secret_access_key: Option<String>,
}

impl S3Config {
    fn from_env() -> Self {
        Self {
            region: env_or("AWS_REGION", "us-east-1"),
            bucket: env_opt("S3_BUCKET"),
            prefix: env_opt("S3_PREFIX"),
            endpoint_url: env_opt("AWS_ENDPOINT_URL"),
            access_key_id: env_opt("AWS_ACCESS_KEY_ID"),
            secret_access_key: env_opt("AWS_SECRET_ACCESS_KEY"),
        }
    }
}
