//! payroll-worker: ingest one bulk payroll PDF from the command line.
//!
//! Uploads the file to the configured blob store, starts an ingestion job,
//! polls it until it reaches a terminal state and prints the final job
//! snapshot as JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use sqlx::PgPool;
use tracing::info;

use payroll_core::{JobId, Period};
use payroll_infra::blob::PDF_CONTENT_TYPE;
use payroll_infra::config::{load_dotenv, PayrollConfig};
use payroll_infra::jobs::{InMemoryJobStore, JobStore};
use payroll_infra::repository::{
    ensure_schema, InMemoryAccountRepository, InMemoryDocumentRepository, PostgresAccountRepository,
    PostgresDocumentRepository,
};
use payroll_infra::{AccountRepository, BlobStore, DocumentRepository, ObjectBlobStore};
use payroll_ingest::{Collaborators, IngestionService, ServiceSettings, SourceRef};

// ── CLI ─────────────────────────────────────────────────────────────

/// Split a payroll PDF into per-employee payslips.
#[derive(Parser, Debug)]
#[command(name = "payroll-worker", version, about)]
struct Cli {
    /// Multi-page payroll PDF.
    #[arg(long)]
    file: PathBuf,

    /// Payroll year (2000-2100).
    #[arg(long)]
    year: i32,

    /// Payroll month (1-12).
    #[arg(long)]
    month: u32,

    /// Status poll interval in milliseconds.
    #[arg(long, env = "PAYROLL_POLL_INTERVAL_MS", default_value_t = 500)]
    poll_interval_ms: u64,

    /// Human-readable logs instead of JSON.
    #[arg(long)]
    pretty: bool,
}

// ── Wiring ──────────────────────────────────────────────────────────

async fn collaborators(config: &PayrollConfig) -> anyhow::Result<Collaborators> {
    let blobs: Arc<dyn BlobStore> = Arc::new(ObjectBlobStore::from_config(&config.storage)?);

    let (accounts, documents): (Arc<dyn AccountRepository>, Arc<dyn DocumentRepository>) =
        match &config.database_url {
            Some(url) => {
                let pool = PgPool::connect(url).await.context("connecting to Postgres")?;
                ensure_schema(&pool).await?;
                (
                    Arc::new(PostgresAccountRepository::new(pool.clone())),
                    Arc::new(PostgresDocumentRepository::new(pool)),
                )
            }
            None => {
                info!("DATABASE_URL not set; using in-memory repositories");
                (
                    Arc::new(InMemoryAccountRepository::new()),
                    Arc::new(InMemoryDocumentRepository::new()),
                )
            }
        };

    Ok(Collaborators {
        blobs,
        accounts,
        documents,
        jobs: job_store(config)?,
    })
}

#[cfg(feature = "redis")]
fn job_store(config: &PayrollConfig) -> anyhow::Result<Arc<dyn JobStore>> {
    use payroll_infra::jobs::RedisJobStore;

    match &config.redis_url {
        Some(url) => Ok(Arc::new(RedisJobStore::new(url, "payroll:jobs", config.ingest.retention)?)),
        None => Ok(InMemoryJobStore::arc()),
    }
}

#[cfg(not(feature = "redis"))]
fn job_store(config: &PayrollConfig) -> anyhow::Result<Arc<dyn JobStore>> {
    if config.redis_url.is_some() {
        tracing::warn!("REDIS_URL set but built without the `redis` feature; using in-memory job store");
    }
    Ok(InMemoryJobStore::arc())
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    let cli = Cli::parse();
    if cli.pretty {
        payroll_observability::init_pretty();
    } else {
        payroll_observability::init();
    }

    let config = PayrollConfig::from_env();
    config.log_summary();

    let period = Period::new(cli.year, cli.month)?;
    let bytes = tokio::fs::read(&cli.file)
        .await
        .with_context(|| format!("reading {}", cli.file.display()))?;

    let collaborators = collaborators(&config).await?;
    let blobs = collaborators.blobs.clone();
    let service = IngestionService::new(collaborators, ServiceSettings::from(&config.ingest));
    let sweeper = service.start_sweeper(config.ingest.sweep_interval);

    let upload_key = format!("uploads/{}-{:02}-{}.pdf", period.year(), period.month(), JobId::new());
    blobs
        .put(&upload_key, Bytes::from(bytes), PDF_CONTENT_TYPE)
        .await
        .context("uploading source document")?;

    let job_id = service
        .start_ingestion(SourceRef::Blob { key: upload_key }, period)
        .await?;
    info!(job_id = %job_id, "ingestion started");

    let poll = Duration::from_millis(cli.poll_interval_ms.max(10));
    let job = loop {
        match service.get_status(job_id).await? {
            Some(job) if job.is_terminal() => break job,
            Some(job) => {
                info!(job_id = %job_id, status = %job.status, progress = job.progress, "waiting");
            }
            None => anyhow::bail!("job {job_id} disappeared before finishing"),
        }
        tokio::time::sleep(poll).await;
    };

    sweeper.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}
