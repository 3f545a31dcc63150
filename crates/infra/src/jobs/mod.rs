//! Ingestion job status tracking with bounded retry, timeout and retention.
//!
//! ## Components
//!
//! - `IngestionJob`: status record and its state machine
//! - `JobStore`: keyed persistence (in-memory, or Redis with the `redis` feature)
//! - `JobTracker`: create/update/get/sweep API used by the orchestrator and pollers
//! - `JobSweeper`: background task that runs `JobTracker::sweep` periodically

#[cfg(feature = "redis")]
pub mod redis;
pub mod store;
pub mod sweeper;
pub mod tracker;
pub mod types;

#[cfg(feature = "redis")]
pub use self::redis::RedisJobStore;
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use sweeper::{JobSweeper, JobSweeperHandle};
pub use tracker::{JobTracker, RetryDecision, SweepReport, TrackerPolicy};
pub use types::{
    BackoffStrategy, IngestionJob, JobPatch, JobStatus, RetryPolicy, TransitionError,
};
