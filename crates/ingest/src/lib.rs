//! `payroll-ingest`: bulk payslip ingestion.
//!
//! A multi-page payroll PDF is split into single pages; each page's owner is
//! identified by the national ID printed on it, the matching account is
//! resolved (or created), and the page is stored and linked to the account
//! for the payroll period. Progress, timeout and retries are tracked per job
//! so callers can poll.
//!
//! ## Components
//!
//! - [`splitter`]: PDF → ordered single-page PDFs
//! - [`extractor`]: page text → [`payroll_core::Identifier`]
//! - [`resolver`]: identifier → account (create-on-first-sighting)
//! - [`persister`]: page bytes → blob + document upsert
//! - [`orchestrator`]: runs the above per job, chunked, with bounded retry
//! - [`service`]: `start_ingestion` / `get_status` for callers

pub mod error;
pub mod extractor;
pub mod orchestrator;
pub mod persister;
pub mod resolver;
pub mod service;
pub mod splitter;

#[cfg(test)]
mod test_support;

pub use error::IngestError;
pub use orchestrator::{IngestionOrchestrator, SourceDocument};
pub use service::{Collaborators, IngestionService, ServiceSettings, SourceRef};
pub use splitter::{Page, PageSplitter};
