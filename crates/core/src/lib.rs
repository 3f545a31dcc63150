//! `payroll-core`: domain foundation for payslip distribution.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, periods, the account/document records and the per-page outcome
//! model shared by the pipeline and the job tracker.

pub mod account;
pub mod document;
pub mod error;
pub mod id;
pub mod identifier;
pub mod ingestion;
pub mod period;

pub use account::{Account, Credential};
pub use document::Document;
pub use error::{DomainError, DomainResult};
pub use id::{AccountId, DocumentId, JobId};
pub use identifier::Identifier;
pub use ingestion::{FailureKind, IngestionResult, PageFailure, PageOutcome};
pub use period::Period;
