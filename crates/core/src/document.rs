//! Stored payslip record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{AccountId, DocumentId};
use crate::period::Period;

/// Links an account, a payroll period and the blob holding its payslip page.
///
/// At most one document exists per `(account_id, period)`; re-ingesting the
/// same period replaces `blob_location` and keeps `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub account_id: AccountId,
    pub period: Period,
    pub blob_location: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
