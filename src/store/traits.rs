//! `Database` trait — async persistence interface for email records.
//!
//! The pipeline writes through `upsert_email` (keyed on the unique message
//! id, so retries update instead of duplicating) and reads through
//! `email_exists` for deduplication. The list/count projections serve
//! operational tooling only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;

/// Processing status of a persisted email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    /// Classified and handled successfully.
    Processed,
    /// Handler failed; object moved to the failed prefix.
    Failed,
    /// Intent could not be determined; queued for human review.
    PendingReview,
    /// Sender asked for a person; forwarded to the escalation address.
    Escalated,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Processed => "processed",
            RecordStatus::Failed => "failed",
            RecordStatus::PendingReview => "pending_review",
            RecordStatus::Escalated => "escalated",
        }
    }

    pub fn parse(s: &str) -> RecordStatus {
        match s {
            "failed" => RecordStatus::Failed,
            "pending_review" => RecordStatus::PendingReview,
            "escalated" => RecordStatus::Escalated,
            _ => RecordStatus::Processed,
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted email record, read back from the database.
#[derive(Debug, Clone)]
pub struct EmailRecord {
    pub id: i64,
    pub message_id: String,
    pub object_key: String,
    pub sender: String,
    pub sender_name: Option<String>,
    pub recipient: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub processed_at: DateTime<Utc>,
    pub intent_flags: Vec<bool>,
    pub intent_label: String,
    pub handler_result: Option<serde_json::Value>,
    pub status: RecordStatus,
}

/// Fields for an upsert. Everything the pipeline knows about one message.
#[derive(Debug, Clone)]
pub struct NewEmailRecord {
    pub message_id: String,
    pub object_key: String,
    pub sender: String,
    pub sender_name: Option<String>,
    pub recipient: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub intent_flags: Vec<bool>,
    pub intent_label: String,
    pub handler_result: Option<serde_json::Value>,
    pub status: RecordStatus,
}

/// Backend-agnostic persistence trait.
#[async_trait]
pub trait Database: Send + Sync {
    /// Create tables and indexes if they don't exist.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    /// Insert or update the record for a message id. Returns the record id.
    ///
    /// A second call with the same message id updates the existing row —
    /// at most one logical record per message, however many times the
    /// poller observes the same stored object.
    async fn upsert_email(&self, record: &NewEmailRecord) -> Result<i64, DatabaseError>;

    /// Dedup check: has this message id already been recorded?
    async fn email_exists(&self, message_id: &str) -> Result<bool, DatabaseError>;

    /// Look up a record by message id.
    async fn get_email_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<EmailRecord>, DatabaseError>;

    /// Look up a record by database id.
    async fn get_email_by_id(&self, id: i64) -> Result<Option<EmailRecord>, DatabaseError>;

    /// Update the status (and optionally the handler result) of a record.
    async fn update_status(
        &self,
        id: i64,
        status: RecordStatus,
        handler_result: Option<&serde_json::Value>,
    ) -> Result<(), DatabaseError>;

    // ── Read-only projections for operational tooling ───────────────

    async fn list_by_intent(
        &self,
        intent_label: &str,
        limit: usize,
    ) -> Result<Vec<EmailRecord>, DatabaseError>;

    async fn list_by_status(
        &self,
        status: RecordStatus,
        limit: usize,
    ) -> Result<Vec<EmailRecord>, DatabaseError>;

    async fn list_recent(&self, limit: usize) -> Result<Vec<EmailRecord>, DatabaseError>;

    /// Record counts grouped by intent label.
    async fn counts_by_intent(&self) -> Result<Vec<(String, i64)>, DatabaseError>;

    /// Record counts grouped by status.
    async fn counts_by_status(&self) -> Result<Vec<(String, i64)>, DatabaseError>;

    /// Connectivity probe for the `test-connection` command.
    async fn ping(&self) -> Result<(), DatabaseError>;
}
