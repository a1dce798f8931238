//! libSQL backend — async `Database` trait implementation.
//!
//! Local file or in-memory databases. Every write runs inside an explicit
//! transaction: commit on success, rollback on any error, so a failed
//! persist leaves nothing half-written and the message is retried on the
//! next poll cycle.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Transaction, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::traits::{Database, EmailRecord, NewEmailRecord, RecordStatus};

const EMAIL_COLUMNS: &str = "id, message_id, object_key, sender, sender_name, recipient, \
     subject, body, received_at, processed_at, intent_flags, intent_label, handler_result, status";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS emails (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id TEXT UNIQUE NOT NULL,
    object_key TEXT NOT NULL,
    sender TEXT NOT NULL,
    sender_name TEXT,
    recipient TEXT,
    subject TEXT,
    body TEXT,
    received_at TEXT,
    processed_at TEXT NOT NULL,
    intent_flags TEXT NOT NULL,
    intent_label TEXT NOT NULL,
    handler_result TEXT,
    status TEXT NOT NULL DEFAULT 'processed'
);
CREATE INDEX IF NOT EXISTS idx_emails_message_id ON emails(message_id);
CREATE INDEX IF NOT EXISTS idx_emails_sender ON emails(sender);
CREATE INDEX IF NOT EXISTS idx_emails_intent_label ON emails(intent_label);
CREATE INDEX IF NOT EXISTS idx_emails_status ON emails(status);
CREATE INDEX IF NOT EXISTS idx_emails_processed_at ON emails(processed_at);
";

/// libSQL database backend.
///
/// A single connection is reused for all operations —
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async
/// use, and this daemon is strictly sequential anyway.
pub struct LibSqlBackend {
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run the schema.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to connect: {e}")))?;

        let backend = Self { conn };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to connect: {e}")))?;

        let backend = Self { conn };
        backend.init_schema().await?;
        Ok(backend)
    }

    async fn begin(&self) -> Result<Transaction, DatabaseError> {
        self.conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Transaction(format!("begin: {e}")))
    }

    async fn query_records(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<EmailRecord>, DatabaseError> {
        let mut rows = self
            .conn
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?
        {
            records.push(row_to_record(&row)?);
        }
        Ok(records)
    }

    async fn query_counts(&self, sql: &str) -> Result<Vec<(String, i64)>, DatabaseError> {
        let mut rows = self
            .conn
            .query(sql, ())
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        let mut counts = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?
        {
            let key: String = row.get(0).map_err(|e| DatabaseError::Query(e.to_string()))?;
            let count: i64 = row.get(1).map_err(|e| DatabaseError::Query(e.to_string()))?;
            counts.push((key, count));
        }
        Ok(counts)
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::MIN_UTC)
}

fn row_to_record(row: &libsql::Row) -> Result<EmailRecord, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("row decode: {e}"));

    let received_at_str: Option<String> = row.get(8).map_err(get_err)?;
    let processed_at_str: String = row.get(9).map_err(get_err)?;
    let flags_str: String = row.get(10).map_err(get_err)?;
    let handler_result_str: Option<String> = row.get(12).map_err(get_err)?;
    let status_str: String = row.get(13).map_err(get_err)?;

    let intent_flags: Vec<bool> = serde_json::from_str(&flags_str)
        .map_err(|e| DatabaseError::Query(format!("intent_flags decode: {e}")))?;
    let handler_result = handler_result_str
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok());

    Ok(EmailRecord {
        id: row.get(0).map_err(get_err)?,
        message_id: row.get(1).map_err(get_err)?,
        object_key: row.get(2).map_err(get_err)?,
        sender: row.get(3).map_err(get_err)?,
        sender_name: row.get(4).map_err(get_err)?,
        recipient: row.get(5).map_err(get_err)?,
        subject: row.get(6).map_err(get_err)?,
        body: row.get(7).map_err(get_err)?,
        received_at: received_at_str.as_deref().map(parse_datetime),
        processed_at: parse_datetime(&processed_at_str),
        intent_flags,
        intent_label: row.get(11).map_err(get_err)?,
        handler_result,
        status: RecordStatus::parse(&status_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute_batch(SCHEMA)
            .await
            .map_err(|e| DatabaseError::Query(format!("init_schema: {e}")))?;
        debug!("Database schema initialized");
        Ok(())
    }

    async fn upsert_email(&self, record: &NewEmailRecord) -> Result<i64, DatabaseError> {
        let flags_json = serde_json::to_string(&record.intent_flags)
            .map_err(|e| DatabaseError::Query(format!("intent_flags encode: {e}")))?;
        let handler_json = record
            .handler_result
            .as_ref()
            .map(|v| v.to_string());
        let now = Utc::now().to_rfc3339();

        let tx = self.begin().await?;
        let result = tx
            .query(
                "INSERT INTO emails (
                     message_id, object_key, sender, sender_name, recipient, subject,
                     body, received_at, processed_at, intent_flags, intent_label,
                     handler_result, status
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(message_id) DO UPDATE SET
                     object_key = excluded.object_key,
                     intent_flags = excluded.intent_flags,
                     intent_label = excluded.intent_label,
                     handler_result = excluded.handler_result,
                     status = excluded.status,
                     processed_at = excluded.processed_at
                 RETURNING id",
                params![
                    record.message_id.as_str(),
                    record.object_key.as_str(),
                    record.sender.as_str(),
                    opt_text(record.sender_name.as_deref()),
                    opt_text(record.recipient.as_deref()),
                    opt_text(record.subject.as_deref()),
                    opt_text(record.body.as_deref()),
                    opt_text(record.received_at.map(|t| t.to_rfc3339()).as_deref()),
                    now,
                    flags_json,
                    record.intent_label.as_str(),
                    opt_text(handler_json.as_deref()),
                    record.status.as_str(),
                ],
            )
            .await;

        let mut rows = match result {
            Ok(rows) => rows,
            Err(e) => {
                let _ = tx.rollback().await;
                return Err(DatabaseError::Query(format!("upsert_email: {e}")));
            }
        };

        let id = match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map_err(|e| DatabaseError::Query(format!("upsert_email id: {e}")))?,
            Ok(None) => {
                let _ = tx.rollback().await;
                return Err(DatabaseError::Query(
                    "upsert_email returned no id".to_string(),
                ));
            }
            Err(e) => {
                let _ = tx.rollback().await;
                return Err(DatabaseError::Query(format!("upsert_email: {e}")));
            }
        };
        drop(rows);

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Transaction(format!("commit: {e}")))?;

        debug!(id, message_id = %record.message_id, "Email record upserted");
        Ok(id)
    }

    async fn email_exists(&self, message_id: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM emails WHERE message_id = ?1 LIMIT 1",
                params![message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("email_exists: {e}")))?;
        let found = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("email_exists: {e}")))?
            .is_some();
        Ok(found)
    }

    async fn get_email_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<EmailRecord>, DatabaseError> {
        let records = self
            .query_records(
                &format!("SELECT {EMAIL_COLUMNS} FROM emails WHERE message_id = ?1"),
                params![message_id],
            )
            .await?;
        Ok(records.into_iter().next())
    }

    async fn get_email_by_id(&self, id: i64) -> Result<Option<EmailRecord>, DatabaseError> {
        let records = self
            .query_records(
                &format!("SELECT {EMAIL_COLUMNS} FROM emails WHERE id = ?1"),
                params![id],
            )
            .await?;
        Ok(records.into_iter().next())
    }

    async fn update_status(
        &self,
        id: i64,
        status: RecordStatus,
        handler_result: Option<&serde_json::Value>,
    ) -> Result<(), DatabaseError> {
        let handler_json = handler_result.map(|v| v.to_string());

        let tx = self.begin().await?;
        let result = tx
            .execute(
                "UPDATE emails SET status = ?1,
                     handler_result = COALESCE(?2, handler_result),
                     processed_at = ?3
                 WHERE id = ?4",
                params![
                    status.as_str(),
                    opt_text(handler_json.as_deref()),
                    Utc::now().to_rfc3339(),
                    id,
                ],
            )
            .await;

        match result {
            Ok(changed) if changed > 0 => {
                tx.commit()
                    .await
                    .map_err(|e| DatabaseError::Transaction(format!("commit: {e}")))?;
                Ok(())
            }
            Ok(_) => {
                let _ = tx.rollback().await;
                Err(DatabaseError::NotFound {
                    entity: "email".to_string(),
                    id: id.to_string(),
                })
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(DatabaseError::Query(format!("update_status: {e}")))
            }
        }
    }

    async fn list_by_intent(
        &self,
        intent_label: &str,
        limit: usize,
    ) -> Result<Vec<EmailRecord>, DatabaseError> {
        self.query_records(
            &format!(
                "SELECT {EMAIL_COLUMNS} FROM emails WHERE intent_label = ?1
                 ORDER BY processed_at DESC LIMIT ?2"
            ),
            params![intent_label, limit as i64],
        )
        .await
    }

    async fn list_by_status(
        &self,
        status: RecordStatus,
        limit: usize,
    ) -> Result<Vec<EmailRecord>, DatabaseError> {
        self.query_records(
            &format!(
                "SELECT {EMAIL_COLUMNS} FROM emails WHERE status = ?1
                 ORDER BY processed_at DESC LIMIT ?2"
            ),
            params![status.as_str(), limit as i64],
        )
        .await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<EmailRecord>, DatabaseError> {
        self.query_records(
            &format!("SELECT {EMAIL_COLUMNS} FROM emails ORDER BY processed_at DESC LIMIT ?1"),
            params![limit as i64],
        )
        .await
    }

    async fn counts_by_intent(&self) -> Result<Vec<(String, i64)>, DatabaseError> {
        self.query_counts("SELECT intent_label, COUNT(*) FROM emails GROUP BY intent_label")
            .await
    }

    async fn counts_by_status(&self) -> Result<Vec<(String, i64)>, DatabaseError> {
        self.query_counts("SELECT status, COUNT(*) FROM emails GROUP BY status")
            .await
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        self.conn
            .query("SELECT 1", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("ping: {e}")))?;
        Ok(())
    }
}
