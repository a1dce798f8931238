//! Per-message processing pipeline: fetch, parse, dedup, classify, route,
//! persist, settle.
//!
//! Each stage decides where the stored object ends up. Failures before
//! the record is persisted leave it under `pending/` for the next poll
//! cycle; handler failures settle it under `failed/`; everything else
//! settles under `processed/`. The persisted record is written before the object
//! moves, so a crash between the two re-observes an already-recorded
//! message and the dedup check collapses it.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::classify::IntentClassifier;
use crate::error::{Error, PipelineError};
use crate::handlers::{HandlerOutcome, Router};
use crate::intent::{ClassificationResult, Intent};
use crate::message::Message;
use crate::storage::{ObjectRef, ObjectStore, Prefix};
use crate::store::{Database, NewEmailRecord, RecordStatus};

const FETCH_RETRIES: u32 = 2;
const FETCH_RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(250);

/// How one object was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Handled and recorded; object moved to `processed/`.
    Processed(RecordStatus),
    /// Handler failed; recorded and object moved to `failed/`.
    Failed,
    /// Message id already recorded; object settled to `processed/`
    /// without reprocessing (left in place on a dry run).
    Duplicate,
    /// Dry run: classified and logged, nothing written or moved.
    DryRun(Intent),
}

/// The intake pipeline. One instance, shared across poll cycles.
pub struct Pipeline {
    storage: Arc<dyn ObjectStore>,
    db: Arc<dyn Database>,
    classifier: Arc<dyn IntentClassifier>,
    router: Router,
    dry_run: bool,
}

impl Pipeline {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        db: Arc<dyn Database>,
        classifier: Arc<dyn IntentClassifier>,
        router: Router,
        dry_run: bool,
    ) -> Self {
        Self {
            storage,
            db,
            classifier,
            router,
            dry_run,
        }
    }

    /// Process one pending object end to end.
    ///
    /// An `Err` means the object was left under `pending/` (fetch, parse
    /// or database failure) and will be retried next cycle.
    pub async fn process(&self, object: &ObjectRef) -> Result<Disposition, Error> {
        let raw = self.fetch_with_retry(object).await?;

        let Some(message) = Message::parse(&object.key(), &raw) else {
            return Err(PipelineError::Parse {
                key: object.key(),
                reason: "not a parseable MIME message".to_string(),
            }
            .into());
        };

        if self.db.email_exists(&message.message_id).await? {
            if self.dry_run {
                info!(
                    message_id = %message.message_id,
                    key = %object.key(),
                    "Dry run: duplicate message, settle to processed/ not performed"
                );
                return Ok(Disposition::Duplicate);
            }
            info!(
                message_id = %message.message_id,
                key = %object.key(),
                "Duplicate message, settling without reprocessing"
            );
            self.storage.move_to(object, Prefix::Processed).await?;
            return Ok(Disposition::Duplicate);
        }

        let classification = self
            .classifier
            .classify(&message.subject, &message.body())
            .await;
        info!(
            message_id = %message.message_id,
            sender = %message.sender,
            intent = %classification.intent,
            "Classified inbound message"
        );

        let handler = self.router.route(classification.intent)?;

        if self.dry_run {
            info!(
                message_id = %message.message_id,
                intent = %classification.intent,
                handler = handler.name(),
                "Dry run: handler not invoked, nothing persisted or moved"
            );
            return Ok(Disposition::DryRun(classification.intent));
        }

        let outcome = match handler.handle(&message).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    handler = handler.name(),
                    message_id = %message.message_id,
                    error = %e,
                    "Handler returned an error"
                );
                HandlerOutcome::failed(serde_json::json!({
                    "action": handler.name(),
                    "status": "error",
                    "error": e.to_string(),
                }))
            }
        };

        let status = derive_status(classification.intent, &outcome);
        let record = build_record(&message, &classification, &outcome, status);

        // The write is transactional; on failure nothing moves and the
        // next cycle retries the whole message.
        if let Err(e) = self.db.upsert_email(&record).await {
            error!(
                message_id = %message.message_id,
                error = %e,
                "Failed to persist record, leaving object pending"
            );
            return Err(e.into());
        }

        let target = if status == RecordStatus::Failed {
            Prefix::Failed
        } else {
            Prefix::Processed
        };
        self.storage.move_to(object, target).await?;

        if status == RecordStatus::Failed {
            warn!(
                message_id = %message.message_id,
                intent = %classification.intent,
                "Message settled as failed"
            );
            Ok(Disposition::Failed)
        } else {
            Ok(Disposition::Processed(status))
        }
    }

    /// Fetch with a couple of quick retries; a transient read error should
    /// not push the message a whole poll interval into the future.
    async fn fetch_with_retry(&self, object: &ObjectRef) -> Result<Vec<u8>, Error> {
        let mut attempt = 0u32;
        loop {
            match self.storage.fetch(object).await {
                Ok(raw) => return Ok(raw),
                Err(e) if attempt < FETCH_RETRIES => {
                    warn!(key = %object.key(), attempt = attempt + 1, error = %e, "Fetch failed, retrying");
                    tokio::time::sleep(FETCH_RETRY_DELAY).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Map intent and handler outcome onto the persisted status.
fn derive_status(intent: Intent, outcome: &HandlerOutcome) -> RecordStatus {
    if !outcome.success {
        return RecordStatus::Failed;
    }
    match intent {
        Intent::Unknown => RecordStatus::PendingReview,
        Intent::SpeakToHuman => RecordStatus::Escalated,
        _ => RecordStatus::Processed,
    }
}

fn build_record(
    message: &Message,
    classification: &ClassificationResult,
    outcome: &HandlerOutcome,
    status: RecordStatus,
) -> NewEmailRecord {
    NewEmailRecord {
        message_id: message.message_id.clone(),
        object_key: message.object_key.clone(),
        sender: message.sender.clone(),
        sender_name: message.sender_name.clone(),
        recipient: Some(message.recipient.clone()),
        subject: Some(message.subject.clone()),
        body: Some(message.body()),
        received_at: Some(message.received_at),
        intent_flags: classification.flags.to_vec(),
        intent_label: classification.intent.label().to_string(),
        handler_result: Some(outcome.data.clone()),
        status,
    }
}
