//! Intent handlers and the router that dispatches to them.
//!
//! One handler per routable intent, resolved through an enum-keyed table
//! built at startup — no stringly-typed lookup. A missing entry at build
//! time is a construction error; a missing entry at route time is a
//! programming error, not a retryable runtime condition.

pub mod create_account;
pub mod escalation;
pub mod review_queue;
pub mod send_info;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::SmtpConfig;
use crate::error::{HandlerError, PipelineError};
use crate::intent::Intent;
use crate::mailer::Mailer;
use crate::message::Message;

pub use create_account::CreateAccountHandler;
pub use escalation::EscalationHandler;
pub use review_queue::ReviewQueueHandler;
pub use send_info::SendInfoHandler;

/// Result of one handler invocation. Opaque to the pipeline beyond the
/// success flag; the data blob lands in the persisted record as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerOutcome {
    pub success: bool,
    pub data: serde_json::Value,
}

impl HandlerOutcome {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data,
        }
    }

    pub fn failed(data: serde_json::Value) -> Self {
        Self {
            success: false,
            data,
        }
    }
}

/// A unit of intent-specific business logic.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handler name, used in logs and the persisted outcome.
    fn name(&self) -> &'static str;

    /// Perform the intent's side effects for one message.
    ///
    /// Expected failures (e.g. a bounced send) come back as an outcome
    /// with `success == false`; `Err` is for unexpected conditions. The
    /// pipeline treats both as handler failure.
    async fn handle(&self, message: &Message) -> Result<HandlerOutcome, HandlerError>;
}

/// Static intent → handler table.
pub struct Router {
    table: HashMap<Intent, Arc<dyn Handler>>,
}

impl Router {
    /// Build a router, verifying every routable intent has a handler.
    pub fn new(entries: Vec<(Intent, Arc<dyn Handler>)>) -> Result<Self, PipelineError> {
        let table: HashMap<Intent, Arc<dyn Handler>> = entries.into_iter().collect();
        for intent in Intent::ROUTABLE {
            if !table.contains_key(&intent) {
                return Err(PipelineError::NoHandler(intent.label().to_string()));
            }
        }
        Ok(Self { table })
    }

    /// The standard table: one concrete handler per routable intent.
    pub fn with_defaults(mailer: Arc<dyn Mailer>, smtp: &SmtpConfig) -> Self {
        let entries: Vec<(Intent, Arc<dyn Handler>)> = vec![
            (
                Intent::SendInfo,
                Arc::new(SendInfoHandler::new(
                    Arc::clone(&mailer),
                    smtp.from_address.clone(),
                )),
            ),
            (
                Intent::CreateAccount,
                Arc::new(CreateAccountHandler::new(
                    Arc::clone(&mailer),
                    smtp.from_address.clone(),
                )),
            ),
            (
                Intent::Unknown,
                Arc::new(ReviewQueueHandler::new(
                    Arc::clone(&mailer),
                    smtp.from_address.clone(),
                    smtp.review_address.clone(),
                )),
            ),
            (
                Intent::SpeakToHuman,
                Arc::new(EscalationHandler::new(
                    mailer,
                    smtp.from_address.clone(),
                    smtp.escalation_address.clone(),
                )),
            ),
        ];
        Self::new(entries).expect("default table covers all routable intents")
    }

    /// Resolve the handler for an intent.
    ///
    /// The classification gateway guarantees the reserved intent never
    /// reaches this point, so a miss here is a bug in the table.
    pub fn route(&self, intent: Intent) -> Result<&Arc<dyn Handler>, PipelineError> {
        self.table
            .get(&intent)
            .ok_or_else(|| PipelineError::NoHandler(intent.label().to_string()))
    }
}

/// Format a forwarded copy of an inbound message (review and escalation).
pub(crate) fn forward_body(message: &Message, note: &str) -> String {
    format!(
        "{note}\n\n\
         From: {}\n\
         Subject: {}\n\
         Received: {}\n\n\
         --- Original Message ---\n\n\
         {}",
        message.sender,
        message.subject,
        message.received_at.to_rfc3339(),
        message.body(),
    )
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use super::*;
    use crate::mailer::OutboundEmail;
    use chrono::Utc;

    /// Records every send; optionally fails them all.
    pub struct RecordingMailer {
        pub sent: Mutex<Vec<OutboundEmail>>,
        pub fail: bool,
    }

    impl RecordingMailer {
        pub fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        pub fn failing() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: &OutboundEmail) -> Result<(), HandlerError> {
            if self.fail {
                return Err(HandlerError::Send {
                    to: email.to.clone(),
                    reason: "recording mailer set to fail".to_string(),
                });
            }
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    pub fn sample_message() -> Message {
        Message {
            message_id: "<abc@example.com>".to_string(),
            object_key: "pending/abc.eml".to_string(),
            sender: "alice@example.com".to_string(),
            sender_name: Some("Alice Example".to_string()),
            recipient: "sales@frflashy.test".to_string(),
            subject: "Pricing?".to_string(),
            body_text: "What's the monthly cost?".to_string(),
            body_html: String::new(),
            received_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{RecordingMailer, sample_message};
    use super::*;

    fn smtp_config() -> SmtpConfig {
        SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: "bot@frflashy.test".to_string(),
            password: secrecy::SecretString::from("secret"),
            from_address: "bot@frflashy.test".to_string(),
            review_address: "ops@frflashy.test".to_string(),
            escalation_address: "support@frflashy.test".to_string(),
        }
    }

    #[test]
    fn default_table_covers_all_routable_intents() {
        let mailer: Arc<dyn Mailer> = Arc::new(RecordingMailer::new());
        let router = Router::with_defaults(mailer, &smtp_config());
        for intent in Intent::ROUTABLE {
            assert!(router.route(intent).is_ok(), "no handler for {intent}");
        }
    }

    #[test]
    fn reserved_intent_has_no_handler() {
        let mailer: Arc<dyn Mailer> = Arc::new(RecordingMailer::new());
        let router = Router::with_defaults(mailer, &smtp_config());
        let err = router.route(Intent::Reserved).err().unwrap();
        assert!(matches!(err, PipelineError::NoHandler(ref l) if l == "reserved"));
    }

    #[test]
    fn incomplete_table_rejected_at_construction() {
        let mailer: Arc<dyn Mailer> = Arc::new(RecordingMailer::new());
        let smtp = smtp_config();
        let only_one: Vec<(Intent, Arc<dyn Handler>)> = vec![(
            Intent::SendInfo,
            Arc::new(SendInfoHandler::new(mailer, smtp.from_address.clone())),
        )];
        let err = Router::new(only_one).err().unwrap();
        assert!(matches!(err, PipelineError::NoHandler(_)));
    }

    #[test]
    fn forward_body_includes_original() {
        let body = forward_body(&sample_message(), "An unknown message was received.");
        assert!(body.contains("An unknown message was received."));
        assert!(body.contains("From: alice@example.com"));
        assert!(body.contains("Subject: Pricing?"));
        assert!(body.contains("What's the monthly cost?"));
    }
}
