//! Handler for the `send_info` intent — templated auto-reply.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{Handler, HandlerOutcome};
use crate::error::HandlerError;
use crate::mailer::{Mailer, OutboundEmail};
use crate::message::Message;

const INFO_REPLY_BODY: &str = "\
Hi,

Thanks for reaching out. Here is an overview of what we offer:

- Plans start at $19/month, billed monthly, cancel anytime.
- Every plan includes unlimited projects and email support.
- Full documentation and a feature comparison live at
  https://frflashy.test/docs

If anything is unclear, just reply to this email and a teammate will
pick it up.

— The FrFlashy team";

/// Replies to the sender with product and pricing information.
pub struct SendInfoHandler {
    mailer: Arc<dyn Mailer>,
    from_address: String,
}

impl SendInfoHandler {
    pub fn new(mailer: Arc<dyn Mailer>, from_address: String) -> Self {
        Self {
            mailer,
            from_address,
        }
    }
}

#[async_trait]
impl Handler for SendInfoHandler {
    fn name(&self) -> &'static str {
        "send_info"
    }

    async fn handle(&self, message: &Message) -> Result<HandlerOutcome, HandlerError> {
        let reply = OutboundEmail::reply_to(
            &message.sender,
            &self.from_address,
            &message.subject,
            &message.message_id,
            INFO_REPLY_BODY,
        );

        match self.mailer.send(&reply).await {
            Ok(()) => {
                info!(to = %message.sender, "Sent info auto-reply");
                Ok(HandlerOutcome::ok(serde_json::json!({
                    "action": "send_info",
                    "status": "sent",
                    "to": message.sender,
                    "subject": reply.subject,
                })))
            }
            Err(e) => Ok(HandlerOutcome::failed(serde_json::json!({
                "action": "send_info",
                "status": "error",
                "error": e.to_string(),
            }))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{RecordingMailer, sample_message};

    #[tokio::test]
    async fn replies_to_sender_with_threading() {
        let mailer = Arc::new(RecordingMailer::new());
        let handler = SendInfoHandler::new(mailer.clone(), "bot@frflashy.test".to_string());

        let outcome = handler.handle(&sample_message()).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.data["action"], "send_info");
        assert_eq!(outcome.data["status"], "sent");

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "alice@example.com");
        assert_eq!(sent[0].subject, "Re: Pricing?");
        assert_eq!(sent[0].in_reply_to.as_deref(), Some("<abc@example.com>"));
        assert!(sent[0].body.contains("$19/month"));
    }

    #[tokio::test]
    async fn send_failure_is_failed_outcome_not_error() {
        let mailer = Arc::new(RecordingMailer::failing());
        let handler = SendInfoHandler::new(mailer, "bot@frflashy.test".to_string());

        let outcome = handler.handle(&sample_message()).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.data["status"], "error");
    }
}
