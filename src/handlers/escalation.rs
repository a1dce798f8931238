//! Handler for the `speak_to_human` intent — escalate to a person.
//!
//! Forwards the message to the escalation address, then acknowledges the
//! sender. The forward is the side effect that matters; a failed
//! acknowledgement is noted in the outcome but does not fail the handler.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{Handler, HandlerOutcome, forward_body};
use crate::error::HandlerError;
use crate::mailer::{Mailer, OutboundEmail};
use crate::message::Message;

const ACK_BODY: &str = "\
Hi,

Thanks for your message. A member of our team will get back to you
personally, usually within one business day.

— The FrFlashy team";

/// Escalates mail that asks for a human.
pub struct EscalationHandler {
    mailer: Arc<dyn Mailer>,
    from_address: String,
    escalation_address: String,
}

impl EscalationHandler {
    pub fn new(
        mailer: Arc<dyn Mailer>,
        from_address: String,
        escalation_address: String,
    ) -> Self {
        Self {
            mailer,
            from_address,
            escalation_address,
        }
    }
}

#[async_trait]
impl Handler for EscalationHandler {
    fn name(&self) -> &'static str {
        "escalation"
    }

    async fn handle(&self, message: &Message) -> Result<HandlerOutcome, HandlerError> {
        let forward = OutboundEmail {
            to: self.escalation_address.clone(),
            from: self.from_address.clone(),
            subject: format!("[escalation] {} asked for a human", message.sender),
            body: forward_body(message, "The sender asked to speak to a person."),
            in_reply_to: None,
        };

        if let Err(e) = self.mailer.send(&forward).await {
            return Ok(HandlerOutcome::failed(serde_json::json!({
                "action": "escalation",
                "status": "error",
                "error": e.to_string(),
            })));
        }
        info!(to = %self.escalation_address, message_id = %message.message_id, "Escalated to human");

        let ack = OutboundEmail::reply_to(
            &message.sender,
            &self.from_address,
            &message.subject,
            &message.message_id,
            ACK_BODY,
        );
        let acknowledged = match self.mailer.send(&ack).await {
            Ok(()) => true,
            Err(e) => {
                warn!(to = %message.sender, error = %e, "Escalation acknowledgement failed");
                false
            }
        };

        Ok(HandlerOutcome::ok(serde_json::json!({
            "action": "escalation",
            "status": "forwarded",
            "forwarded_to": self.escalation_address,
            "acknowledged_sender": acknowledged,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{RecordingMailer, sample_message};

    #[tokio::test]
    async fn forwards_and_acknowledges() {
        let mailer = Arc::new(RecordingMailer::new());
        let handler = EscalationHandler::new(
            mailer.clone(),
            "bot@frflashy.test".to_string(),
            "support@frflashy.test".to_string(),
        );

        let outcome = handler.handle(&sample_message()).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.data["acknowledged_sender"], true);

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].to, "support@frflashy.test");
        assert_eq!(sent[1].to, "alice@example.com");
        assert!(sent[1].body.contains("one business day"));
    }

    #[tokio::test]
    async fn forward_failure_fails_the_handler() {
        let mailer = Arc::new(RecordingMailer::failing());
        let handler = EscalationHandler::new(
            mailer,
            "bot@frflashy.test".to_string(),
            "support@frflashy.test".to_string(),
        );

        let outcome = handler.handle(&sample_message()).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.data["status"], "error");
    }
}
