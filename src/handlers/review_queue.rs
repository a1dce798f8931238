//! Handler for the `unknown` intent — forward to the review queue.
//!
//! Mail whose intent could not be determined is not answered
//! automatically; it is forwarded to the review address for a person to
//! deal with. The record status ends up `pending_review`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{Handler, HandlerOutcome, forward_body};
use crate::error::HandlerError;
use crate::mailer::{Mailer, OutboundEmail};
use crate::message::Message;

/// Forwards unclassifiable mail to a human review address.
pub struct ReviewQueueHandler {
    mailer: Arc<dyn Mailer>,
    from_address: String,
    review_address: String,
}

impl ReviewQueueHandler {
    pub fn new(mailer: Arc<dyn Mailer>, from_address: String, review_address: String) -> Self {
        Self {
            mailer,
            from_address,
            review_address,
        }
    }
}

#[async_trait]
impl Handler for ReviewQueueHandler {
    fn name(&self) -> &'static str {
        "review_queue"
    }

    async fn handle(&self, message: &Message) -> Result<HandlerOutcome, HandlerError> {
        let forward = OutboundEmail {
            to: self.review_address.clone(),
            from: self.from_address.clone(),
            subject: format!("[review] Unclassified message from {}", message.sender),
            body: forward_body(
                message,
                "A message with undetermined intent needs review.",
            ),
            in_reply_to: None,
        };

        match self.mailer.send(&forward).await {
            Ok(()) => {
                info!(to = %self.review_address, message_id = %message.message_id, "Forwarded to review queue");
                Ok(HandlerOutcome::ok(serde_json::json!({
                    "action": "review_queue",
                    "status": "forwarded",
                    "forwarded_to": self.review_address,
                })))
            }
            Err(e) => Ok(HandlerOutcome::failed(serde_json::json!({
                "action": "review_queue",
                "status": "error",
                "error": e.to_string(),
            }))),
        }
    }
}
