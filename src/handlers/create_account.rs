//! Handler for the `create_account` intent — signup instructions reply.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{Handler, HandlerOutcome};
use crate::error::HandlerError;
use crate::mailer::{Mailer, OutboundEmail};
use crate::message::Message;

const SIGNUP_REPLY_BODY: &str = "\
Hi,

Great to hear you'd like an account. You can sign up directly here:

  https://frflashy.test/signup

The first 14 days are free and no payment details are needed to start.
If you run into trouble during signup, reply to this email and we'll
set the account up for you.

— The FrFlashy team";

/// Replies to the sender with signup instructions.
pub struct CreateAccountHandler {
    mailer: Arc<dyn Mailer>,
    from_address: String,
}

impl CreateAccountHandler {
    pub fn new(mailer: Arc<dyn Mailer>, from_address: String) -> Self {
        Self {
            mailer,
            from_address,
        }
    }
}

#[async_trait]
impl Handler for CreateAccountHandler {
    fn name(&self) -> &'static str {
        "create_account"
    }

    async fn handle(&self, message: &Message) -> Result<HandlerOutcome, HandlerError> {
        let reply = OutboundEmail::reply_to(
            &message.sender,
            &self.from_address,
            &message.subject,
            &message.message_id,
            SIGNUP_REPLY_BODY,
        );

        match self.mailer.send(&reply).await {
            Ok(()) => {
                info!(to = %message.sender, "Sent signup instructions");
                Ok(HandlerOutcome::ok(serde_json::json!({
                    "action": "create_account",
                    "status": "sent",
                    "to": message.sender,
                    "subject": reply.subject,
                })))
            }
            Err(e) => Ok(HandlerOutcome::failed(serde_json::json!({
                "action": "create_account",
                "status": "error",
                "error": e.to_string(),
            }))),
        }
    }
}
