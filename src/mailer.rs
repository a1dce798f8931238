//! Outbound mail seam — SMTP via lettre.
//!
//! Handlers never touch the transport directly; they build an
//! `OutboundEmail` and hand it to the `Mailer` trait so tests can swap in
//! a recording stub.

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::{debug, info};

use crate::config::SmtpConfig;
use crate::error::HandlerError;

/// One outbound email, ready to send.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub body: String,
    /// Message-ID of the email being replied to; sets threading headers.
    pub in_reply_to: Option<String>,
}

impl OutboundEmail {
    /// A reply to an inbound message, subject prefixed with `Re:`.
    pub fn reply_to(
        original_sender: &str,
        from: &str,
        original_subject: &str,
        original_message_id: &str,
        body: impl Into<String>,
    ) -> Self {
        let subject = if original_subject.to_lowercase().starts_with("re:") {
            original_subject.to_string()
        } else if original_subject.is_empty() {
            "Re: Your inquiry".to_string()
        } else {
            format!("Re: {original_subject}")
        };
        Self {
            to: original_sender.to_string(),
            from: from.to_string(),
            subject,
            body: body.into(),
            in_reply_to: Some(original_message_id.to_string()),
        }
    }
}

/// Message-ID in angle-bracket form, as the threading headers require.
fn angle_wrap(message_id: &str) -> String {
    if message_id.starts_with('<') && message_id.ends_with('>') {
        message_id.to_string()
    } else {
        format!("<{message_id}>")
    }
}

/// Outbound transport seam.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<(), HandlerError>;
}

/// lettre-backed SMTP mailer (STARTTLS).
pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    /// Probe the SMTP server: connect, EHLO, authenticate. No mail is sent.
    pub async fn verify(&self) -> Result<(), HandlerError> {
        let transport = self.build_transport()?;
        let host = self.config.host.clone();

        let ok = tokio::task::spawn_blocking(move || transport.test_connection())
            .await
            .map_err(|e| HandlerError::Send {
                to: String::new(),
                reason: format!("verify task panicked: {e}"),
            })?
            .map_err(|e| HandlerError::Send {
                to: String::new(),
                reason: format!("SMTP connection to {host} failed: {e}"),
            })?;

        if !ok {
            return Err(HandlerError::Send {
                to: String::new(),
                reason: "SMTP server rejected the connection probe".to_string(),
            });
        }
        Ok(())
    }

    fn build_transport(&self) -> Result<SmtpTransport, HandlerError> {
        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.expose_secret().to_string(),
        );
        SmtpTransport::starttls_relay(&self.config.host)
            .map_err(|e| HandlerError::Send {
                to: String::new(),
                reason: format!("SMTP relay setup failed: {e}"),
            })
            .map(|builder| builder.port(self.config.port).credentials(creds).build())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<(), HandlerError> {
        let send_err = |reason: String| HandlerError::Send {
            to: email.to.clone(),
            reason,
        };

        let mut builder = lettre::Message::builder()
            .from(email.from.parse().map_err(|e| send_err(format!("invalid from address: {e}")))?)
            .to(email.to.parse().map_err(|e| send_err(format!("invalid to address: {e}")))?)
            .subject(&email.subject);

        if let Some(ref message_id) = email.in_reply_to {
            // mail-parser strips the angle brackets on the way in;
            // RFC 5322 threading headers need them back.
            let threaded = angle_wrap(message_id);
            builder = builder
                .in_reply_to(threaded.clone())
                .references(threaded);
        }

        let message = builder
            .body(email.body.clone())
            .map_err(|e| send_err(format!("failed to build message: {e}")))?;

        let transport = self.build_transport()?;
        let to = email.to.clone();

        // lettre's sync transport blocks on the socket.
        let response = tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| send_err(format!("send task panicked: {e}")))?
            .map_err(|e| send_err(e.to_string()))?;

        debug!(code = %response.code(), "SMTP response");
        info!(to = %to, subject = %email.subject, "Sent email");
        Ok(())
    }
}
