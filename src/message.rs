//! Raw inbound message model — parsed once from stored bytes, then read-only.

use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use uuid::Uuid;

/// A parsed inbound email. Created by the mail gateway, immutable here.
#[derive(Debug, Clone)]
pub struct Message {
    /// Unique message identifier from the Message-ID header (the dedup key).
    pub message_id: String,
    /// Object key the raw bytes were fetched from.
    pub object_key: String,
    /// Sender address.
    pub sender: String,
    /// Sender display name, when the From header carries one.
    pub sender_name: Option<String>,
    /// First To recipient.
    pub recipient: String,
    pub subject: String,
    pub body_text: String,
    pub body_html: String,
    /// Original received timestamp from the Date header.
    pub received_at: DateTime<Utc>,
}

impl Message {
    /// Parse raw message bytes fetched from object storage.
    ///
    /// mail-parser accepts nearly any byte blob, so MIME acceptance alone
    /// is not enough: bytes with no identifying headers (no Message-ID and
    /// no sender) are rejected as not-an-email and the object stays
    /// pending. A missing Message-ID with a real sender falls back to a
    /// generated id so deduplication still has a key (it just won't
    /// collapse retries of that object).
    pub fn parse(object_key: &str, raw: &[u8]) -> Option<Self> {
        let parsed = MessageParser::default().parse(raw)?;

        let (sender, sender_name) = first_address(parsed.from());
        if parsed.message_id().is_none() && sender.is_empty() {
            return None;
        }

        let message_id = parsed
            .message_id()
            .map(|id| id.to_string())
            .unwrap_or_else(|| format!("<generated-{}>", Uuid::new_v4()));

        let (recipient, _) = first_address(parsed.to());

        let subject = parsed.subject().unwrap_or_default().to_string();
        let body_text = parsed.body_text(0).unwrap_or_default().to_string();
        let body_html = parsed.body_html(0).unwrap_or_default().to_string();

        let received_at = parsed
            .date()
            .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
            .unwrap_or_else(Utc::now);

        Some(Self {
            message_id,
            object_key: object_key.to_string(),
            sender,
            sender_name,
            recipient,
            subject,
            body_text,
            body_html,
            received_at,
        })
    }

    /// Plain-text body. mail-parser synthesizes a text rendering for
    /// HTML-only mail, so the raw HTML is only a last resort.
    pub fn body(&self) -> String {
        if !self.body_text.trim().is_empty() {
            return self.body_text.clone();
        }
        self.body_html.clone()
    }
}

/// Extract (address, display name) from the first entry of a header.
fn first_address(addr: Option<&mail_parser::Address>) -> (String, Option<String>) {
    let Some(addr) = addr else {
        return (String::new(), None);
    };
    let first = match addr {
        mail_parser::Address::List(addrs) => addrs.first(),
        mail_parser::Address::Group(groups) => groups.iter().flat_map(|g| g.addresses.iter()).next(),
    };
    match first {
        Some(a) => (
            a.address.as_ref().map(|s| s.to_string()).unwrap_or_default(),
            a.name.as_ref().map(|s| s.to_string()),
        ),
        None => (String::new(), None),
    }
}
