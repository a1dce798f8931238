//! Classification gateway — one call to the external intent classifier.
//!
//! The gateway is infallible from the pipeline's viewpoint: transient
//! transport errors are retried a bounded number of times with jittered
//! backoff, and any remaining failure (timeout, malformed response,
//! contract violation) coerces the result to the `unknown` intent.
//! Classification failure never aborts processing of a message.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::ClassifierConfig;
use crate::error::ClassifyError;
use crate::intent::ClassificationResult;

/// Max tokens for the classification call — the response is a 5-element
/// JSON array, anything longer is already malformed.
const CLASSIFY_MAX_TOKENS: u32 = 50;

/// Base delay for transport retries.
const RETRY_BASE_DELAY_MS: u64 = 500;

const PROMPT_TEMPLATE: &str = "\
You are an intent classification engine.

You will be given an inbound email. Determine the sender's primary intent.

You MUST return a single JSON array of exactly 5 booleans.
Each slot corresponds to a fixed intent (order is fixed):
0 = send_info       (wants information, pricing, or documentation)
1 = create_account  (wants to sign up, register, or start a trial)
2 = unknown         (intent cannot be confidently determined)
3 = speak_to_human  (requests contact with a person)
4 = reserved        (always false)

Rules:
- Exactly ONE slot must be true.
- If the intent is unclear or ambiguous, set slot 2 (unknown) to true.
- Slot 4 must always be false.
- Output valid JSON only, no explanation or extra text.

Email:
<<<
{EMAIL_TEXT}
>>>

Return the JSON array now.";

/// The classifier seam. The pipeline only ever talks to this trait.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Classify one email. Always returns a valid result — failures are
    /// coerced to `unknown` inside the implementation.
    async fn classify(&self, subject: &str, body: &str) -> ClassificationResult;
}

/// LLM-backed classifier speaking the OpenAI-compatible chat API.
pub struct LlmClassifier {
    config: ClassifierConfig,
    client: reqwest::Client,
}

impl LlmClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    /// One raw completion call. Transport problems only — contract
    /// validation happens in the caller.
    async fn complete(&self, prompt: &str) -> Result<String, ClassifyError> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0,
            "max_tokens": CLASSIFY_MAX_TOKENS,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| ClassifyError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClassifyError::Transport(format!(
                "classifier endpoint returned {status}"
            )));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ClassifyError::Transport(format!("invalid response body: {e}")))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| ClassifyError::MalformedResponse("empty choices".to_string()))
    }

    /// Completion with bounded retry on transport errors.
    async fn complete_with_retry(&self, prompt: &str) -> Result<String, ClassifyError> {
        let mut attempt = 0u32;
        loop {
            match self.complete(prompt).await {
                Ok(raw) => return Ok(raw),
                Err(ClassifyError::Transport(reason)) if attempt < self.config.max_retries => {
                    let delay = retry_delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "Classifier transport error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl IntentClassifier for LlmClassifier {
    async fn classify(&self, subject: &str, body: &str) -> ClassificationResult {
        let prompt = build_prompt(subject, body);

        let raw = match self.complete_with_retry(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Classification failed, coercing to unknown");
                return ClassificationResult::unknown(&e.to_string());
            }
        };

        debug!(raw = %raw, "Classifier response");

        match ClassificationResult::from_raw(&raw) {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, raw = %raw, "Invalid classifier output, coercing to unknown");
                ClassificationResult::unknown(&raw)
            }
        }
    }
}

/// Exponential backoff with jitter.
fn retry_delay(attempt: u32) -> Duration {
    let base = RETRY_BASE_DELAY_MS * (1 << attempt.min(4));
    let jitter = rand::thread_rng().gen_range(0..RETRY_BASE_DELAY_MS / 2);
    Duration::from_millis(base + jitter)
}

/// Build the classification prompt from subject and body.
fn build_prompt(subject: &str, body: &str) -> String {
    let mut email_text = String::with_capacity(subject.len() + body.len() + 16);
    if !subject.is_empty() {
        email_text.push_str("Subject: ");
        email_text.push_str(subject);
        email_text.push_str("\n\n");
    }
    // Truncate long bodies — the intent is carried in the opening lines.
    let body_preview: String = body.chars().take(4000).collect();
    email_text.push_str(&body_preview);

    PROMPT_TEMPLATE.replace("{EMAIL_TEXT}", &email_text)
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: String,
}
