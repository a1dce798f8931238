//! Configuration — resolved once from environment variables at startup.
//!
//! Every recognized option has a named field. Missing required variables
//! fail with `ConfigError::MissingEnvVar` before any polling begins;
//! nothing re-reads the environment after `Config::from_env` returns.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default poll interval in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Object-storage (spool) settings.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory holding the pending/processed/failed prefixes.
    pub spool_dir: PathBuf,
}

/// Database settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the local libSQL database file.
    pub path: PathBuf,
}

/// Intent-classifier settings (OpenAI-compatible endpoint).
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub api_key: SecretString,
    pub model: String,
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retries for transient transport errors before falling back to `unknown`.
    pub max_retries: u32,
}

/// Outbound SMTP settings used by the handlers.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// From address for automated replies.
    pub from_address: String,
    /// Where unknown-intent mail is forwarded for review.
    pub review_address: String,
    /// Where speak-to-human mail is escalated.
    pub escalation_address: String,
}

/// Daemon runtime settings.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub poll_interval: Duration,
    pub lock_file: PathBuf,
    pub log_file: Option<PathBuf>,
}

/// Main configuration container.
#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub classifier: ClassifierConfig,
    pub smtp: SmtpConfig,
    pub daemon: DaemonConfig,
}

impl Config {
    /// Load and validate configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let spool_dir = PathBuf::from(required("MAILROOM_SPOOL_DIR")?);

        let db_path = optional("MAILROOM_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/mailroom.db"));

        let api_key = SecretString::from(required("MAILROOM_LLM_API_KEY")?);
        let model =
            optional("MAILROOM_LLM_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string());
        let base_url = optional("MAILROOM_LLM_BASE_URL")
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let timeout_secs = parse_var("MAILROOM_LLM_TIMEOUT_SECS", 30u64)?;
        let max_retries = parse_var("MAILROOM_LLM_MAX_RETRIES", 2u32)?;

        let smtp_host = required("MAILROOM_SMTP_HOST")?;
        let smtp_port = parse_var("MAILROOM_SMTP_PORT", 587u16)?;
        let smtp_username = required("MAILROOM_SMTP_USERNAME")?;
        let smtp_password = SecretString::from(required("MAILROOM_SMTP_PASSWORD")?);
        let from_address = required("MAILROOM_FROM_ADDRESS")?;
        let review_address = required("MAILROOM_REVIEW_ADDRESS")?;
        let escalation_address =
            optional("MAILROOM_ESCALATION_ADDRESS").unwrap_or_else(|| review_address.clone());

        let poll_interval_secs =
            parse_var("MAILROOM_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?;
        if poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAILROOM_POLL_INTERVAL_SECS".to_string(),
                message: "poll interval must be at least 1 second".to_string(),
            });
        }
        let lock_file = optional("MAILROOM_LOCK_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/mailroom.pid"));
        let log_file = optional("MAILROOM_LOG_FILE").map(PathBuf::from);

        Ok(Self {
            storage: StorageConfig { spool_dir },
            database: DatabaseConfig { path: db_path },
            classifier: ClassifierConfig {
                api_key,
                model,
                base_url,
                timeout: Duration::from_secs(timeout_secs),
                max_retries,
            },
            smtp: SmtpConfig {
                host: smtp_host,
                port: smtp_port,
                username: smtp_username,
                password: smtp_password,
                from_address,
                review_address,
                escalation_address,
            },
            daemon: DaemonConfig {
                poll_interval: Duration::from_secs(poll_interval_secs),
                lock_file,
                log_file,
            },
        })
    }
}

fn required(key: &str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingEnvVar(key.to_string())),
    }
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match optional(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("cannot parse '{raw}'"),
        }),
    }
}
