//! Operational commands behind the CLI: run, status, stop, restart, logs,
//! credential validation and connectivity probes.
//!
//! Everything here prints to stdout for the operator; structured logs
//! still go through tracing. Exit codes are stable so wrapper scripts can
//! branch on them.

use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use tracing::{info, warn};

use crate::classify::LlmClassifier;
use crate::config::Config;
use crate::daemon::Daemon;
use crate::error::{ClassifyError, Error, LockError};
use crate::handlers::Router;
use crate::lock::{PidLock, process_alive, read_pid};
use crate::mailer::SmtpMailer;
use crate::pipeline::Pipeline;
use crate::storage::{FsObjectStore, ObjectStore};
use crate::store::{Database, LibSqlBackend};

pub const EXIT_OK: i32 = 0;
pub const EXIT_RUNTIME: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;
pub const EXIT_LOCK: i32 = 3;
pub const EXIT_CONNECTIVITY: i32 = 4;

/// How long `stop` waits for the daemon to exit after SIGTERM.
const STOP_TIMEOUT: Duration = Duration::from_secs(30);
const STOP_POLL: Duration = Duration::from_millis(200);

/// Map an error onto the process exit code contract.
pub fn exit_code_for(error: &Error) -> i32 {
    match error {
        Error::Config(_) => EXIT_CONFIG,
        Error::Lock(LockError::Held { .. }) => EXIT_LOCK,
        Error::Classify(ClassifyError::Transport(_)) => EXIT_CONNECTIVITY,
        Error::Database(crate::error::DatabaseError::Connection(_)) => EXIT_CONNECTIVITY,
        Error::Handler(_) => EXIT_CONNECTIVITY,
        _ => EXIT_RUNTIME,
    }
}

/// Start the daemon in the foreground. Holds the PID lock for the whole
/// run; the lock is released when this returns.
pub async fn run(config: &Config, once: bool, dry_run: bool) -> Result<(), Error> {
    let _lock = PidLock::acquire(&config.daemon.lock_file)?;
    if dry_run {
        warn!("Dry run: messages will be classified but not handled, persisted or moved");
    }

    let storage = Arc::new(FsObjectStore::open(&config.storage.spool_dir)?);
    let db = Arc::new(LibSqlBackend::new_local(&config.database.path).await?);
    let classifier = Arc::new(LlmClassifier::new(config.classifier.clone()));
    let mailer = Arc::new(SmtpMailer::new(config.smtp.clone()));
    let router = Router::with_defaults(mailer, &config.smtp);

    let pipeline = Pipeline::new(storage.clone(), db, classifier, router, dry_run);
    let daemon = Daemon::new(pipeline, storage, config.daemon.poll_interval);
    daemon.run(once).await
}

/// Report daemon liveness, spool depth and record counts.
pub async fn status(config: &Config) -> Result<(), Error> {
    match read_pid(&config.daemon.lock_file) {
        Some(pid) if process_alive(pid) => println!("daemon: running (pid {pid})"),
        Some(pid) => println!("daemon: not running (stale lock, pid {pid})"),
        None => println!("daemon: not running"),
    }

    let storage = FsObjectStore::open(&config.storage.spool_dir)?;
    println!("spool:");
    for (prefix, count) in storage.counts().await? {
        println!("  {prefix}: {count}");
    }

    let db = LibSqlBackend::new_local(&config.database.path).await?;
    println!("records by status:");
    for (status, count) in db.counts_by_status().await? {
        println!("  {status}: {count}");
    }
    println!("records by intent:");
    for (intent, count) in db.counts_by_intent().await? {
        println!("  {intent}: {count}");
    }
    Ok(())
}

/// SIGTERM the running daemon and wait for it to exit.
pub async fn stop(config: &Config) -> Result<(), Error> {
    let path = &config.daemon.lock_file;
    let pid = match read_pid(path) {
        Some(pid) if process_alive(pid) => pid,
        _ => {
            return Err(LockError::NotRunning(path.display().to_string()).into());
        }
    };

    info!(pid, "Sending SIGTERM");
    let ret = unsafe { libc::kill(pid, libc::SIGTERM) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    let deadline = tokio::time::Instant::now() + STOP_TIMEOUT;
    while process_alive(pid) {
        if tokio::time::Instant::now() >= deadline {
            return Err(std::io::Error::other(format!(
                "daemon (pid {pid}) did not exit within {}s",
                STOP_TIMEOUT.as_secs()
            ))
            .into());
        }
        tokio::time::sleep(STOP_POLL).await;
    }

    println!("daemon stopped (pid {pid})");
    Ok(())
}

/// Stop a running daemon (if any) and start a fresh one in the foreground.
pub async fn restart(config: &Config, dry_run: bool) -> Result<(), Error> {
    match stop(config).await {
        Ok(()) => {}
        Err(Error::Lock(LockError::NotRunning(_))) => {
            info!("No running daemon to stop");
        }
        Err(e) => return Err(e),
    }
    run(config, false, dry_run).await
}

/// Print recent records, optionally filtered by intent or status.
pub async fn list(
    config: &Config,
    intent: Option<&str>,
    status: Option<&str>,
    limit: usize,
) -> Result<(), Error> {
    let db = LibSqlBackend::new_local(&config.database.path).await?;

    let records = match (intent, status) {
        (Some(label), _) => {
            let intent = crate::intent::Intent::from_label(label).ok_or_else(|| {
                crate::error::ConfigError::InvalidValue {
                    key: "--intent".to_string(),
                    message: format!("unknown intent '{label}'"),
                }
            })?;
            db.list_by_intent(intent.label(), limit).await?
        }
        (None, Some(s)) => {
            let status = crate::store::RecordStatus::parse(s);
            if status.as_str() != s {
                return Err(crate::error::ConfigError::InvalidValue {
                    key: "--status".to_string(),
                    message: format!("unknown status '{s}'"),
                }
                .into());
            }
            db.list_by_status(status, limit).await?
        }
        (None, None) => db.list_recent(limit).await?,
    };

    for r in records {
        println!(
            "{}  {}  {}  {}  {}  {}",
            r.id,
            r.processed_at.to_rfc3339(),
            r.intent_label,
            r.status,
            r.sender,
            r.subject.as_deref().unwrap_or("(no subject)"),
        );
    }
    Ok(())
}

/// Print the last `lines` lines of the log file.
pub async fn logs(config: &Config, lines: usize) -> Result<(), Error> {
    let Some(ref path) = config.daemon.log_file else {
        return Err(crate::error::ConfigError::MissingEnvVar(
            "MAILROOM_LOG_FILE".to_string(),
        )
        .into());
    };

    let contents = tokio::fs::read_to_string(path).await?;
    for line in tail_lines(&contents, lines) {
        println!("{line}");
    }
    Ok(())
}

/// Check that the classifier and SMTP credentials actually work.
pub async fn validate_credentials(config: &Config) -> Result<(), Error> {
    let client = reqwest::Client::builder()
        .timeout(config.classifier.timeout)
        .build()
        .unwrap_or_default();
    let url = format!(
        "{}/models",
        config.classifier.base_url.trim_end_matches('/')
    );
    let response = client
        .get(&url)
        .bearer_auth(config.classifier.api_key.expose_secret())
        .send()
        .await
        .map_err(|e| ClassifyError::Transport(e.to_string()))?;
    if !response.status().is_success() {
        return Err(ClassifyError::Transport(format!(
            "classifier credentials rejected: {}",
            response.status()
        ))
        .into());
    }
    println!("classifier credentials: ok");

    SmtpMailer::new(config.smtp.clone()).verify().await?;
    println!("smtp credentials: ok");
    Ok(())
}

/// Probe the spool directory and the database.
pub async fn test_connection(config: &Config) -> Result<(), Error> {
    let storage = FsObjectStore::open(&config.storage.spool_dir)?;
    let counts = storage.counts().await?;
    let pending = counts
        .iter()
        .find(|(p, _)| *p == crate::storage::Prefix::Pending)
        .map(|(_, n)| *n)
        .unwrap_or(0);
    println!(
        "spool: ok ({} pending at {})",
        pending,
        config.storage.spool_dir.display()
    );

    let db = LibSqlBackend::new_local(&config.database.path).await?;
    db.ping().await?;
    println!("database: ok ({})", config.database.path.display());

    // Reachability only; credential checks live in validate-credentials.
    let client = reqwest::Client::builder()
        .timeout(config.classifier.timeout)
        .build()
        .unwrap_or_default();
    let url = format!(
        "{}/models",
        config.classifier.base_url.trim_end_matches('/')
    );
    client
        .get(&url)
        .send()
        .await
        .map_err(|e| ClassifyError::Transport(e.to_string()))?;
    println!("classifier endpoint: reachable ({})", config.classifier.base_url);
    Ok(())
}

fn tail_lines(contents: &str, n: usize) -> Vec<&str> {
    let all: Vec<&str> = contents.lines().collect();
    let start = all.len().saturating_sub(n);
    all[start..].to_vec()
}
