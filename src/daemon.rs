//! Poll loop and signal-driven shutdown.
//!
//! The daemon alternates between a poll cycle (drain everything under
//! `pending/`) and a sleep. SIGTERM and SIGINT both request a graceful
//! stop: the message currently in flight finishes, the rest of the cycle
//! is abandoned, and the loop exits. Nothing is ever killed mid-message.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::error::Error;
use crate::pipeline::{Disposition, Pipeline};
use crate::storage::ObjectStore;

/// Tally of one poll cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    /// Settled under `processed/` (including dry-run observations).
    pub processed: usize,
    /// Settled under `failed/`.
    pub failed: usize,
    /// Already-recorded message ids, settled without reprocessing.
    pub duplicates: usize,
    /// Left under `pending/` for the next cycle.
    pub errors: usize,
}

impl CycleStats {
    pub fn total(&self) -> usize {
        self.processed + self.failed + self.duplicates + self.errors
    }
}

/// The long-running poller.
pub struct Daemon {
    pipeline: Pipeline,
    storage: Arc<dyn ObjectStore>,
    poll_interval: Duration,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl Daemon {
    pub fn new(pipeline: Pipeline, storage: Arc<dyn ObjectStore>, poll_interval: Duration) -> Self {
        Self {
            pipeline,
            storage,
            poll_interval,
            shutdown: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Flag the loop to stop after the in-flight message.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Run until a shutdown signal arrives, or for one cycle when `once`.
    pub async fn run(&self, once: bool) -> Result<(), Error> {
        self.spawn_signal_listener()?;
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            once, "Daemon started"
        );

        loop {
            match self.run_cycle().await {
                Ok(stats) if stats.total() > 0 => {
                    info!(
                        processed = stats.processed,
                        failed = stats.failed,
                        duplicates = stats.duplicates,
                        errors = stats.errors,
                        "Poll cycle complete"
                    );
                }
                Ok(_) => {}
                // A failed listing (storage briefly unreachable) is not
                // fatal; the next cycle retries.
                Err(e) => error!(error = %e, "Poll cycle failed"),
            }

            if once {
                info!("Single cycle requested, exiting");
                return Ok(());
            }
            if self.shutdown_requested() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.wake.notified() => {}
            }
            if self.shutdown_requested() {
                break;
            }
        }

        info!("Daemon stopped");
        Ok(())
    }

    /// One pass over `pending/`. Per-message failures are logged and
    /// skipped; only a failed listing aborts the cycle.
    pub async fn run_cycle(&self) -> Result<CycleStats, Error> {
        let pending = self.storage.list_pending().await?;
        let mut stats = CycleStats::default();

        for object in &pending {
            if self.shutdown_requested() {
                warn!(
                    remaining = pending.len() - stats.total(),
                    "Shutdown requested, abandoning rest of cycle"
                );
                break;
            }

            match self.pipeline.process(object).await {
                Ok(Disposition::Processed(_)) | Ok(Disposition::DryRun(_)) => {
                    stats.processed += 1;
                }
                Ok(Disposition::Failed) => stats.failed += 1,
                Ok(Disposition::Duplicate) => stats.duplicates += 1,
                Err(e) => {
                    error!(key = %object.key(), error = %e, "Message left pending");
                    stats.errors += 1;
                }
            }
        }

        Ok(stats)
    }

    fn spawn_signal_listener(&self) -> Result<(), Error> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let shutdown = Arc::clone(&self.shutdown);
        let wake = Arc::clone(&self.wake);

        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
                _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully"),
            }
            shutdown.store(true, Ordering::SeqCst);
            wake.notify_waiters();
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::IntentClassifier;
    use crate::handlers::Router;
    use crate::handlers::test_support::RecordingMailer;
    use crate::intent::ClassificationResult;
    use crate::mailer::Mailer;
    use crate::storage::FsObjectStore;
    use crate::store::{Database, LibSqlBackend};
    use async_trait::async_trait;

    struct StubClassifier;

    #[async_trait]
    impl IntentClassifier for StubClassifier {
        async fn classify(&self, _subject: &str, _body: &str) -> ClassificationResult {
            ClassificationResult::from_raw("[true,false,false,false,false]")
                .expect("valid flags")
        }
    }

    async fn daemon_with_pending(names: &[&str]) -> (tempfile::TempDir, Daemon) {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Arc::new(FsObjectStore::open(tmp.path()).unwrap());
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        db.init_schema().await.unwrap();

        for (i, name) in names.iter().enumerate() {
            let raw = format!(
                "Message-ID: <m{i}@example.com>\r\n\
                 From: alice@example.com\r\n\
                 To: sales@frflashy.test\r\n\
                 Subject: Pricing?\r\n\r\n\
                 What's the monthly cost?\r\n"
            );
            std::fs::write(tmp.path().join("pending").join(name), raw).unwrap();
        }

        let mailer: Arc<dyn Mailer> = Arc::new(RecordingMailer::new());
        let smtp = crate::config::SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: "bot@frflashy.test".to_string(),
            password: secrecy::SecretString::from("secret"),
            from_address: "bot@frflashy.test".to_string(),
            review_address: "ops@frflashy.test".to_string(),
            escalation_address: "support@frflashy.test".to_string(),
        };
        let router = Router::with_defaults(mailer, &smtp);
        let pipeline = Pipeline::new(
            storage.clone(),
            db,
            Arc::new(StubClassifier),
            router,
            false,
        );
        let daemon = Daemon::new(pipeline, storage, Duration::from_secs(60));
        (tmp, daemon)
    }

    #[tokio::test]
    async fn cycle_drains_all_pending_objects() {
        let (tmp, daemon) = daemon_with_pending(&["a.eml", "b.eml", "c.eml"]).await;

        let stats = daemon.run_cycle().await.unwrap();
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.errors, 0);

        let remaining = std::fs::read_dir(tmp.path().join("pending")).unwrap().count();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn empty_cycle_is_a_no_op() {
        let (_tmp, daemon) = daemon_with_pending(&[]).await;
        let stats = daemon.run_cycle().await.unwrap();
        assert_eq!(stats.total(), 0);
    }

    #[tokio::test]
    async fn shutdown_abandons_rest_of_cycle() {
        let (tmp, daemon) = daemon_with_pending(&["a.eml", "b.eml"]).await;

        daemon.request_shutdown();
        let stats = daemon.run_cycle().await.unwrap();
        assert_eq!(stats.total(), 0);

        let remaining = std::fs::read_dir(tmp.path().join("pending")).unwrap().count();
        assert_eq!(remaining, 2);
    }

    #[tokio::test]
    async fn shutdown_mid_message_lets_it_finish() {
        struct SlowClassifier;

        #[async_trait]
        impl IntentClassifier for SlowClassifier {
            async fn classify(&self, _subject: &str, _body: &str) -> ClassificationResult {
                tokio::time::sleep(Duration::from_millis(300)).await;
                ClassificationResult::from_raw("[true,false,false,false,false]")
                    .expect("valid flags")
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        let storage = Arc::new(FsObjectStore::open(tmp.path()).unwrap());
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        for i in 0..2 {
            let raw = format!(
                "Message-ID: <slow{i}@example.com>\r\n\
                 From: alice@example.com\r\n\
                 To: sales@frflashy.test\r\n\
                 Subject: Pricing?\r\n\r\n\
                 What's the monthly cost?\r\n"
            );
            std::fs::write(tmp.path().join("pending").join(format!("s{i}.eml")), raw).unwrap();
        }

        let mailer: Arc<dyn Mailer> = Arc::new(RecordingMailer::new());
        let smtp = crate::config::SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: "bot@frflashy.test".to_string(),
            password: secrecy::SecretString::from("secret"),
            from_address: "bot@frflashy.test".to_string(),
            review_address: "ops@frflashy.test".to_string(),
            escalation_address: "support@frflashy.test".to_string(),
        };
        let router = Router::with_defaults(mailer, &smtp);
        let pipeline = Pipeline::new(
            storage.clone(),
            db.clone(),
            Arc::new(SlowClassifier),
            router,
            false,
        );
        let daemon = Arc::new(Daemon::new(pipeline, storage, Duration::from_secs(60)));

        let handle = {
            let daemon = Arc::clone(&daemon);
            tokio::spawn(async move { daemon.run_cycle().await })
        };
        // Land mid-classification of the first message.
        tokio::time::sleep(Duration::from_millis(50)).await;
        daemon.request_shutdown();

        let stats = handle.await.unwrap().unwrap();
        // The in-flight message finished end to end; the second never started.
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.total(), 1);

        let processed = std::fs::read_dir(tmp.path().join("processed")).unwrap().count();
        let pending = std::fs::read_dir(tmp.path().join("pending")).unwrap().count();
        assert_eq!(processed, 1);
        assert_eq!(pending, 1);

        let recorded = db.counts_by_intent().await.unwrap();
        assert_eq!(recorded, vec![("send_info".to_string(), 1)]);
    }

    #[tokio::test]
    async fn per_message_error_does_not_abort_cycle() {
        let (tmp, daemon) = daemon_with_pending(&["good.eml"]).await;
        // Unparseable bytes stay pending but the cycle continues.
        std::fs::write(tmp.path().join("pending").join("junk.eml"), [0xffu8, 0x00]).unwrap();

        let stats = daemon.run_cycle().await.unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.errors, 1);
        assert!(tmp.path().join("pending/junk.eml").exists());
    }

    #[tokio::test]
    async fn once_mode_runs_a_single_cycle_and_returns() {
        let (tmp, daemon) = daemon_with_pending(&["a.eml"]).await;

        daemon.run(true).await.unwrap();
        assert!(tmp.path().join("processed/a.eml").exists());
    }

    #[tokio::test]
    async fn run_exits_on_shutdown_request() {
        let (_tmp, daemon) = daemon_with_pending(&[]).await;
        let daemon = Arc::new(daemon);

        let handle = {
            let daemon = Arc::clone(&daemon);
            tokio::spawn(async move { daemon.run(false).await })
        };
        // Let the first cycle start, then stop the loop.
        tokio::time::sleep(Duration::from_millis(50)).await;
        daemon.request_shutdown();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("daemon should stop promptly")
            .unwrap()
            .unwrap();
    }
}
