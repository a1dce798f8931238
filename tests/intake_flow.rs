//! End-to-end intake tests: real spool directory, real (in-memory)
//! database, stubbed classifier and mailer.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use mailroom::classify::IntentClassifier;
use mailroom::config::SmtpConfig;
use mailroom::daemon::Daemon;
use mailroom::error::HandlerError;
use mailroom::handlers::Router;
use mailroom::intent::ClassificationResult;
use mailroom::mailer::{Mailer, OutboundEmail};
use mailroom::pipeline::Pipeline;
use mailroom::storage::FsObjectStore;
use mailroom::store::{Database, LibSqlBackend, RecordStatus};

/// Classifies by keyword, the way the real classifier would.
struct KeywordClassifier;

#[async_trait]
impl IntentClassifier for KeywordClassifier {
    async fn classify(&self, subject: &str, body: &str) -> ClassificationResult {
        let text = format!("{subject} {body}").to_lowercase();
        let raw = if text.contains("pricing") {
            "[true,false,false,false,false]"
        } else if text.contains("sign up") {
            "[false,true,false,false,false]"
        } else if text.contains("human") {
            "[false,false,false,true,false]"
        } else {
            "[false,false,true,false,false]"
        };
        ClassificationResult::from_raw(raw).expect("valid flags")
    }
}

#[derive(Default)]
struct CapturingMailer {
    sent: Mutex<Vec<OutboundEmail>>,
}

#[async_trait]
impl Mailer for CapturingMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<(), HandlerError> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

struct Harness {
    _tmp: tempfile::TempDir,
    root: std::path::PathBuf,
    db: Arc<LibSqlBackend>,
    mailer: Arc<CapturingMailer>,
    daemon: Daemon,
}

fn smtp_config() -> SmtpConfig {
    SmtpConfig {
        host: "smtp.example.com".to_string(),
        port: 587,
        username: "bot@frflashy.test".to_string(),
        password: secrecy::SecretString::from("secret"),
        from_address: "bot@frflashy.test".to_string(),
        review_address: "ops@frflashy.test".to_string(),
        escalation_address: "support@frflashy.test".to_string(),
    }
}

async fn harness(dry_run: bool) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().to_path_buf();
    let storage = Arc::new(FsObjectStore::open(&root).unwrap());
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let mailer = Arc::new(CapturingMailer::default());

    let router = Router::with_defaults(mailer.clone(), &smtp_config());
    let pipeline = Pipeline::new(
        storage.clone(),
        db.clone(),
        Arc::new(KeywordClassifier),
        router,
        dry_run,
    );
    let daemon = Daemon::new(pipeline, storage, Duration::from_secs(60));

    Harness {
        _tmp: tmp,
        root,
        db,
        mailer,
        daemon,
    }
}

fn land(h: &Harness, name: &str, message_id: &str, sender: &str, subject: &str, body: &str) {
    let raw = format!(
        "Message-ID: {message_id}\r\n\
         From: {sender}\r\n\
         To: sales@frflashy.test\r\n\
         Subject: {subject}\r\n\
         Date: Mon, 12 Jan 2026 10:30:00 +0000\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         {body}\r\n"
    );
    std::fs::write(h.root.join("pending").join(name), raw).unwrap();
}

#[tokio::test]
async fn mixed_batch_is_routed_per_intent() {
    let h = harness(false).await;
    land(
        &h,
        "a.eml",
        "<a@example.com>",
        "alice@example.com",
        "Pricing question",
        "How much does it cost?",
    );
    land(
        &h,
        "b.eml",
        "<b@example.com>",
        "bob@example.com",
        "Account",
        "I'd like to sign up please",
    );
    land(
        &h,
        "c.eml",
        "<c@example.com>",
        "carol@example.com",
        "Complaint",
        "Let me talk to a human",
    );
    land(
        &h,
        "d.eml",
        "<d@example.com>",
        "dave@example.com",
        "asdf",
        "qwerty",
    );

    let stats = h.daemon.run_cycle().await.unwrap();
    assert_eq!(stats.processed, 4);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.errors, 0);

    // alice and bob get replies; carol's mail is escalated (forward + ack);
    // dave's goes to the review queue.
    let sent = h.mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 5);
    assert!(sent.iter().any(|e| e.to == "alice@example.com"));
    assert!(sent.iter().any(|e| e.to == "bob@example.com"));
    assert!(sent.iter().any(|e| e.to == "support@frflashy.test"));
    assert!(sent.iter().any(|e| e.to == "carol@example.com"));
    assert!(sent.iter().any(|e| e.to == "ops@frflashy.test"));
    drop(sent);

    let expect_status = [
        ("a@example.com", "send_info", RecordStatus::Processed),
        ("b@example.com", "create_account", RecordStatus::Processed),
        ("c@example.com", "speak_to_human", RecordStatus::Escalated),
        ("d@example.com", "unknown", RecordStatus::PendingReview),
    ];
    for (message_id, intent, status) in expect_status {
        let record = h
            .db
            .get_email_by_message_id(message_id)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("no record for {message_id}"));
        assert_eq!(record.intent_label, intent, "{message_id}");
        assert_eq!(record.status, status, "{message_id}");
    }

    // Everything settled under processed/, nothing left pending.
    for name in ["a.eml", "b.eml", "c.eml", "d.eml"] {
        assert!(h.root.join("processed").join(name).exists(), "{name}");
    }
    assert_eq!(
        std::fs::read_dir(h.root.join("pending")).unwrap().count(),
        0
    );
}

#[tokio::test]
async fn redelivered_message_is_not_reprocessed() {
    let h = harness(false).await;
    land(
        &h,
        "first.eml",
        "<same@example.com>",
        "alice@example.com",
        "Pricing",
        "cost?",
    );
    h.daemon.run_cycle().await.unwrap();

    // The gateway delivers the same message again under a new object key.
    land(
        &h,
        "second.eml",
        "<same@example.com>",
        "alice@example.com",
        "Pricing",
        "cost?",
    );
    let stats = h.daemon.run_cycle().await.unwrap();
    assert_eq!(stats.duplicates, 1);
    assert_eq!(stats.processed, 0);

    // Exactly one reply, exactly one record.
    assert_eq!(h.mailer.sent.lock().unwrap().len(), 1);
    let counts = h.db.counts_by_intent().await.unwrap();
    assert_eq!(counts, vec![("send_info".to_string(), 1)]);
    assert!(h.root.join("processed/second.eml").exists());
}

#[tokio::test]
async fn dry_run_cycle_observes_without_side_effects() {
    let h = harness(true).await;
    land(
        &h,
        "a.eml",
        "<a@example.com>",
        "alice@example.com",
        "Pricing",
        "cost?",
    );

    let stats = h.daemon.run_cycle().await.unwrap();
    assert_eq!(stats.processed, 1);

    assert_eq!(h.mailer.sent.lock().unwrap().len(), 0);
    assert!(!h.db.email_exists("a@example.com").await.unwrap());
    assert!(h.root.join("pending/a.eml").exists());
}

#[tokio::test]
async fn failing_mailer_settles_messages_as_failed() {
    struct DownMailer;

    #[async_trait]
    impl Mailer for DownMailer {
        async fn send(&self, email: &OutboundEmail) -> Result<(), HandlerError> {
            Err(HandlerError::Send {
                to: email.to.clone(),
                reason: "connection refused".to_string(),
            })
        }
    }

    let tmp = tempfile::tempdir().unwrap();
    let storage = Arc::new(FsObjectStore::open(tmp.path()).unwrap());
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let router = Router::with_defaults(Arc::new(DownMailer), &smtp_config());
    let pipeline = Pipeline::new(
        storage.clone(),
        db.clone(),
        Arc::new(KeywordClassifier),
        router,
        false,
    );
    let daemon = Daemon::new(pipeline, storage, Duration::from_secs(60));

    let raw = "Message-ID: <x@example.com>\r\nFrom: alice@example.com\r\n\
               To: sales@frflashy.test\r\nSubject: Pricing\r\n\r\ncost?\r\n";
    std::fs::write(tmp.path().join("pending/x.eml"), raw).unwrap();

    let stats = daemon.run_cycle().await.unwrap();
    assert_eq!(stats.failed, 1);

    let record = db
        .get_email_by_message_id("x@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, RecordStatus::Failed);
    assert!(tmp.path().join("failed/x.eml").exists());
}
