use std::path::Path;

use clap::{Parser, Subcommand};

use mailroom::config::Config;
use mailroom::ops;

#[derive(Parser)]
#[command(
    name = "mailroom",
    version,
    about = "Email intake daemon: classify inbound mail and route it to intent handlers"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon in the foreground
    #[command(visible_alias = "start")]
    Run {
        /// Process one poll cycle and exit
        #[arg(long)]
        once: bool,
        /// Classify messages but send nothing, persist nothing, move nothing
        #[arg(long)]
        dry_run: bool,
        /// Override the poll interval in seconds
        #[arg(long)]
        interval: Option<u64>,
        /// Override the log file path
        #[arg(long)]
        log_file: Option<std::path::PathBuf>,
    },
    /// Report daemon liveness, spool depth and record counts
    Status,
    /// Signal the running daemon to stop and wait for it to exit
    Stop,
    /// Stop any running daemon and start a fresh one in the foreground
    Restart {
        /// Classify messages but send nothing, persist nothing, move nothing
        #[arg(long)]
        dry_run: bool,
    },
    /// List recent records, optionally filtered by intent or status
    List {
        /// Filter by intent label (send_info, create_account, unknown, speak_to_human)
        #[arg(long)]
        intent: Option<String>,
        /// Filter by status (processed, failed, pending_review, escalated)
        #[arg(long, conflicts_with = "intent")]
        status: Option<String>,
        /// Maximum number of records
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print the tail of the log file
    Logs {
        /// Number of lines to print
        #[arg(long, default_value_t = 100)]
        lines: usize,
    },
    /// Verify classifier and SMTP credentials without processing mail
    ValidateCredentials,
    /// Probe the spool directory and the database
    TestConnection,
}

#[tokio::main]
async fn main() {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let cli = Cli::parse();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("mailroom: {e}");
            std::process::exit(ops::EXIT_CONFIG);
        }
    };

    // CLI flags override the environment for this invocation only.
    if let Command::Run {
        interval, log_file, ..
    } = &cli.command
    {
        if let Some(secs) = interval {
            if *secs == 0 {
                eprintln!("mailroom: --interval must be at least 1 second");
                std::process::exit(ops::EXIT_CONFIG);
            }
            config.daemon.poll_interval = std::time::Duration::from_secs(*secs);
        }
        if let Some(path) = log_file {
            config.daemon.log_file = Some(path.clone());
        }
    }

    let _guard = init_tracing(config.daemon.log_file.as_deref());

    let result = match cli.command {
        Command::Run { once, dry_run, .. } => ops::run(&config, once, dry_run).await,
        Command::Status => ops::status(&config).await,
        Command::Stop => ops::stop(&config).await,
        Command::Restart { dry_run } => ops::restart(&config, dry_run).await,
        Command::List {
            intent,
            status,
            limit,
        } => ops::list(&config, intent.as_deref(), status.as_deref(), limit).await,
        Command::Logs { lines } => ops::logs(&config, lines).await,
        Command::ValidateCredentials => ops::validate_credentials(&config).await,
        Command::TestConnection => ops::test_connection(&config).await,
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "Command failed");
        eprintln!("mailroom: {e}");
        std::process::exit(ops::exit_code_for(&e));
    }
}

/// Console logging by default; when a log file is configured, logs go
/// there instead (non-blocking, guard keeps the writer alive).
fn init_tracing(log_file: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            if let Err(e) = std::fs::create_dir_all(dir) {
                eprintln!("mailroom: cannot create log directory {}: {e}", dir.display());
                std::process::exit(ops::EXIT_CONFIG);
            }
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "mailroom.log".to_string());
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
            None
        }
    }
}
