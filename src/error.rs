//! Error types for mailroom.

/// Top-level error type for the daemon.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Classification error: {0}")]
    Classify(#[from] ClassifyError),

    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors. Always fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Object-storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to list {prefix}: {source}")]
    List {
        prefix: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to fetch object {key}: {source}")]
    Fetch {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to copy object {key} to {target}: {source}")]
    Copy {
        key: String,
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Record not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Transaction failed: {0}")]
    Transaction(String),
}

/// Classification gateway errors.
///
/// These never escape the gateway — every variant is coerced to the
/// `unknown` intent before the pipeline sees the result. They exist so
/// the coercion can be logged with a precise cause.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Classifier returned non-JSON output: {0}")]
    MalformedResponse(String),

    #[error("Expected 5 boolean flags, got {0}")]
    WrongLength(usize),

    #[error("Flag at index {0} is not a boolean")]
    NonBoolean(usize),

    #[error("Expected exactly one true flag, got {0}")]
    WrongTrueCount(usize),

    #[error("Reserved flag (index 4) must be false")]
    ReservedSet,
}

/// Handler execution errors.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Handler {name} failed: {reason}")]
    Failed { name: String, reason: String },

    #[error("Failed to send mail to {to}: {reason}")]
    Send { to: String, reason: String },
}

/// Single-instance lock errors.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Another instance is running (pid {pid}, lock file {path})")]
    Held { pid: i32, path: String },

    #[error("Failed to write lock file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No running instance found (lock file {0})")]
    NotRunning(String),
}

/// Pipeline-level errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to parse message from object {key}: {reason}")]
    Parse { key: String, reason: String },

    #[error("No handler registered for intent {0}")]
    NoHandler(String),
}

/// Result type alias for the daemon.
pub type Result<T> = std::result::Result<T, Error>;
