use thiserror::Error;

/// Top-level error type for honeytrail
#[derive(Debug, Error)]
pub enum HoneytrailError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tail error: {0}")]
    Tail(#[from] TailError),

    #[error("Forward error: {0}")]
    Forward(#[from] ForwardError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while following a log source
#[derive(Debug, Error)]
pub enum TailError {
    #[error("Failed to read from source '{source_name}': {message}")]
    Read {
        source_name: String,
        message: String,
    },

    #[error("Source '{source_name}' unavailable after {attempts} attempt(s): {message}")]
    SourceUnavailable {
        source_name: String,
        attempts: u32,
        message: String,
    },

    #[error("File watch error: {0}")]
    FileWatch(String),

    #[error("Channel closed")]
    ChannelClosed,
}

/// Terminal outcome of a failed delivery
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForwardError {
    /// Every attempt failed with a transient error
    #[error("Delivery failed after {attempts} attempt(s): {reason}")]
    Exhausted { attempts: u32, reason: String },

    /// The collector refused the event; retrying would not help
    #[error("Event rejected by collector: {reason}")]
    Rejected { reason: String },

    /// Shutdown arrived before the next retry
    #[error("Delivery abandoned at shutdown after {attempts} attempt(s): {reason}")]
    Cancelled { attempts: u32, reason: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

/// Errors from the collector's persistence layer
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt row '{id}': {message}")]
    CorruptRow { id: String, message: String },

    #[error("Storage task failed: {0}")]
    Task(String),
}

/// Result type alias for honeytrail operations
pub type Result<T> = std::result::Result<T, HoneytrailError>;
