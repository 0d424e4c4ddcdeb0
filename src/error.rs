//! Error and Result types for the statistics engine.

use crate::retention::UnitId;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A convenience `Result` type for statistics operations.
pub type Result<T> = std::result::Result<T, StatsError>;

/// The error type for statistics operations.
#[derive(Debug, Error)]
pub enum StatsError {
    /// The database file could not be opened.
    #[error("Failed to open statistics database {path}: {reason}")]
    StoreOpen {
        /// Path of the database file.
        path: PathBuf,
        /// Underlying failure, with a hint when the file system is the cause.
        reason: String,
    },

    /// A transaction or statement failed inside the store.
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A stored record could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Stored record carries a schema version this build cannot read.
    #[error("Unsupported record version: {0}")]
    UnsupportedVersion(u16),

    /// No bucket exists for the unit id.
    #[error("Bucket not found: {0}")]
    BucketNotFound(UnitId),

    /// Retention is not one of the supported values.
    #[error("Unsupported retention interval: {0} days")]
    InvalidRetention(u32),

    /// Report window is empty or longer than the longest retention.
    #[error("Unsupported report window: {0} hours")]
    InvalidWindow(u32),

    /// Ingestion entry failed validation.
    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    /// The store handle is not available (cleared or closed).
    #[error("Statistics database is closed")]
    Closed,

    /// `start` was called on a running engine.
    #[error("Engine is already running")]
    AlreadyStarted,

    /// `start` was called outside a Tokio runtime.
    #[error("No async runtime available: {0}")]
    Runtime(String),

    /// The engine was shut down and cannot be restarted.
    #[error("Engine has been shut down")]
    ShutDown,

    /// A panic was caught while initializing the engine.
    #[error("Panic during initialization: {0}")]
    Panic(String),
}

impl From<bincode::Error> for StatsError {
    fn from(e: bincode::Error) -> Self {
        StatsError::Codec(e.to_string())
    }
}
