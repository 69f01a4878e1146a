//! Error types for the record/replay engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Key was never written to the active storage.
    #[error("key not found: {key}")]
    NotFound { key: String },

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Entry exists but is empty or malformed.
    #[error("invalid stored entry for key: {key}")]
    InvalidEntry { key: String },

    #[error("storage is closed")]
    StorageClosed,

    #[error("no storage installed")]
    NoStorage,

    /// Recorded outcome could not be reconstructed into the expected response.
    #[error("replay mismatch for key {key}: {reason}")]
    ReplayMismatch { key: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound { .. })
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

/// Failure of an intercepted call.
///
/// `Upstream` carries the real dependency's error unchanged (Record and Off modes).
/// `Replayed` is a failure that was captured during Record and reproduced from
/// storage; its `Display` is exactly the recorded message.
#[derive(Error, Debug)]
pub enum CallError<E> {
    #[error("{0}")]
    Upstream(E),

    #[error("{0}")]
    Replayed(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl<E> CallError<E> {
    pub fn engine(&self) -> Option<&EngineError> {
        match self {
            CallError::Engine(err) => Some(err),
            _ => None,
        }
    }

    /// The call was replayed but nothing was recorded under its key.
    pub fn is_replay_miss(&self) -> bool {
        matches!(self, CallError::Engine(EngineError::NotFound { .. }))
    }
}
