use thiserror::Error;

use crate::model::signal::AlertKey;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("state encoding error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state store unavailable: {0}")]
    Unavailable(String),

    #[error("stale write for {symbol}: version {attempted} does not advance stored version {stored}")]
    Conflict {
        symbol: String,
        attempted: u64,
        stored: u64,
    },
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("notification timed out")]
    Timeout,

    #[error("notifier unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON encode error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("state store error: {0}")]
    StateStore(#[from] StoreError),

    #[error("alert {key} undelivered after {attempts} attempts: {source}")]
    Notification {
        key: AlertKey,
        attempts: u32,
        #[source]
        source: NotifyError,
    },

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("worker lane for {0} is closed")]
    LaneClosed(String),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl EngineError {
    /// Whether redelivering the same tick may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::StateStore(_) | EngineError::Timeout(_) | EngineError::Task(_)
        )
    }
}
