use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TimelapseError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Capture processing error: {0}")]
    Capture(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Other error: {0}")]
    Other(String),
}

/// Failure class carried next to the message in responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidRequest,
    Store,
    Internal,
}

impl TimelapseError {
    /// Store failures are surfaced to the user; everything else is local.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, TimelapseError::Store(_) | TimelapseError::Database(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TimelapseError::NotFound(_) => ErrorKind::NotFound,
            TimelapseError::Store(_) | TimelapseError::Database(_) => ErrorKind::Store,
            _ => ErrorKind::Internal,
        }
    }
}

pub type TimelapseResult<T> = std::result::Result<T, TimelapseError>;
