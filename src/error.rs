//! Error types shared by every stage of the sync pipeline.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Watch or subscription could not be established, or the feed closed.
    #[error("watch setup failed: {0}")]
    Setup(String),

    /// The control connection could not be authenticated or went stale.
    #[error("authentication to {destination} failed: {reason}")]
    Auth { destination: String, reason: String },

    #[error("transfer of {path} failed: {reason}")]
    Transfer { path: String, reason: String },

    /// Tree listing failed during a bulk operation.
    #[error("failed to enumerate {root}: {reason}")]
    Enumeration { root: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl SyncError {
    pub fn auth(destination: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Auth {
            destination: destination.into(),
            reason: reason.into(),
        }
    }

    /// Whether a supervisor may restart the whole profile after this error.
    pub fn is_restartable(&self) -> bool {
        matches!(self, SyncError::Auth { .. } | SyncError::Setup(_))
    }
}

/// Outcome classification for one file's copy.
///
/// `Auth` means the shared control channel is gone and the profile must
/// re-authenticate. `Transfer` is local to the file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferFailure {
    #[error("session is stale: {0}")]
    Auth(String),

    #[error("{0}")]
    Transfer(String),
}

impl TransferFailure {
    pub fn is_auth(&self) -> bool {
        matches!(self, TransferFailure::Auth(_))
    }
}
