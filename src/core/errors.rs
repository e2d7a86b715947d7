use thiserror::Error;
use super::types::{UploadId, UploadState};

/// Control-plane errors returned to callers of the manager
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Task not found: {0}")]
    NotFound(UploadId),

    #[error("Cannot {action} task {id} in state {state}")]
    InvalidState {
        id: UploadId,
        state: UploadState,
        action: &'static str,
    },

    #[error("Task {0} is already queued")]
    DuplicateTask(UploadId),

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("Manager shut down")]
    ManagerShutdown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings decode error: {0}")]
    SettingsDecode(#[from] toml::de::Error),

    #[error("Settings encode error: {0}")]
    SettingsEncode(#[from] toml::ser::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    pub fn invalid_state(id: UploadId, state: UploadState, action: &'static str) -> Self {
        Self::InvalidState { id, state, action }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

/// Failures reported by a transfer engine. These never reach callers
/// directly; the scheduler folds them into the task record.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("{0}")]
    Network(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server error: status code {status_code}, message: {message}")]
    Server {
        status_code: u16,
        message: String,
    },

    #[error("Invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Upload was cancelled")]
    Aborted,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransferError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn server_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status_code,
            message: message.into(),
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// Error alias
pub type Result<T, E = UploadError> = std::result::Result<T, E>;
