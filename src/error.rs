//! Error types for shelfgen.

use std::time::Duration;

/// Top-level error type for the orchestration server.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Submission error: {0}")]
    Submit(#[from] SubmitError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Callback error: {0}")]
    Callback(#[from] CallbackError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Workitem submission errors.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Engine rejected workitem ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Engine request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid workitem acknowledgment: {0}")]
    InvalidResponse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SubmitError {
    /// Whether a retry may succeed. Connection and timeout failures plus
    /// 429/5xx rejections are transient; everything else is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            SubmitError::Rejected { status, .. } => *status == 429 || *status >= 500,
            SubmitError::Http(e) => e.is_timeout() || e.is_connect(),
            SubmitError::InvalidResponse(_) | SubmitError::Json(_) => false,
        }
    }
}

/// Object-store errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Object {object} lookup returned {status}")]
    UnexpectedStatus { object: String, status: u16 },

    #[error("Invalid signed resource response: {0}")]
    InvalidResponse(String),
}

/// Translation trigger errors.
#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("Translation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Translation rejected ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Push channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Client {client_id} is not connected")]
    NotConnected { client_id: String },

    #[error("Failed to push to client {client_id}: {reason}")]
    SendFailed { client_id: String, reason: String },

    #[error("Server failed to start: {reason}")]
    StartupFailed { reason: String },
}

/// Session-mode errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session for client {client_id} was closed")]
    Closed { client_id: String },

    #[error("No input for client {client_id} within {waited:?}")]
    PollTimeout { client_id: String, waited: Duration },
}

/// Inbound callback processing errors.
#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error("Report fetch failed: {0}")]
    ReportFetch(String),

    #[error("Malformed callback payload: {0}")]
    MalformedPayload(String),
}

/// Result type alias for the server.
pub type Result<T> = std::result::Result<T, Error>;
