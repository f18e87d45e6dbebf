//! Error types for backend operations

use std::fmt;

/// Result type alias for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors that can occur while talking to the monitoring backend
#[derive(Debug)]
pub enum BackendError {
    /// The request could not be sent or no response was received
    Request(String),

    /// The backend answered with a non-success status code
    Status { status: u16, body: String },

    /// The response body could not be decoded
    Decode(String),

    /// Invalid client configuration (bad base URL, missing key, ...)
    InvalidConfig(String),
}

impl BackendError {
    /// Whether the failure is likely to clear up on its own
    ///
    /// The relay retries every failure either way; this only decides how
    /// loudly it is reported.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Request(_) => true,
            BackendError::Status { status, .. } => *status == 429 || *status >= 500,
            BackendError::Decode(_) | BackendError::InvalidConfig(_) => false,
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Request(msg) => write!(f, "backend request failed: {}", msg),
            BackendError::Status { status, body } => {
                write!(f, "backend returned HTTP {}: {}", status, body)
            }
            BackendError::Decode(msg) => write!(f, "failed to decode backend response: {}", msg),
            BackendError::InvalidConfig(msg) => write!(f, "invalid backend configuration: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else if err.is_builder() {
            BackendError::InvalidConfig(err.to_string())
        } else {
            BackendError::Request(err.to_string())
        }
    }
}
