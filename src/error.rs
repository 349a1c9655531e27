//! Error types for the offline relay

use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Error types that can occur inside the relay
#[derive(Error, Debug, Clone)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Corrupt store entry {key}: {reason}")]
    CorruptEntry { key: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Upstream returned transient status {status}")]
    TransientStatus { status: u16 },

    #[error("Range not satisfiable: {range} for {total} bytes")]
    RangeNotSatisfiable { range: String, total: u64 },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Control channel closed")]
    ChannelClosed,
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::IoError(err.to_string())
    }
}

impl From<bincode::Error> for RelayError {
    fn from(err: bincode::Error) -> Self {
        RelayError::StoreError(format!("encoding failed: {}", err))
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::ParseError(err.to_string())
    }
}

impl RelayError {
    /// Whether a fetch that ended with this error may succeed if attempted again.
    ///
    /// Only transport failures and statuses the retry policy classified as
    /// transient qualify. Other upstream statuses are answers, not errors.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RelayError::Transport(_) | RelayError::TransientStatus { .. }
        )
    }

    /// Map the error to the HTTP status a synthesized response should carry
    pub fn to_http_status(&self) -> u16 {
        match self {
            RelayError::RangeNotSatisfiable { .. } => 416,
            RelayError::ParseError(_) | RelayError::InvalidRequest(_) => 400,
            RelayError::Transport(_) | RelayError::TransientStatus { .. } => 503,
            RelayError::ConfigError(_)
            | RelayError::StoreError(_)
            | RelayError::CorruptEntry { .. }
            | RelayError::IoError(_)
            | RelayError::ChannelClosed => 500,
        }
    }
}
