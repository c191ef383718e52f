//! Relay error types.

use thiserror::Error;

/// Relay error type.
///
/// Only construction-time calls hand these to callers; failures inside the
/// connection loop are logged and folded into [`crate::RelayState`].
#[derive(Error, Debug)]
pub enum RelayError {
    /// Empty local id
    #[error("Invalid local id: {0:?}")]
    InvalidLocalId(String),

    /// Another live instance already uses this local id
    #[error(
        "Duplicate local id {0:?}: terminate the existing relay or use a different local id"
    )]
    DuplicateLocalId(String),

    /// Saved connection record could not be decoded (it has been cleared)
    #[error("Malformed saved config for {local_id:?}: {reason}")]
    MalformedConfig { local_id: String, reason: String },

    /// Nothing saved to rejoin
    #[error("No saved config for {0:?}")]
    NoSavedConfig(String),

    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(#[from] relay_storage::StorageError),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Relay URL could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Not connected error
    #[error("Not connected to relay")]
    NotConnected,

    /// Send error
    #[error("Failed to send message: {0}")]
    Send(String),
}

/// Result type alias using RelayError.
pub type RelayResult<T> = Result<T, RelayError>;
