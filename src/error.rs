//! Error types for hookbus

use thiserror::Error;

/// Errors that can occur while receiving, authenticating, and
/// dispatching webhook callbacks
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Request failed signature verification
    #[error("Request is not authorized")]
    Unauthorized,

    /// Signature envelope could not be parsed from the request
    #[error("Malformed signature: {0}")]
    Signature(String),

    /// Verification key could not be fetched or parsed
    #[error("Failed to obtain verification key '{key_id}': {reason}")]
    KeyFetch {
        key_id: String,
        reason: String,
    },

    /// No handler registered for a derived event key
    #[error("No handler registered for '{0}'")]
    MissingHandler(String),

    /// A handler's asynchronous operation failed
    #[error("Handler '{name}' failed: {reason}")]
    Handler {
        name: String,
        reason: String,
    },

    /// Context store operation failure (network/storage)
    #[error("Context store error: {0}")]
    Store(String),

    /// Installation context could not be resolved
    #[error("Unknown installation: {0}")]
    UnknownInstallation(String),

    /// Platform API call failure
    #[error("API request to '{path}' failed with status {status}: {message}")]
    Api {
        path: String,
        status: u16,
        message: String,
    },

    /// Network-level failure reaching the platform
    #[error("Connection error: {0}")]
    Connection(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Dispatch aggregation timed out
    #[error("Dispatch timed out: {0}")]
    Timeout(String),
}

/// Result type alias for dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;
