//! Palwire error types.
//!
//! # Recovery Classes
//!
//! - **Fatal to the operation**: `Crypto`, `Handshake`, `Request`,
//!   `NotAuthenticated`. The caller gets the error and decides what to show.
//! - **Recovered once**: `SessionExpired` is only surfaced when the single
//!   automatic re-handshake and retry also came back expired.
//! - **Never surfaced by the stream worker**: `Stream` and `Parse` are logged
//!   and absorbed by the reconnect loop and the frame decoder.
//!
//! The `Crypto` variant preserves the full error chain via `#[source]`.

use thiserror::Error;

use crate::crypto::CryptoError;

/// Palwire errors.
#[derive(Error, Debug)]
pub enum PalError {
    /// Key generation, derivation, or tag verification failed.
    #[error("Crypto error: {0}")]
    Crypto(#[source] CryptoError),

    /// Handshake endpoint refused us or omitted required headers.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Server reported the session key stale, again, after one re-handshake.
    #[error("Session expired")]
    SessionExpired,

    /// Non-success HTTP status.
    #[error("Request failed: HTTP {status}: {body}")]
    Request {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },

    /// The event stream broke; the worker reconnects.
    #[error("Stream error: {0}")]
    Stream(String),

    /// An event frame could not be parsed; it is dropped.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Operation requires a bearer credential.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Named cache exists with different key/value types.
    #[error("Cache type mismatch for '{0}'")]
    CacheType(String),

    /// Network communication error.
    #[error("Network error: {0}")]
    Network(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for palwire operations
pub type Result<T> = std::result::Result<T, PalError>;

impl PalError {
    /// Whether the failure is network-level and expected to clear by itself.
    ///
    /// The stream worker retries either way; this only picks the log level.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PalError::Network(_) | PalError::Stream(_) | PalError::Request { .. } | PalError::Handshake(_)
        )
    }
}

impl From<CryptoError> for PalError {
    fn from(err: CryptoError) -> Self {
        PalError::Crypto(err)
    }
}

impl From<reqwest::Error> for PalError {
    fn from(err: reqwest::Error) -> Self {
        PalError::Network(err.to_string())
    }
}

impl From<toml::de::Error> for PalError {
    fn from(err: toml::de::Error) -> Self {
        PalError::Config(err.to_string())
    }
}

impl From<base64::DecodeError> for PalError {
    fn from(err: base64::DecodeError) -> Self {
        PalError::Crypto(CryptoError::from(err))
    }
}
