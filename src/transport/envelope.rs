//! Signed request envelope.
//!
//! Every call after the handshake is authenticated by an HMAC over
//!
//! ```text
//! METHOD \n PATH \n TIMESTAMP \n BODY
//! ```
//!
//! where `BODY` is the encrypted body text, or empty for GET, stream and
//! upload requests.

use crate::crypto::{CryptoError, SecureCodec};

/// Client public key header (handshake request)
pub const CLIENT_KEY: &str = "X-Client-Key";
/// Server public key header (handshake response)
pub const SERVER_KEY: &str = "X-Server-Key";
/// Session id header (handshake response, every signed request)
pub const SESSION_ID: &str = "X-Session-Id";
/// Millisecond timestamp header
pub const TIMESTAMP: &str = "X-Timestamp";
/// Hex HMAC header
pub const SIGNATURE: &str = "X-Signature";

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// The signed parts of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEnvelope<'a> {
    /// HTTP method, upper case
    pub method: &'a str,
    /// Path including any query string
    pub path: &'a str,
    /// Milliseconds since the epoch
    pub timestamp: i64,
    /// Encrypted body, or empty
    pub body: &'a str,
}

impl<'a> SignedEnvelope<'a> {
    /// Envelope stamped with the current time.
    pub fn now(method: &'a str, path: &'a str, body: &'a str) -> Self {
        Self::new(method, path, now_millis(), body)
    }

    /// Envelope with an explicit timestamp.
    pub fn new(method: &'a str, path: &'a str, timestamp: i64, body: &'a str) -> Self {
        Self {
            method,
            path,
            timestamp,
            body,
        }
    }

    /// The canonical string the signature covers.
    pub fn canonical(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}",
            self.method, self.path, self.timestamp, self.body
        )
    }

    /// Hex HMAC of the canonical string.
    pub fn sign(&self, codec: &SecureCodec) -> Result<String, CryptoError> {
        codec.sign(&self.canonical())
    }
}
