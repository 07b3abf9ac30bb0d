//! Cryptographic error type.
//!
//! Every variant is fatal to the operation that produced it. The transport
//! layer never downgrades a [`CryptoError`] into a plaintext passthrough.

use thiserror::Error;

/// Errors from key exchange, encryption and signing.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Peer public key could not be decoded.
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Key material has the wrong length or shape.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Encryption failed.
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Authentication tag mismatch, wrong key, or corrupted ciphertext.
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Ciphertext blob shorter than nonce + tag.
    #[error("Ciphertext too short: {0} bytes")]
    DataTooShort(usize),

    /// Transport encoding (base64/hex) was malformed.
    #[error("Invalid encoding: {0}")]
    Encoding(String),

    /// Signature did not verify.
    #[error("Signature verification failed")]
    SignatureMismatch,
}

impl From<base64::DecodeError> for CryptoError {
    fn from(err: base64::DecodeError) -> Self {
        CryptoError::Encoding(format!("base64: {err}"))
    }
}
