//! AES-256-GCM body encryption and request signing.
//!
//! Encrypted bodies are base64 text: `nonce || ciphertext || tag`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;

use super::error::CryptoError;
use super::exchange::SharedKey;
use super::hmac_auth;
use super::{NONCE_SIZE, TAG_SIZE};

/// Symmetric codec bound to one session key.
pub struct SecureCodec {
    cipher: Aes256Gcm,
    key: SharedKey,
}

impl SecureCodec {
    /// Create a codec for the given session key.
    pub fn new(key: &SharedKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(&(*key.as_bytes()).into()),
            key: key.clone(),
        }
    }

    /// Encrypt with a fresh random nonce and return the base64 blob.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        self.encrypt_with_nonce(plaintext, &nonce)
    }

    fn encrypt_with_nonce(
        &self,
        plaintext: &[u8],
        nonce: &[u8; NONCE_SIZE],
    ) -> Result<String, CryptoError> {
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(blob))
    }

    /// Verify and decrypt a base64 blob.
    ///
    /// Surrounding whitespace is ignored. Fails on bad base64, short input,
    /// a wrong key, or any tampering.
    pub fn decrypt(&self, blob: &str) -> Result<Vec<u8>, CryptoError> {
        let raw = STANDARD.decode(blob.trim())?;
        if raw.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::DataTooShort(raw.len()));
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }

    /// Decrypt and interpret the plaintext as UTF-8.
    pub fn decrypt_to_string(&self, blob: &str) -> Result<String, CryptoError> {
        let plaintext = self.decrypt(blob)?;
        String::from_utf8(plaintext)
            .map_err(|e| CryptoError::DecryptionFailed(format!("plaintext is not UTF-8: {e}")))
    }

    /// Hex HMAC-SHA256 of `message` under the session key.
    pub fn sign(&self, message: &str) -> Result<String, CryptoError> {
        hmac_auth::sign(&self.key, message.as_bytes())
    }

    /// Check a hex signature produced by [`SecureCodec::sign`].
    pub fn verify(&self, message: &str, signature: &str) -> Result<(), CryptoError> {
        hmac_auth::verify(&self.key, message.as_bytes(), signature)
    }
}

impl std::fmt::Debug for SecureCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureCodec")
            .field("algorithm", &"AES-256-GCM")
            .field("key", &self.key)
            .finish()
    }
}
