//! P-256 key exchange with the backend.
//!
//! The client generates an ephemeral pair per handshake, sends its public key,
//! and derives the session key from the server's public key. The pair is
//! dropped as soon as the shared key exists.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use p256::ecdh::diffie_hellman;
use p256::pkcs8::{DecodePublicKey, EncodePublicKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::error::CryptoError;
use super::KEY_SIZE;

/// P-256 public key, transported as X.509 SubjectPublicKeyInfo DER.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(p256::PublicKey);

impl PublicKey {
    /// Encode as SubjectPublicKeyInfo DER.
    pub fn to_der(&self) -> Result<Vec<u8>, CryptoError> {
        self.0
            .to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }

    /// Encode as standard base64 of the DER document (the `X-Client-Key` form).
    pub fn to_base64(&self) -> Result<String, CryptoError> {
        Ok(STANDARD.encode(self.to_der()?))
    }

    /// Decode a SubjectPublicKeyInfo DER document.
    pub fn from_der(der: &[u8]) -> Result<Self, CryptoError> {
        p256::PublicKey::from_public_key_der(der)
            .map(Self)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }

    /// Decode the base64 form sent in `X-Server-Key`.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let der = STANDARD.decode(encoded.trim())?;
        Self::from_der(&der)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sec1 = self.0.to_sec1_bytes();
        write!(f, "PublicKey(P-256, {}...)", hex::encode(&sec1[..5]))
    }
}

/// 256-bit symmetric session key.
///
/// Used directly as the AES-256-GCM key and as the HMAC key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedKey([u8; KEY_SIZE]);

impl SharedKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Wrap a slice, which must be exactly [`KEY_SIZE`] bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; KEY_SIZE] = slice.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "Expected {} bytes, got {}",
                KEY_SIZE,
                slice.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedKey([REDACTED, {} bytes])", KEY_SIZE)
    }
}

/// Ephemeral P-256 key pair.
pub struct KeyPair {
    secret: p256::SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh random pair from the OS CSPRNG.
    pub fn generate() -> Self {
        let secret = p256::SecretKey::random(&mut OsRng);
        let public = PublicKey(secret.public_key());
        Self { secret, public }
    }

    /// Rebuild a pair from a 32-byte big-endian scalar.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let secret = p256::SecretKey::from_slice(bytes)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let public = PublicKey(secret.public_key());
        Ok(Self { secret, public })
    }

    /// Our public key to send to the peer.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// ECDH with the peer, then SHA-256 over the raw shared x-coordinate.
    pub fn derive_shared_key(&self, peer_public: &PublicKey) -> SharedKey {
        let shared = diffie_hellman(self.secret.to_nonzero_scalar(), peer_public.0.as_affine());
        let digest = Sha256::digest(shared.raw_secret_bytes());
        SharedKey(digest.into())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
