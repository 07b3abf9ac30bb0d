//! HMAC-SHA256 request signatures.
//!
//! The raw session key bytes are the MAC key. Signatures are lowercase hex.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::error::CryptoError;
use super::exchange::SharedKey;

type HmacSha256 = Hmac<Sha256>;

fn mac_for(key: &SharedKey) -> Result<HmacSha256, CryptoError> {
    HmacSha256::new_from_slice(key.as_bytes()).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Sign `message` and return the hex-encoded tag.
pub fn sign(key: &SharedKey, message: &[u8]) -> Result<String, CryptoError> {
    let mut mac = mac_for(key)?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a hex-encoded tag in constant time.
pub fn verify(key: &SharedKey, message: &[u8], signature: &str) -> Result<(), CryptoError> {
    let tag = hex::decode(signature.trim()).map_err(|e| CryptoError::Encoding(format!("hex: {e}")))?;
    let mut mac = mac_for(key)?;
    mac.update(message);
    mac.verify_slice(&tag)
        .map_err(|_| CryptoError::SignatureMismatch)
}
