//! Session cryptography.
//!
//! This module provides the primitives the secure channel is built from:
//!
//! - **P-256 ECDH**: ephemeral key agreement with the backend
//! - **SHA-256 derivation**: the raw shared secret is hashed into a 256-bit key
//! - **AES-256-GCM**: authenticated encryption of request and response bodies
//! - **HMAC-SHA256**: request signatures over the canonical envelope string
//!
//! # Handshake
//!
//! ```text
//! Client: (sk_c, pk_c) = P256::generate()
//! Server: (sk_s, pk_s) = P256::generate()
//!
//! shared_secret = ECDH(sk_c, pk_s) = ECDH(sk_s, pk_c)
//! session_key   = SHA-256(shared_secret)
//! ```
//!
//! Public keys travel as base64 X.509 SubjectPublicKeyInfo documents so they
//! interoperate with JCA/BouncyCastle backends.
//!
//! # Wire Format
//!
//! ```text
//! encrypted body = base64( nonce:12 || ciphertext || tag:16 )
//! signature      = hex( HMAC-SHA256(session_key, canonical) )
//! ```
//!
//! # Nonce Generation
//!
//! Every encryption draws a fresh random 96-bit nonce from the OS CSPRNG.
//! There is no counter, so nothing needs persisting across restarts and a
//! re-handshake never rewinds nonce state.

mod aead;
mod error;
mod exchange;
mod hmac_auth;

pub use aead::SecureCodec;
pub use error::CryptoError;
pub use exchange::{KeyPair, PublicKey, SharedKey};
pub use hmac_auth::{sign, verify};

/// Nonce size for AES-256-GCM (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size for AES-256-GCM (128 bits)
pub const TAG_SIZE: usize = 16;

/// Symmetric session key size (256 bits)
pub const KEY_SIZE: usize = 32;

/// HMAC-SHA256 tag size before hex encoding
pub const HMAC_TAG_SIZE: usize = 32;
