//! # Palwire - Secure Session Client for the Pal Order Desk
//!
//! Client-side core of the order desk: an authenticated encrypted channel to
//! the backend, a reconnecting event stream, and session-scoped caches.
//!
//! ## Features
//!
//! - **ECDH session keys**: P-256 handshake, SHA-256 derived AES-256 key
//! - **Sealed calls**: AES-GCM bodies, HMAC-SHA256 signed request metadata
//! - **Expiry recovery**: one automatic re-handshake and retry per call
//! - **Event stream**: `data:` frames dispatched to per-domain listeners,
//!   reconnecting after a fixed delay
//! - **TTL caches**: capacity-bounded stores with sliding expiry and a named
//!   registry
//!
//! ## Protocol Overview
//!
//! ### Architecture
//!
//! ```text
//! Client                                             Backend
//!    |                                                  |
//!    |-- POST /crypto/handshake (X-Client-Key) -------->|
//!    |<------------- X-Server-Key, X-Session-Id --------|
//!    |                                                  |
//!    |== signed + encrypted call ======================>|
//!    |<================================ encrypted body =|
//!    |                                                  |
//!    |-- GET /events/stream (signed) ------------------>|
//!    |<-------------------- data: {...}\n\n ... --------|
//! ```
//!
//! ### Wire Formats
//!
//! | Item            | Encoding                                         |
//! |-----------------|--------------------------------------------------|
//! | Public key      | base64 X.509 SubjectPublicKeyInfo (DER)          |
//! | Encrypted body  | base64(`nonce[12] ‖ ciphertext ‖ tag[16]`)       |
//! | Signature       | hex HMAC-SHA256 of `METHOD\nPATH\nTS\nBODY`      |
//! | Expiry signal   | decrypted JSON with `"code": 556`                |
//!
//! ### Headers
//!
//! | Header          | Direction      | Purpose                          |
//! |-----------------|----------------|----------------------------------|
//! | `X-Client-Key`  | Client→Server  | Handshake public key             |
//! | `X-Server-Key`  | Server→Client  | Handshake public key             |
//! | `X-Session-Id`  | Both           | Session binding                  |
//! | `X-Timestamp`   | Client→Server  | Millisecond epoch, signed        |
//! | `X-Signature`   | Client→Server  | Request signature                |
//! | `Authorization` | Client→Server  | `Bearer <credential>` once known |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use palwire::{Config, SecureTransport, Session, StreamSubscriber, WILDCARD};
//!
//! let config = Config::load(None)?;
//! let session = Arc::new(Session::ephemeral());
//! let transport = Arc::new(SecureTransport::new(config.clone(), Arc::clone(&session))?);
//!
//! let profile = transport.get("/user/info").await?;
//!
//! let stream = StreamSubscriber::new(&config, session, Arc::clone(&transport))?;
//! stream.on(WILDCARD, |event| println!("{} {} {}", event.domain, event.action, event.resource_id));
//! stream.connect(Some(vec!["ORDER".to_string()])).await;
//! ```
//!
//! ## Modules
//!
//! - [`crypto`]: key agreement, AEAD codec, HMAC signatures
//! - [`session`]: shared session state, credential claims, client identity
//! - [`transport`]: signed/encrypted calls and uploads
//! - [`stream`]: event stream decoding, listeners, reconnecting worker
//! - [`cache`]: TTL/capacity caches and the named registry
//! - [`api`]: login and file upload helpers
//! - [`config`]: layered configuration
//! - [`error`]: error types

pub mod api;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod error;
pub mod session;
pub mod stream;
pub mod transport;

// Re-exports for convenience
pub use cache::{CacheEngine, CacheManager};
pub use config::Config;
pub use crypto::{CryptoError, KeyPair, PublicKey, SecureCodec, SharedKey};
pub use error::{PalError, Result};
pub use session::{Claims, ClientIdentity, Session, SessionKeys};
pub use stream::{Action, ListenerId, StreamEvent, StreamSubscriber, WILDCARD};
pub use transport::{SecureTransport, SignedEnvelope};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
