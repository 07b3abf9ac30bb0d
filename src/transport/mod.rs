//! Signed, encrypted request/response transport.
//!
//! # Architecture
//!
//! ```text
//! caller ──call()──> SecureTransport ──────────────> backend
//!                      │  ensure_session()              │
//!                      │  ├─ POST /crypto/handshake ───>│
//!                      │  │<── X-Server-Key, X-Session-Id
//!                      │  encrypt body, sign envelope   │
//!                      │──── signed request ───────────>│
//!                      │<─── base64 AES-GCM body ───────│
//!                      │  decrypt, check code 556       │
//! ```
//!
//! # Per-call State Machine
//!
//! ```text
//! [NoSession] → [Handshaking] → [Ready] → [Sending] → [Decrypting] → [Done]
//!                    ^                                      │
//!                    └────── code 556 (at most once) ───────┘
//! ```
//!
//! A second 556 inside the same call is returned as
//! [`PalError::SessionExpired`].
//!
//! # Handshake Serialization
//!
//! Handshakes are single-flight. Concurrent callers that find no session
//! wait on the same gate and reuse the result. After an expiry signal the
//! re-handshake only happens if the session generation is still the one the
//! failed call used; otherwise the newer session is reused.
//!
//! # Plaintext Responses
//!
//! Responses are decrypted on every endpoint except the upload endpoint.
//! A response that fails to decrypt is a [`PalError::Crypto`] error, never a
//! plaintext passthrough.

mod envelope;
mod upload;

pub use envelope::{now_millis, SignedEnvelope, CLIENT_KEY, SERVER_KEY, SESSION_ID, SIGNATURE, TIMESTAMP};
pub use upload::guess_mime;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::crypto::{KeyPair, PublicKey, SecureCodec};
use crate::error::{PalError, Result};
use crate::session::{Session, SessionKeys};

/// Handshake endpoint
pub const HANDSHAKE_PATH: &str = "/crypto/handshake";

/// Binary upload endpoint
pub const UPLOAD_PATH: &str = "/oss/upload";

/// Application code meaning "session key no longer valid"
pub const SESSION_EXPIRED_CODE: i64 = 556;

/// Whether a decrypted body carries the session-expired code.
pub fn is_session_expired(plaintext: &str) -> bool {
    serde_json::from_str::<Value>(plaintext)
        .ok()
        .and_then(|json| json.get("code").and_then(Value::as_i64))
        == Some(SESSION_EXPIRED_CODE)
}

enum Outcome {
    Done(String),
    Expired,
}

/// Authenticated, confidential client for the backend.
pub struct SecureTransport {
    config: Config,
    session: Arc<Session>,
    client: Client,
    stream_client: Client,
    handshake_gate: Mutex<()>,
    handshakes: AtomicU64,
}

impl SecureTransport {
    /// Create a transport sharing `session`.
    pub fn new(config: Config, session: Arc<Session>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.server.connect_timeout())
            .timeout(config.server.request_timeout())
            .build()
            .map_err(|e| PalError::Network(format!("Failed to create HTTP client: {e}")))?;

        // No overall timeout: the event stream is long-lived
        let stream_client = Client::builder()
            .connect_timeout(config.stream.connect_timeout())
            .build()
            .map_err(|e| PalError::Network(format!("Failed to create stream client: {e}")))?;

        Ok(Self {
            config,
            session,
            client,
            stream_client,
            handshake_gate: Mutex::new(()),
            handshakes: AtomicU64::new(0),
        })
    }

    /// Shared session state.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of completed handshakes.
    pub fn handshake_count(&self) -> u64 {
        self.handshakes.load(Ordering::Relaxed)
    }

    /// Negotiate a new session key, replacing any existing one.
    pub async fn handshake(&self) -> Result<SessionKeys> {
        let _gate = self.handshake_gate.lock().await;
        self.handshake_locked().await
    }

    async fn handshake_locked(&self) -> Result<SessionKeys> {
        let pair = KeyPair::generate();
        let client_key = pair.public_key().to_base64()?;

        let response = self
            .client
            .post(self.config.url(HANDSHAKE_PATH))
            .header(CLIENT_KEY, client_key)
            .header(CONTENT_TYPE, "application/json")
            .body("{}")
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(PalError::Handshake(format!("HTTP {}", status.as_u16())));
        }

        let server_key = required_header(&response, SERVER_KEY)?;
        let session_id = required_header(&response, SESSION_ID)?;

        let peer = PublicKey::from_base64(&server_key)
            .map_err(|e| PalError::Handshake(format!("invalid {SERVER_KEY}: {e}")))?;
        let keys = self.session.install(session_id, pair.derive_shared_key(&peer));

        self.handshakes.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Handshake complete, session_id={}", keys.session_id);
        Ok(keys)
    }

    /// Return the active session, handshaking first if there is none.
    pub async fn ensure_session(&self) -> Result<SessionKeys> {
        if let Some(keys) = self.session.keys() {
            return Ok(keys);
        }

        let _gate = self.handshake_gate.lock().await;
        if let Some(keys) = self.session.keys() {
            return Ok(keys);
        }
        self.handshake_locked().await
    }

    /// Replace the session the caller saw as stale.
    pub(crate) async fn refresh_session(&self, stale_generation: u64) -> Result<SessionKeys> {
        let _gate = self.handshake_gate.lock().await;
        if let Some(keys) = self.session.keys() {
            if keys.generation != stale_generation {
                tracing::debug!("Session already refreshed by another caller");
                return Ok(keys);
            }
        }
        self.handshake_locked().await
    }

    /// One signed, encrypted call returning the decrypted body.
    ///
    /// `body` is encrypted when present and non-empty; otherwise the signature
    /// covers an empty body and no body is sent.
    pub async fn call(&self, method: Method, path: &str, body: Option<&str>) -> Result<String> {
        let keys = self.ensure_session().await?;
        if let Outcome::Done(plaintext) = self.send_once(&method, path, body, &keys).await? {
            return Ok(plaintext);
        }

        tracing::warn!("Session key expired during {} {}, re-handshaking", method, path);
        let keys = self.refresh_session(keys.generation).await?;
        match self.send_once(&method, path, body, &keys).await? {
            Outcome::Done(plaintext) => Ok(plaintext),
            Outcome::Expired => {
                // Force the next call to start from a fresh handshake
                self.session.drop_keys(keys.generation);
                Err(PalError::SessionExpired)
            },
        }
    }

    /// Signed GET.
    pub async fn get(&self, path: &str) -> Result<String> {
        self.call(Method::GET, path, None).await
    }

    /// Signed POST with an encrypted body.
    pub async fn post(&self, path: &str, body: &str) -> Result<String> {
        self.call(Method::POST, path, Some(body)).await
    }

    /// Serialize `body`, POST it, and deserialize the decrypted response.
    pub async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let json = serde_json::to_string(body)?;
        let plaintext = self.post(path, &json).await?;
        Ok(serde_json::from_str(&plaintext)?)
    }

    async fn send_once(
        &self,
        method: &Method,
        path: &str,
        body: Option<&str>,
        keys: &SessionKeys,
    ) -> Result<Outcome> {
        let codec = SecureCodec::new(&keys.shared_key);
        let encrypted = match body {
            Some(body) if !body.is_empty() => codec.encrypt(body.as_bytes())?,
            _ => String::new(),
        };

        let mut request = self.signed(&self.client, method, path, &encrypted, keys, &codec)?;
        if !encrypted.is_empty() {
            request = request
                .header(CONTENT_TYPE, "text/plain;charset=UTF-8")
                .body(encrypted);
        }

        tracing::debug!("{} {} (session generation {})", method, path, keys.generation);
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(PalError::Request {
                status: status.as_u16(),
                body: text,
            });
        }

        let plaintext = codec.decrypt_to_string(&text)?;
        if is_session_expired(&plaintext) {
            return Ok(Outcome::Expired);
        }
        Ok(Outcome::Done(plaintext))
    }

    /// Upload raw bytes as multipart `file`.
    ///
    /// The signature covers an empty body and the response is returned as-is
    /// without decryption. Requires a bearer credential.
    pub async fn upload_binary(
        &self,
        path: &str,
        bytes: Vec<u8>,
        filename: &str,
        mime: &str,
    ) -> Result<String> {
        if !self.session.is_logged_in() {
            return Err(PalError::NotAuthenticated);
        }
        let keys = self.ensure_session().await?;
        let codec = SecureCodec::new(&keys.shared_key);

        let form = upload::file_form(bytes, filename, mime)?;
        let response = self
            .signed(&self.client, &Method::POST, path, "", &keys, &codec)?
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(PalError::Request {
                status: status.as_u16(),
                body: text,
            });
        }
        tracing::debug!("Uploaded {} to {}", filename, path);
        Ok(text)
    }

    /// Open the long-lived event stream at `path`.
    pub(crate) async fn open_stream(&self, path: &str, keys: &SessionKeys) -> Result<Response> {
        let codec = SecureCodec::new(&keys.shared_key);
        let request = self
            .signed(&self.stream_client, &Method::GET, path, "", keys, &codec)?
            .header(ACCEPT, "text/event-stream");
        Ok(request.send().await?)
    }

    fn signed(
        &self,
        client: &Client,
        method: &Method,
        path: &str,
        encrypted_body: &str,
        keys: &SessionKeys,
        codec: &SecureCodec,
    ) -> Result<RequestBuilder> {
        let envelope = SignedEnvelope::now(method.as_str(), path, encrypted_body);
        let signature = envelope.sign(codec)?;

        let mut request = client
            .request(method.clone(), self.config.url(path))
            .header(SESSION_ID, keys.session_id.as_str())
            .header(TIMESTAMP, envelope.timestamp.to_string())
            .header(SIGNATURE, signature);

        if let Some(credential) = self.session.credential() {
            request = request.header(AUTHORIZATION, format!("Bearer {credential}"));
        }
        Ok(request)
    }
}

impl std::fmt::Debug for SecureTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureTransport")
            .field("base_url", &self.config.server.base_url)
            .field("session", &self.session)
            .field("handshakes", &self.handshake_count())
            .finish()
    }
}

fn required_header(response: &Response, name: &str) -> Result<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| PalError::Handshake(format!("response missing {name}")))
}
