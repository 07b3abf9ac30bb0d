//! In-process mock of the order desk backend.
//!
//! Implements the server half of the handshake and the signed, encrypted
//! call scheme so the client can be exercised over real HTTP.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Multipart, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use palwire::transport::{SignedEnvelope, CLIENT_KEY, SERVER_KEY, SESSION_ID, SIGNATURE, TIMESTAMP};
use palwire::{Config, KeyPair, PublicKey, SecureCodec, SharedKey};
use serde_json::{json, Value};

pub const ORDER_UPDATE: &str = r#"{"domain":"ORDER","action":"UPDATE","resourceId":"123"}"#;

/// Backend state and knobs.
#[derive(Default)]
pub struct Backend {
    sessions: Mutex<HashMap<String, SharedKey>>,
    pub handshakes: AtomicUsize,
    pub calls: AtomicUsize,
    /// Answer this many upcoming calls with code 556
    pub expire_next: AtomicUsize,
    /// Refuse this many upcoming stream requests with 503
    pub stream_failures: AtomicUsize,
    pub stream_hits: AtomicUsize,
    /// Stream connections send headers and then nothing, never closing
    pub stream_idle: AtomicBool,
    /// Handshake responses omit X-Server-Key
    pub omit_server_key: AtomicBool,
    /// Upload responses seen: (file name, content type, byte count)
    pub uploads: Mutex<Vec<(String, String, usize)>>,
    /// Raw SSE body served on each stream connection
    pub stream_body: Mutex<String>,
}

impl Backend {
    pub fn handshake_count(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    pub fn stream_hit_count(&self) -> usize {
        self.stream_hits.load(Ordering::SeqCst)
    }

    pub fn set_stream_body(&self, body: impl Into<String>) {
        *self.stream_body.lock().unwrap() = body.into();
    }

    fn key_for(&self, session_id: &str) -> Option<SharedKey> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }

    /// Check the signature headers, returning the session key.
    fn authenticate(&self, method: &Method, uri: &Uri, headers: &HeaderMap, body: &str) -> Result<SharedKey, Response> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("missing {name}")).into_response())
        };
        let session_id = header(SESSION_ID)?;
        let timestamp: i64 = header(TIMESTAMP)?
            .parse()
            .map_err(|_| (StatusCode::BAD_REQUEST, "bad timestamp").into_response())?;
        let signature = header(SIGNATURE)?;

        let key = self
            .key_for(&session_id)
            .ok_or_else(|| (StatusCode::UNAUTHORIZED, "unknown session").into_response())?;

        let path = uri.path_and_query().map_or(uri.path(), |p| p.as_str());
        let envelope = SignedEnvelope::new(method.as_str(), path, timestamp, body);
        SecureCodec::new(&key)
            .verify(&envelope.canonical(), &signature)
            .map_err(|_| (StatusCode::UNAUTHORIZED, "bad signature").into_response())?;
        Ok(key)
    }
}

/// Start the mock on an ephemeral port.
pub async fn spawn_backend() -> (Config, Arc<Backend>) {
    spawn_with(Backend::default()).await
}

pub async fn spawn_with(backend: Backend) -> (Config, Arc<Backend>) {
    let backend = Arc::new(backend);
    let router = Router::new()
        .route("/crypto/handshake", post(handshake))
        .route("/echo", any(echo))
        .route("/fail", get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }))
        .route("/tampered", get(tampered))
        .route("/user/pal/login", post(login))
        .route("/oss/upload", post(upload))
        .route("/events/stream", get(stream))
        .with_state(Arc::clone(&backend));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    let mut config = Config::with_base_url(format!("http://{addr}"));
    config.server.request_timeout_ms = 5_000;
    config.stream.reconnect_delay_ms = 50;
    (config, backend)
}

pub fn test_token(user_id: u64, username: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(json!({"sub": user_id, "username": username, "role": "PAL"}).to_string());
    format!("{header}.{payload}.c2ln")
}

/// Poll `condition` every 10ms for up to `limit`.
pub async fn wait_until(limit: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

fn sealed(key: &SharedKey, value: &Value) -> Response {
    match SecureCodec::new(key).encrypt(value.to_string().as_bytes()) {
        Ok(blob) => blob.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn handshake(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    let Some(client_key) = headers.get(CLIENT_KEY).and_then(|v| v.to_str().ok()) else {
        return (StatusCode::BAD_REQUEST, "missing client key").into_response();
    };
    let Ok(client_key) = PublicKey::from_base64(client_key) else {
        return (StatusCode::BAD_REQUEST, "bad client key").into_response();
    };

    let pair = KeyPair::generate();
    let n = backend.handshakes.fetch_add(1, Ordering::SeqCst) + 1;
    let session_id = format!("sid-{n}");
    backend
        .sessions
        .lock()
        .unwrap()
        .insert(session_id.clone(), pair.derive_shared_key(&client_key));

    let mut response = StatusCode::OK.into_response();
    let out = response.headers_mut();
    if !backend.omit_server_key.load(Ordering::SeqCst) {
        out.insert(SERVER_KEY, pair.public_key().to_base64().unwrap().parse().unwrap());
    }
    out.insert(SESSION_ID, session_id.parse().unwrap());
    response
}

async fn echo(State(backend): State<Arc<Backend>>, method: Method, uri: Uri, headers: HeaderMap, body: String) -> Response {
    let key = match backend.authenticate(&method, &uri, &headers, &body) {
        Ok(key) => key,
        Err(response) => return response,
    };
    backend.calls.fetch_add(1, Ordering::SeqCst);

    let expired = backend
        .expire_next
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if expired {
        return sealed(&key, &json!({"success": false, "code": 556}));
    }

    let plaintext = if body.is_empty() {
        Value::Null
    } else {
        match SecureCodec::new(&key).decrypt_to_string(&body) {
            Ok(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
            Err(_) => return (StatusCode::BAD_REQUEST, "undecryptable body").into_response(),
        }
    };
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    sealed(
        &key,
        &json!({
            "success": true,
            "code": 200,
            "data": {"method": method.as_str(), "body": plaintext, "auth": auth},
        }),
    )
}

async fn tampered(State(backend): State<Arc<Backend>>, method: Method, uri: Uri, headers: HeaderMap) -> Response {
    if let Err(response) = backend.authenticate(&method, &uri, &headers, "") {
        return response;
    }
    // Sealed under a key the client does not have
    sealed(&SharedKey::from_bytes([0x5a; 32]), &json!({"success": true}))
}

async fn login(State(backend): State<Arc<Backend>>, method: Method, uri: Uri, headers: HeaderMap, body: String) -> Response {
    let key = match backend.authenticate(&method, &uri, &headers, &body) {
        Ok(key) => key,
        Err(response) => return response,
    };
    let request: Value = SecureCodec::new(&key)
        .decrypt_to_string(&body)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or(Value::Null);

    if request["password"] == "secret" && request["softwareCode"].as_str().is_some_and(|c| !c.is_empty()) {
        let user = request["username"].as_str().unwrap_or_default();
        sealed(&key, &json!({"success": true, "code": 200, "data": test_token(42, user)}))
    } else {
        sealed(&key, &json!({"success": false, "code": 401, "data": "bad password"}))
    }
}

async fn upload(State(backend): State<Arc<Backend>>, method: Method, uri: Uri, headers: HeaderMap, mut multipart: Multipart) -> Response {
    if let Err(response) = backend.authenticate(&method, &uri, &headers, "") {
        return response;
    }
    if headers.get("authorization").is_none() {
        return (StatusCode::UNAUTHORIZED, "no credential").into_response();
    }

    let mut id = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let mime = field.content_type().unwrap_or_default().to_string();
        let bytes = field.bytes().await.unwrap_or_default();
        id = Some(format!("file-{}", bytes.len()));
        backend.uploads.lock().unwrap().push((name, mime, bytes.len()));
    }

    match id {
        Some(id) => json!({"success": true, "data": {"id": id}}).to_string().into_response(),
        None => json!({"success": false, "data": "no file part"}).to_string().into_response(),
    }
}

async fn stream(State(backend): State<Arc<Backend>>, method: Method, uri: Uri, headers: HeaderMap) -> Response {
    let key = match backend.authenticate(&method, &uri, &headers, "") {
        Ok(key) => key,
        Err(response) => return response,
    };
    backend.stream_hits.fetch_add(1, Ordering::SeqCst);

    let refuse = backend
        .stream_failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if refuse {
        return (StatusCode::SERVICE_UNAVAILABLE, "try later").into_response();
    }
    if backend.expire_next.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
        let mut response = sealed(&key, &json!({"code": 556}));
        *response.status_mut() = StatusCode::UNAUTHORIZED;
        return response;
    }

    if backend.stream_idle.load(Ordering::SeqCst) {
        let silent = futures::stream::pending::<Result<Vec<u8>, std::io::Error>>();
        return ([(header::CONTENT_TYPE, "text/event-stream")], Body::from_stream(silent)).into_response();
    }

    let body = backend.stream_body.lock().unwrap().clone();
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}
