//! Backend calls built on [`SecureTransport`].
//!
//! Responses share one envelope:
//!
//! ```json
//! {"success": true, "code": 200, "data": ...}
//! ```
//!
//! On failure `data` usually carries a human-readable message.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PalError, Result};
use crate::session::{Claims, Session};
use crate::transport::{guess_mime, SecureTransport, UPLOAD_PATH};

/// Login endpoint
pub const LOGIN_PATH: &str = "/user/pal/login";

/// Standard response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    /// Whether the backend accepted the request
    #[serde(default)]
    pub success: bool,

    /// Payload, or an error message when `success` is false
    pub data: Option<T>,

    /// Application status code
    pub code: Option<i64>,
}

impl ApiEnvelope<Value> {
    /// Parse a raw response body.
    pub fn parse(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }

    // The body arrived with HTTP 200, so that is the status reported
    fn into_data(self, fallback: &str) -> Result<Value> {
        if self.success {
            return Ok(self.data.unwrap_or(Value::Null));
        }
        let message = match self.data {
            Some(Value::String(message)) if !message.is_empty() => message,
            _ => fallback.to_string(),
        };
        Err(PalError::Request {
            status: 200,
            body: message,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
    software_code: &'a str,
}

/// Log in and store the returned credential in the session.
pub async fn login(transport: &SecureTransport, username: &str, password: &str) -> Result<Option<Claims>> {
    let session = transport.session();
    let request = LoginRequest {
        username,
        password,
        software_code: session.client_id(),
    };

    let envelope: ApiEnvelope<Value> = transport.post_json(LOGIN_PATH, &request).await?;
    let token = match envelope.into_data("login failed")? {
        Value::String(token) if !token.is_empty() => token,
        other => return Err(PalError::Parse(format!("login returned no credential: {other}"))),
    };

    session.set_credential(Some(token));
    let claims = session.claims();
    match &claims {
        Some(claims) => tracing::info!("Logged in as {} (user {})", claims.username, claims.user_id),
        None => tracing::info!("Logged in as {}", username),
    }
    Ok(claims)
}

/// Upload a file and return the stored file id.
pub async fn upload_file(transport: &SecureTransport, path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await?;
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload.bin")
        .to_string();
    let mime = guess_mime(&filename);

    let body = transport
        .upload_binary(UPLOAD_PATH, bytes, &filename, mime)
        .await?;
    let data = ApiEnvelope::parse(&body)?.into_data("upload failed")?;

    data.get("id")
        .and_then(|id| match id {
            Value::String(id) => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        })
        .ok_or_else(|| PalError::Parse("upload response has no file id".to_string()))
}

/// Forget the credential, keeping the encrypted session.
pub fn logout(session: &Session) {
    session.logout();
    tracing::info!("Logged out");
}
