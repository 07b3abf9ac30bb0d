//! Identity claims carried inside the bearer credential.
//!
//! The credential is a JWT-shaped token. Only the payload segment is read;
//! signature verification is the backend's job.

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{PalError, Result};

/// Decoded user identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Numeric user id (`sub`)
    #[serde(rename = "sub", deserialize_with = "numeric_or_string")]
    pub user_id: u64,

    /// Login name
    #[serde(default)]
    pub username: String,

    /// Role tag (e.g. `PAL`, `ADMIN`)
    #[serde(default)]
    pub role: String,
}

impl Claims {
    /// Decode the claims segment of `token`.
    pub fn from_token(token: &str) -> Result<Self> {
        let payload = token
            .split('.')
            .nth(1)
            .ok_or_else(|| PalError::Parse("credential has no claims segment".to_string()))?;

        // Some issuers pad the segment, most don't
        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .or_else(|_| URL_SAFE.decode(payload))
            .map_err(|e| PalError::Parse(format!("credential claims: {e}")))?;

        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn numeric_or_string<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Sub {
        Number(u64),
        Text(String),
    }

    match Sub::deserialize(deserializer)? {
        Sub::Number(n) => Ok(n),
        Sub::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
pub(crate) fn encode_test_token(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}
