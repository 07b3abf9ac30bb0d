//! Event-stream frame decoding.
//!
//! Frames are `data:` lines terminated by a blank line:
//!
//! ```text
//! data: {"domain":"ORDER","action":"UPDATE","resourceId":"123"}
//!
//! ```
//!
//! Several `data:` lines in one frame are joined with `\n`. Comment lines
//! (leading `:`) and the `event:`, `id:` and `retry:` fields are ignored.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{PalError, Result};

/// Kind of change a stream event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    /// Resource created
    Create,
    /// Resource changed
    Update,
    /// Resource removed
    Delete,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// One domain change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    /// Category tag, e.g. `ORDER`
    pub domain: String,
    /// What happened
    pub action: Action,
    /// Opaque id of the affected resource, numeric ids arrive as text
    #[serde(deserialize_with = "text_or_number")]
    pub resource_id: String,
}

impl StreamEvent {
    /// Parse a frame payload.
    pub fn parse(payload: &str) -> Result<Self> {
        serde_json::from_str(payload)
            .map_err(|e| PalError::Parse(format!("invalid stream event: {e}")))
    }
}

fn text_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

/// Incremental line-oriented frame decoder.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    data: Vec<String>,
    partial: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (without its terminator).
    ///
    /// Returns the accumulated payload when `line` is the blank delimiter
    /// that closes a frame with at least one `data:` line.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            let payload = self.data.join("\n");
            self.data.clear();
            return Some(payload);
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }

    /// Feed raw bytes from the network, which may split lines anywhere.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut payloads = Vec::new();
        self.partial.extend_from_slice(chunk);

        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            if let Some(payload) = self.push_line(&line) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Drop any half-received frame.
    pub fn reset(&mut self) {
        self.data.clear();
        self.partial.clear();
    }
}
