//! Multipart upload helpers.

use reqwest::multipart::{Form, Part};

use crate::error::Result;

/// MIME type from a file name's extension.
pub fn guess_mime(filename: &str) -> &'static str {
    let lower = filename.to_ascii_lowercase();
    match lower.rsplit_once('.').map(|(_, ext)| ext) {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Single-part `file` form.
pub(crate) fn file_form(bytes: Vec<u8>, filename: &str, mime: &str) -> Result<Form> {
    let part = Part::bytes(bytes)
        .file_name(filename.to_string())
        .mime_str(mime)?;
    Ok(Form::new().part("file", part))
}
