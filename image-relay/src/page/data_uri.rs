//! `data:` URI helpers.

use crate::error::AcquireError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

pub const DEFAULT_MIME: &str = "application/octet-stream";

/// Encode bytes as a base64 `data:` URI
pub fn encode(mime: &str, bytes: &[u8]) -> String {
    let mime = if mime.is_empty() { DEFAULT_MIME } else { mime };
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Decode a `data:` URI into its media type and bytes
pub fn decode(uri: &str) -> Result<(String, Vec<u8>), AcquireError> {
    let rest = uri.strip_prefix("data:").ok_or(AcquireError::InvalidDataUri)?;
    let (header, payload) = rest.split_once(',').ok_or(AcquireError::InvalidDataUri)?;

    let (mime, is_base64) = match header.strip_suffix(";base64") {
        Some(mime) => (mime, true),
        None => (header, false),
    };
    let mime = mime.split(';').next().unwrap_or_default().trim();
    let mime = if mime.is_empty() { "text/plain" } else { mime };

    let bytes = if is_base64 {
        STANDARD
            .decode(payload.trim())
            .map_err(|_| AcquireError::InvalidDataUri)?
    } else {
        payload.as_bytes().to_vec()
    };

    Ok((mime.to_string(), bytes))
}
