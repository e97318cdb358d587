//! Turning an `imageData` field into bytes on disk

use crate::error::ServiceError;
use crate::payload::Category;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, TimeZone};
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::{debug, warn};

pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Image bytes and the file extension they should be saved with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub ext: &'static str,
}

/// File extension for a media type or data URI header; png when unknown
pub fn extension_for(media_type: &str) -> &'static str {
    let media_type = media_type.to_ascii_lowercase();
    if media_type.contains("png") {
        "png"
    } else if media_type.contains("jpeg") || media_type.contains("jpg") {
        "jpg"
    } else if media_type.contains("gif") {
        "gif"
    } else if media_type.contains("webp") {
        "webp"
    } else {
        "png"
    }
}

/// Decode a base64 `data:` URI
pub fn decode_data_uri(uri: &str) -> Result<ImagePayload, ServiceError> {
    let (header, data) = uri.split_once(',').ok_or(ServiceError::InvalidDataUri)?;
    if !header.starts_with("data:") || !header.ends_with(";base64") {
        return Err(ServiceError::InvalidDataUri);
    }

    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|_| ServiceError::InvalidDataUri)?;

    Ok(ImagePayload {
        bytes,
        ext: extension_for(header),
    })
}

/// Download an image the client could only send by address
pub async fn download(client: &reqwest::Client, url: &str) -> Result<ImagePayload, ServiceError> {
    debug!("Downloading image from {}", url);
    let response = client.get(url).timeout(DOWNLOAD_TIMEOUT).send().await?;
    if !response.status().is_success() {
        return Err(ServiceError::DownloadStatus(response.status().as_u16()));
    }

    let ext = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(extension_for)
        .unwrap_or("png");
    let bytes = response.bytes().await?.to_vec();

    Ok(ImagePayload { bytes, ext })
}

/// Bytes of an `imageData` field, whichever form it takes
pub async fn load(
    client: &reqwest::Client,
    image_data: &str,
) -> Result<ImagePayload, ServiceError> {
    if image_data.starts_with("data:") {
        decode_data_uri(image_data)
    } else {
        download(client, image_data).await
    }
}

/// `<category>_<YYYYmmdd_HHMMSS>_<first 8 of id>.<ext>`
pub fn file_name<Tz>(
    category: Category,
    saved_at: &DateTime<Tz>,
    image_id: &str,
    ext: &str,
) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let short_id: String = image_id.chars().take(8).collect();
    format!(
        "{}_{}_{}.{}",
        category.as_str(),
        saved_at.format("%Y%m%d_%H%M%S"),
        short_id,
        ext
    )
}

/// Width and height when the bytes decode as an image, else 0x0
pub fn dimensions(bytes: &[u8]) -> (u32, u32) {
    match image::load_from_memory(bytes) {
        Ok(decoded) => (decoded.width(), decoded.height()),
        Err(e) => {
            warn!("Could not read image dimensions: {}", e);
            (0, 0)
        }
    }
}
