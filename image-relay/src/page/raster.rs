//! Re-rasterize an image the way an offscreen canvas would.
//!
//! The image is loaded anonymously. A cross-origin resource is only usable
//! when the response approves the page's origin through CORS, otherwise the
//! canvas would be tainted and export fails. The decoded pixels are exported
//! as JPEG.

use crate::error::AcquireError;
use crate::page::data_uri;
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use reqwest::header::{ACCESS_CONTROL_ALLOW_ORIGIN, ORIGIN};
use reqwest::Client;
use tracing::{debug, trace};
use url::Url;

pub const JPEG_MIME: &str = "image/jpeg";

/// An encoded image buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl EncodedImage {
    pub fn to_data_uri(&self) -> String {
        data_uri::encode(&self.mime, &self.bytes)
    }
}

/// Capability to render a loaded image into an encoded buffer
#[async_trait]
pub trait RasterExport: Send + Sync {
    /// Load `locator`, draw it at natural size and export as JPEG at `quality` (1-100)
    async fn export(&self, locator: &str, quality: u8) -> Result<EncodedImage, AcquireError>;
}

/// HTTP-backed canvas emulation
pub struct CanvasRasterizer {
    client: Client,
    /// Origin of the page the image lives in
    page_origin: Option<String>,
}

impl CanvasRasterizer {
    pub fn new(client: Client, page_origin: Option<String>) -> Self {
        Self {
            client,
            page_origin,
        }
    }

    async fn load(&self, locator: &str) -> Result<Vec<u8>, AcquireError> {
        if locator.starts_with("data:") {
            let (_, bytes) = data_uri::decode(locator)?;
            return Ok(bytes);
        }

        let url =
            Url::parse(locator).map_err(|e| AcquireError::Load(format!("{}: {}", locator, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AcquireError::Load(format!("unsupported scheme: {}", url.scheme())));
        }

        let resource_origin = url.origin().ascii_serialization();
        let cross_origin = self.page_origin.as_deref() != Some(resource_origin.as_str());

        let mut request = self.client.get(url);
        if cross_origin {
            if let Some(origin) = &self.page_origin {
                request = request.header(ORIGIN, origin.as_str());
            }
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(AcquireError::Load(format!(
                "{} returned {}",
                locator,
                response.status()
            )));
        }

        if cross_origin {
            let allowed = response
                .headers()
                .get(ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|value| value.to_str().ok())
                .map(str::trim);
            let approved = match allowed {
                Some("*") => true,
                Some(value) => self.page_origin.as_deref() == Some(value),
                None => false,
            };
            if !approved {
                return Err(AcquireError::Tainted(locator.to_string()));
            }
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl RasterExport for CanvasRasterizer {
    async fn export(&self, locator: &str, quality: u8) -> Result<EncodedImage, AcquireError> {
        let bytes = self.load(locator).await?;
        trace!("Loaded {} bytes for rasterization", bytes.len());

        let quality = quality.clamp(1, 100);
        let encoded = tokio::task::spawn_blocking(move || reencode_jpeg(&bytes, quality))
            .await
            .map_err(|e| AcquireError::Load(format!("rasterizer task failed: {}", e)))??;

        debug!("Rasterized {} to {} bytes of JPEG", locator, encoded.len());
        Ok(EncodedImage {
            mime: JPEG_MIME.to_string(),
            bytes: encoded,
        })
    }
}

/// Decode any supported format and export as JPEG
pub fn reencode_jpeg(bytes: &[u8], quality: u8) -> Result<Vec<u8>, AcquireError> {
    let decoded = image::load_from_memory(bytes)?;
    // JPEG has no alpha channel; flatten like a canvas export does
    let rgb = decoded.to_rgb8();

    let mut output = Vec::new();
    JpegEncoder::new_with_quality(&mut output, quality).encode_image(&rgb)?;
    Ok(output)
}
