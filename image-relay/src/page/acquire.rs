//! Turn an image locator into an embeddable payload.
//!
//! Strategies are tried in order: re-rasterize, fetch the raw bytes, and
//! finally pass the locator through untouched. Acquisition never fails and
//! has no effect on the page.

use crate::error::AcquireError;
use crate::page::data_uri;
use crate::page::raster::{CanvasRasterizer, RasterExport};
use crate::types::{AcquiredImage, AcquisitionStrategy};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::sync::Arc;
use tracing::{debug, warn};

/// JPEG quality used when re-rasterizing (0.8 on a canvas)
pub const RASTER_QUALITY: u8 = 80;

/// Raw bytes of a resource and their media type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResource {
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Capability to download a resource
#[async_trait]
pub trait ResourceFetch: Send + Sync {
    async fn fetch(&self, locator: &str) -> Result<FetchedResource, AcquireError>;
}

/// Plain HTTP GET
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceFetch for HttpFetcher {
    async fn fetch(&self, locator: &str) -> Result<FetchedResource, AcquireError> {
        if locator.starts_with("data:") {
            let (mime, bytes) = data_uri::decode(locator)?;
            return Ok(FetchedResource { mime, bytes });
        }

        let response = self.client.get(locator).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AcquireError::Http(status.as_u16()));
        }

        let mime = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .map(str::trim)
            .filter(|essence| !essence.is_empty())
            .unwrap_or(data_uri::DEFAULT_MIME)
            .to_string();

        let bytes = response.bytes().await?.to_vec();
        Ok(FetchedResource { mime, bytes })
    }
}

/// Ordered fallback chain over the acquisition strategies
#[derive(Clone)]
pub struct ResourceAcquirer {
    raster: Arc<dyn RasterExport>,
    fetcher: Arc<dyn ResourceFetch>,
}

impl ResourceAcquirer {
    pub fn new(raster: Arc<dyn RasterExport>, fetcher: Arc<dyn ResourceFetch>) -> Self {
        Self { raster, fetcher }
    }

    /// HTTP-backed acquirer for a page with the given origin
    pub fn http(client: Client, page_origin: Option<String>) -> Self {
        Self::new(
            Arc::new(CanvasRasterizer::new(client.clone(), page_origin)),
            Arc::new(HttpFetcher::new(client)),
        )
    }

    pub async fn acquire(&self, locator: &str) -> AcquiredImage {
        match self.raster.export(locator, RASTER_QUALITY).await {
            Ok(encoded) => {
                debug!("Acquired {} by rasterizing", locator);
                return AcquiredImage::new(encoded.to_data_uri(), AcquisitionStrategy::Rasterized);
            }
            Err(e) => debug!("Rasterization failed for {}: {}", locator, e),
        }

        match self.fetcher.fetch(locator).await {
            Ok(resource) => {
                debug!("Acquired {} by fetching ({})", locator, resource.mime);
                return AcquiredImage::new(
                    data_uri::encode(&resource.mime, &resource.bytes),
                    AcquisitionStrategy::Fetched,
                );
            }
            Err(e) => warn!("Fetch failed for {}: {}", locator, e),
        }

        warn!("⚠️ Sending the image locator instead of image data: {}", locator);
        AcquiredImage::passthrough(locator)
    }
}
