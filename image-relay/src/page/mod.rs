//! Page-context extractor.
//!
//! Runs next to a document, answers the coordinator's requests and never
//! leaves the page in a different state than it found it.

pub mod acquire;
pub mod context;
pub mod data_uri;
pub mod document;
pub mod raster;

use crate::messenger::{PageRequest, PageResponse};
use crate::types::{PageDetails, SubmissionPageInfo};
use acquire::ResourceAcquirer;
use chrono::Utc;
use document::{DocumentQuery, DocumentSnapshot};
use std::sync::Arc;
use tracing::debug;

pub use acquire::{FetchedResource, HttpFetcher, ResourceFetch, RASTER_QUALITY};
pub use context::{correlate, CONTEXT_TEXT_LIMIT};
pub use document::{ImageElement, ParentElement};
pub use raster::{CanvasRasterizer, EncodedImage, RasterExport};

/// Extractor bound to one document
#[derive(Clone)]
pub struct PageAgent {
    document: Arc<dyn DocumentQuery>,
    acquirer: ResourceAcquirer,
}

impl PageAgent {
    pub fn new(document: Arc<dyn DocumentQuery>, acquirer: ResourceAcquirer) -> Self {
        Self { document, acquirer }
    }

    /// Agent over a snapshot, loading resources over HTTP
    pub fn for_document(snapshot: DocumentSnapshot, client: reqwest::Client) -> Self {
        let acquirer = ResourceAcquirer::http(client, snapshot.origin());
        Self::new(Arc::new(snapshot), acquirer)
    }

    pub async fn handle(&self, request: PageRequest) -> PageResponse {
        debug!("Page agent handling {}", request.name());

        match request {
            PageRequest::Probe => PageResponse::pong(),
            PageRequest::FetchResourceData { locator, page_info } => {
                let image = self.acquirer.acquire(&locator).await;
                let details = PageDetails {
                    context: correlate(self.document.as_ref(), &locator),
                    document_title: self.document.title().to_string(),
                    document_url: self.document.url().to_string(),
                    timestamp: Utc::now().timestamp_millis(),
                };
                PageResponse::data(image, SubmissionPageInfo::enriched(page_info, details))
            }
        }
    }
}
