//! Request/response channel between the coordinator and page contexts.
//!
//! The coordinator only ever sends two requests: a liveness `probe` and
//! `fetchResourceData`. Transports implement [`Messenger`] for delivery and
//! [`ExtractorInstaller`] for (re)creating the page side.

pub mod channel;
pub mod framing;
pub mod process;

use crate::error::MessengerError;
use crate::types::{AcquiredImage, ContextId, PageInfo, SubmissionPageInfo};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use channel::InProcessHost;
pub use process::{PageRegistration, ProcessHost};

/// Requests understood by a page context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum PageRequest {
    Probe,
    FetchResourceData {
        locator: String,
        #[serde(rename = "pageInfo")]
        page_info: PageInfo,
    },
}

impl PageRequest {
    pub fn name(&self) -> &'static str {
        match self {
            PageRequest::Probe => "probe",
            PageRequest::FetchResourceData { .. } => "fetchResourceData",
        }
    }
}

/// Image payload plus the enriched page info
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePayload {
    pub image: AcquiredImage,
    pub page_info: SubmissionPageInfo,
}

/// Reply from a page context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<ResourcePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PageResponse {
    pub fn pong() -> Self {
        Self {
            success: true,
            message: Some("pong".to_string()),
            payload: None,
            error: None,
        }
    }

    pub fn data(image: AcquiredImage, page_info: SubmissionPageInfo) -> Self {
        Self {
            success: true,
            message: None,
            payload: Some(ResourcePayload { image, page_info }),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            payload: None,
            error: Some(error.into()),
        }
    }

    /// Extract the payload of a successful data response
    pub fn into_payload(self) -> Result<ResourcePayload, MessengerError> {
        if !self.success {
            return Err(MessengerError::Rejected(
                self.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        self.payload
            .ok_or_else(|| MessengerError::Protocol("response carries no payload".to_string()))
    }
}

/// Deliver a request to a page context and wait for its reply
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(
        &self,
        context: ContextId,
        request: PageRequest,
    ) -> Result<PageResponse, MessengerError>;
}

/// (Re)create the page-side extractor of a context
#[async_trait]
pub trait ExtractorInstaller: Send + Sync {
    async fn install(&self, context: ContextId) -> Result<(), MessengerError>;
}
