//! Core types shared by the coordinator and the page context.
//!
//! This module defines the data that crosses the messenger boundary and the
//! submission request sent to the local processing service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value of the `source` field on every submission
pub const SUBMISSION_SOURCE: &str = "browser-extension";

/// Identifier of a page context (one per tab)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(pub u32);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Page snapshot taken when the user triggered the action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    pub url: String,
    pub title: String,
    #[serde(rename = "favIconUrl", default, skip_serializing_if = "Option::is_none")]
    pub fav_icon_url: Option<String>,
}

/// Viewport-relative bounding box of an element
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementRect {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
}

/// Natural and displayed pixel dimensions of an image element
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDimensions {
    pub natural_width: u32,
    pub natural_height: u32,
    pub display_width: u32,
    pub display_height: u32,
}

/// Semantic context around the image element that was right-clicked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageContext {
    /// `alt` attribute, falling back to `title`
    pub alt_text: String,
    /// Text of the enclosing element, at most 200 characters
    pub context_text: String,
    pub position: ElementRect,
    pub parent_tag_name: Option<String>,
    pub image_dimensions: ImageDimensions,
}

/// Result of context correlation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextReport {
    pub context_found: bool,
    #[serde(default)]
    pub image_context: Option<ImageContext>,
    /// Set when correlation failed internally
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ContextReport {
    pub fn found(context: ImageContext) -> Self {
        Self {
            context_found: true,
            image_context: Some(context),
            error: None,
        }
    }

    pub fn not_found() -> Self {
        Self {
            context_found: false,
            image_context: None,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            context_found: false,
            image_context: None,
            error: Some(message.into()),
        }
    }
}

/// Details added by the page context on top of the trigger's page info
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDetails {
    #[serde(flatten)]
    pub context: ContextReport,
    pub document_title: String,
    pub document_url: String,
    /// Milliseconds since the epoch, taken in the page context
    pub timestamp: i64,
}

/// The `pageInfo` object of a submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionPageInfo {
    #[serde(flatten)]
    pub page: PageInfo,
    #[serde(flatten)]
    pub details: Option<PageDetails>,
}

impl SubmissionPageInfo {
    /// Page info without anything from the page context (degraded path)
    pub fn basic(page: PageInfo) -> Self {
        Self {
            page,
            details: None,
        }
    }

    pub fn enriched(page: PageInfo, details: PageDetails) -> Self {
        Self {
            page,
            details: Some(details),
        }
    }

    pub fn context(&self) -> Option<&ContextReport> {
        self.details.as_ref().map(|d| &d.context)
    }
}

/// Which acquisition strategy produced an image payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionStrategy {
    /// Decoded and re-encoded through an offscreen canvas
    Rasterized,
    /// Downloaded and wrapped as a data URI
    Fetched,
    /// Every strategy failed; the locator itself is sent
    Passthrough,
}

impl AcquisitionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionStrategy::Rasterized => "rasterized",
            AcquisitionStrategy::Fetched => "fetched",
            AcquisitionStrategy::Passthrough => "passthrough",
        }
    }
}

/// Embeddable image payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquiredImage {
    /// A `data:` URI, or the original locator for passthrough
    pub image_data: String,
    pub strategy: AcquisitionStrategy,
}

impl AcquiredImage {
    pub fn new(image_data: String, strategy: AcquisitionStrategy) -> Self {
        Self {
            image_data,
            strategy,
        }
    }

    pub fn passthrough(locator: &str) -> Self {
        Self::new(locator.to_string(), AcquisitionStrategy::Passthrough)
    }

    pub fn is_data_uri(&self) -> bool {
        self.image_data.starts_with("data:")
    }

    pub fn is_degraded(&self) -> bool {
        self.strategy == AcquisitionStrategy::Passthrough
    }
}

/// Body of `POST /api/receive-image`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    pub image_data: String,
    pub original_url: String,
    pub page_info: SubmissionPageInfo,
    /// Milliseconds since the epoch
    pub timestamp: i64,
    pub source: String,
}

impl SubmissionRequest {
    pub fn new(image_data: String, original_url: String, page_info: SubmissionPageInfo) -> Self {
        Self {
            image_data,
            original_url,
            page_info,
            timestamp: Utc::now().timestamp_millis(),
            source: SUBMISSION_SOURCE.to_string(),
        }
    }
}

/// A job the local service accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub task_id: String,
    pub created_at: DateTime<Utc>,
}

impl TaskHandle {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            created_at: Utc::now(),
        }
    }
}

/// Status of a task as reported by the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Completed,
    Failed,
    /// Anything else the service reports (`pending`, `processing`, ...)
    Pending(String),
}

impl TaskStatus {
    pub fn from_wire(status: &str) -> Self {
        match status {
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            other => TaskStatus::Pending(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending(_))
    }
}

/// What the user right-clicked on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Image,
    Link,
    Page,
    Selection,
}

/// Event delivered by the host when the user picks the menu entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEvent {
    pub context_id: ContextId,
    pub kind: TriggerKind,
    pub resource_locator: Option<String>,
    pub page_url: String,
    pub page_title: String,
    pub favicon_locator: Option<String>,
}

impl TriggerEvent {
    /// Convenience constructor for an image trigger
    pub fn image(context_id: ContextId, locator: &str, page_url: &str, page_title: &str) -> Self {
        Self {
            context_id,
            kind: TriggerKind::Image,
            resource_locator: Some(locator.to_string()),
            page_url: page_url.to_string(),
            page_title: page_title.to_string(),
            favicon_locator: None,
        }
    }

    pub fn page_info(&self) -> PageInfo {
        PageInfo {
            url: self.page_url.clone(),
            title: self.page_title.clone(),
            fav_icon_url: self.favicon_locator.clone(),
        }
    }
}
