//! Request and response bodies of the HTTP API

use crate::storage::{ImageRecord, TaskRecord};
use serde::{Deserialize, Serialize};

/// Folder an image is filed under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Clothes,
    Char,
}

impl Category {
    /// Category named in a request; anything unknown files as clothes
    pub fn from_request(name: Option<&str>) -> Self {
        match name {
            Some("char") => Category::Char,
            _ => Category::Clothes,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Clothes => "clothes",
            Category::Char => "char",
        }
    }
}

/// Body of `POST /api/receive-image`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveRequest {
    /// `data:` URI or a URL to download
    #[serde(default)]
    pub image_data: Option<String>,

    #[serde(default)]
    pub original_url: Option<String>,

    /// Page info as sent by the client, kept as-is
    #[serde(default)]
    pub page_info: serde_json::Value,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub timestamp: Option<i64>,

    #[serde(default)]
    pub source: Option<String>,
}

/// Response of `POST /api/receive-image`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReceiveResponse {
    pub fn accepted(
        task_id: String,
        image_id: String,
        filename: String,
        file_size: u64,
        category: Category,
    ) -> Self {
        Self {
            success: true,
            task_id: Some(task_id),
            image_id: Some(image_id),
            filename: Some(filename),
            file_size: Some(file_size),
            category: Some(category),
            error: None,
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            success: false,
            task_id: None,
            image_id: None,
            filename: None,
            file_size: None,
            category: None,
            error: Some(message.to_string()),
        }
    }
}

/// Response of `GET /api/task/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub status: TaskRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Response of `GET /api/status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub timestamp: String,
    pub total_images: u64,
}

pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 100;

/// Query of `GET /api/images`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ImagesQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ImagesQuery {
    /// 1-based page, at least 1
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn per_page(&self) -> u32 {
        self.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page() - 1) * u64::from(self.per_page())
    }
}

/// Response of `GET /api/images`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageListResponse {
    pub images: Vec<ImageRecord>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub pages: u64,
}

impl ImageListResponse {
    pub fn new(images: Vec<ImageRecord>, total: u64, query: ImagesQuery) -> Self {
        let per_page = query.per_page();
        Self {
            images,
            total,
            page: query.page(),
            per_page,
            pages: total.div_ceil(u64::from(per_page)),
        }
    }
}
