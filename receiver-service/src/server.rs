//! HTTP server for receiving images
//!
//! Every accepted image gets a task in `processing` state; a background job
//! marks it `completed` after the configured processing delay.

use crate::error::ServiceError;
use crate::images;
use crate::payload::{
    Category, ErrorResponse, ImageListResponse, ImagesQuery, ReceiveRequest, ReceiveResponse,
    StatusResponse, TaskStatusResponse,
};
use crate::storage::{NewImage, Storage, STATUS_COMPLETED};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Local;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Largest request body accepted (data URIs are big)
pub const MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

/// Receiver server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on
    pub bind: SocketAddr,
    /// Root of the database and saved images
    pub data_dir: PathBuf,
    /// Time until a new task is marked completed
    pub processing_delay: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("image-relay-receiver");

        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            data_dir,
            processing_delay: Duration::from_secs(2),
        }
    }
}

impl ServerConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("receiver.db")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.data_dir.join("images")
    }
}

/// Shared state for request handlers
#[derive(Clone)]
pub struct AppState {
    storage: Arc<Mutex<Storage>>,
    images_dir: PathBuf,
    processing_delay: Duration,
    client: reqwest::Client,
}

/// Receiver server
pub struct ReceiverServer {
    config: ServerConfig,
    state: AppState,
}

impl ReceiverServer {
    /// Create a new server with the given configuration
    pub fn new(config: ServerConfig) -> Result<Self, ServiceError> {
        // Ensure data directory exists
        std::fs::create_dir_all(config.images_dir())?;
        let storage = Storage::open(config.db_path())?;

        let state = AppState {
            storage: Arc::new(Mutex::new(storage)),
            images_dir: config.images_dir(),
            processing_delay: config.processing_delay,
            client: reqwest::Client::new(),
        };

        Ok(Self { config, state })
    }

    /// Create a server with default configuration
    pub fn with_defaults() -> Result<Self, ServiceError> {
        Self::new(ServerConfig::default())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/receive-image", post(receive_image))
            .route("/api/task/{task_id}", get(task_status))
            .route("/api/status", get(status))
            .route("/api/images", get(list_images))
            .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
            .with_state(self.state.clone())
    }

    /// Serve on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServiceError> {
        info!("Receiver listening on {}", listener.local_addr()?);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    /// Bind the configured address and serve
    pub async fn run(self) -> Result<(), ServiceError> {
        let listener = TcpListener::bind(self.config.bind).await?;
        self.serve(listener).await
    }
}

async fn receive_image(
    State(state): State<AppState>,
    request: Result<Json<ReceiveRequest>, JsonRejection>,
) -> Response {
    let request = match request {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!("Rejected request body: {}", rejection.body_text());
            return (
                rejection.status(),
                Json(ReceiveResponse::error(&rejection.body_text())),
            )
                .into_response();
        }
    };

    let Some(image_data) = request.image_data.as_deref().filter(|data| !data.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ReceiveResponse::error("missing image data")),
        )
            .into_response();
    };

    let category = Category::from_request(request.category.as_deref());
    info!(
        "Received image from {} ({})",
        request.source.as_deref().unwrap_or("unknown source"),
        request.original_url.as_deref().unwrap_or("no url")
    );

    match save_image(&state, &request, image_data, category).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => {
            error!("Failed to save image: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ReceiveResponse::error(&format!("failed to save image: {}", e))),
            )
                .into_response()
        }
    }
}

async fn save_image(
    state: &AppState,
    request: &ReceiveRequest,
    image_data: &str,
    category: Category,
) -> Result<ReceiveResponse, ServiceError> {
    let payload = images::load(&state.client, image_data).await?;

    let image_id = Uuid::new_v4().to_string();
    let filename = images::file_name(category, &Local::now(), &image_id, payload.ext);
    let dir = state.images_dir.join(category.as_str());
    tokio::fs::create_dir_all(&dir).await?;
    tokio::fs::write(dir.join(&filename), &payload.bytes).await?;

    let file_size = payload.bytes.len() as u64;
    let (width, height) = tokio::task::spawn_blocking(move || images::dimensions(&payload.bytes))
        .await
        .unwrap_or((0, 0));

    let page_info = &request.page_info;
    let mut context_info = match page_info.get("imageContext") {
        Some(context @ serde_json::Value::Object(_)) => context.clone(),
        _ => serde_json::json!({}),
    };
    if let Some(context) = context_info.as_object_mut() {
        context.insert("category".to_string(), category.as_str().into());
    }

    let image = NewImage {
        id: image_id.clone(),
        filename: filename.clone(),
        category: category.as_str().to_string(),
        original_url: request.original_url.clone(),
        page_url: page_info.get("url").and_then(|v| v.as_str()).map(str::to_string),
        page_title: page_info.get("title").and_then(|v| v.as_str()).map(str::to_string),
        file_size,
        width,
        height,
        context_info,
    };

    let task_id = Uuid::new_v4().to_string();
    state.storage.lock().await.record_submission(&image, &task_id)?;
    info!("Saved {} ({}x{}, {} bytes) as task {}", filename, width, height, file_size, task_id);

    schedule_completion(state.clone(), task_id.clone());

    Ok(ReceiveResponse::accepted(task_id, image_id, filename, file_size, category))
}

fn schedule_completion(state: AppState, task_id: String) {
    tokio::spawn(async move {
        tokio::time::sleep(state.processing_delay).await;
        match state.storage.lock().await.update_task_status(&task_id, STATUS_COMPLETED) {
            Ok(true) => info!("Task {} completed", task_id),
            Ok(false) => warn!("Task {} vanished before completion", task_id),
            Err(e) => error!("Failed to complete task {}: {}", task_id, e),
        }
    });
}

async fn task_status(State(state): State<AppState>, Path(task_id): Path<String>) -> Response {
    let result = state.storage.lock().await.get_task(&task_id);
    match result {
        Ok(Some(task)) => {
            (StatusCode::OK, Json(TaskStatusResponse { status: task })).into_response()
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "task not found".to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to read task {}: {}", task_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse { error: e.to_string() }),
            )
                .into_response()
        }
    }
}

async fn status(State(state): State<AppState>) -> Response {
    let result = state.storage.lock().await.image_count();
    match result {
        Ok(total_images) => Json(StatusResponse {
            status: "running".to_string(),
            timestamp: Local::now().to_rfc3339(),
            total_images,
        })
        .into_response(),
        Err(e) => {
            error!("Failed to count images: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse { error: e.to_string() }),
            )
                .into_response()
        }
    }
}

async fn list_images(State(state): State<AppState>, Query(query): Query<ImagesQuery>) -> Response {
    let result = {
        let storage = state.storage.lock().await;
        storage
            .list_images(query.per_page(), query.offset())
            .and_then(|images| Ok((images, storage.image_count()?)))
    };

    match result {
        Ok((images, total)) => Json(ImageListResponse::new(images, total, query)).into_response(),
        Err(e) => {
            error!("Failed to list images: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse { error: e.to_string() }),
            )
                .into_response()
        }
    }
}
