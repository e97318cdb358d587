//! Receiver Service Library
//!
//! A local service that accepts images sent by the relay, files them by
//! category, records them in SQLite and tracks a processing task for each.

pub mod error;
pub mod images;
pub mod payload;
pub mod server;
pub mod storage;

pub use error::ServiceError;
pub use payload::{
    Category, ImageListResponse, ImagesQuery, ReceiveRequest, ReceiveResponse, StatusResponse,
    TaskStatusResponse,
};
pub use server::{ReceiverServer, ServerConfig};
pub use storage::{ImageRecord, Storage, StorageError, TaskRecord};
