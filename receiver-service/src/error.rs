//! Service errors

use crate::storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid data URI")]
    InvalidDataUri,
    #[error("download failed: {0}")]
    Download(#[from] reqwest::Error),
    #[error("download failed with status {0}")]
    DownloadStatus(u16),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
