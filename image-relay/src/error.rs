//! Error types for each stage of the relay pipeline.

use crate::types::ContextId;
use std::time::Duration;

/// Errors crossing the boundary between coordinator and page context
#[derive(Debug, thiserror::Error)]
pub enum MessengerError {
    #[error("page context {0} is unreachable")]
    Unreachable(ContextId),

    #[error("page context {0} did not answer within {1:?}")]
    Timeout(ContextId, Duration),

    #[error("page context rejected the request: {0}")]
    Rejected(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure of a single acquisition strategy
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error("image failed to load: {0}")]
    Load(String),

    #[error("cross-origin image without CORS approval: {0}")]
    Tainted(String),

    #[error("HTTP {0}")]
    Http(u16),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("image decode error: {0}")]
    Decode(#[from] image::ImageError),

    #[error("invalid data URI")]
    InvalidDataUri,
}

/// Failure while reading the page structure
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("document unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid document snapshot: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors talking to the local processing service
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(
        "cannot connect to server {server_url}; check the settings and that the service is running"
    )]
    ConnectionFailed {
        server_url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("server responded with status {0}")]
    Server(u16),

    #[error("{0}")]
    Application(String),
}

impl SubmitError {
    /// Classify a transport error, naming the server when it refused the connection
    pub fn from_transport(error: reqwest::Error, server_url: &str) -> Self {
        if error.is_connect() {
            SubmitError::ConnectionFailed {
                server_url: server_url.to_string(),
                source: error,
            }
        } else {
            SubmitError::Network(error)
        }
    }

    /// True for failures where no HTTP response was received
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            SubmitError::ConnectionFailed { .. } | SubmitError::Network(_)
        )
    }
}

/// Invalid or unreadable settings
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("port must be an integer between 1000 and 65535, got {0:?}")]
    InvalidPort(String),

    #[error("invalid server host: {0:?}")]
    InvalidHost(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// A notification could not be displayed
#[derive(Debug, thiserror::Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Errors that end the pipeline for a trigger
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("trigger is not an image trigger")]
    NotAnImage,

    #[error("trigger carries no image locator")]
    MissingLocator,

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
