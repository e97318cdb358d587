//! HTTP client for the local processing service.

use crate::config::{parse_port, DEFAULT_HOST};
use crate::error::{ConfigError, SubmitError};
use crate::types::{SubmissionRequest, TaskHandle, TaskStatus};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const STATUS_CHECK_TIMEOUT: Duration = Duration::from_secs(3);
pub const CONNECTION_TEST_TIMEOUT: Duration = Duration::from_secs(5);

const GENERIC_FAILURE: &str = "server failed to process the image";

#[derive(Debug, Deserialize)]
struct ReceiveResponse {
    #[serde(default)]
    success: bool,
    #[serde(rename = "taskId")]
    task_id: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskEnvelope {
    status: TaskRecord,
}

#[derive(Debug, Deserialize)]
struct TaskRecord {
    status: String,
}

/// Result of the reachability check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub connected: bool,
    pub server_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of testing a host/port before saving it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTest {
    Connected,
    HttpStatus(u16),
    TimedOut,
    Failed(String),
}

impl ConnectionTest {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionTest::Connected)
    }
}

impl fmt::Display for ConnectionTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionTest::Connected => write!(f, "connected"),
            ConnectionTest::HttpStatus(status) => {
                write!(f, "server responded with status {}", status)
            }
            ConnectionTest::TimedOut => write!(f, "connection timed out"),
            ConnectionTest::Failed(reason) => write!(f, "connection failed: {}", reason),
        }
    }
}

/// Client for the service's `/api` endpoints
#[derive(Debug, Clone)]
pub struct ServiceClient {
    client: Client,
}

impl ServiceClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .user_agent(concat!("image-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    /// POST a submission; a task handle is returned only when the service accepted it
    pub async fn submit(
        &self,
        server_url: &str,
        request: &SubmissionRequest,
    ) -> Result<TaskHandle, SubmitError> {
        let url = endpoint(server_url, "/api/receive-image");
        debug!("Submitting {} to {}", request.original_url, url);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| SubmitError::from_transport(e, server_url))?;

        let status = response.status();
        if !status.is_success() {
            warn!("Service rejected submission with status {}", status);
            return Err(SubmitError::Server(status.as_u16()));
        }

        let body: ReceiveResponse = response
            .json()
            .await
            .map_err(|e| SubmitError::Application(format!("invalid response from server: {}", e)))?;

        if !body.success {
            return Err(SubmitError::Application(
                body.error.unwrap_or_else(|| GENERIC_FAILURE.to_string()),
            ));
        }

        let task_id = body.task_id.ok_or_else(|| {
            SubmitError::Application("server accepted the image without a task id".to_string())
        })?;

        info!("📤 Submission accepted as task {}", task_id);
        Ok(TaskHandle::new(task_id))
    }

    /// GET the current status of a task
    pub async fn task_status(
        &self,
        server_url: &str,
        task_id: &str,
    ) -> Result<TaskStatus, SubmitError> {
        let url = endpoint(server_url, &format!("/api/task/{}", task_id));

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SubmitError::from_transport(e, server_url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SubmitError::Server(status.as_u16()));
        }

        let envelope: TaskEnvelope = response
            .json()
            .await
            .map_err(|e| SubmitError::Application(format!("invalid task status: {}", e)))?;

        Ok(TaskStatus::from_wire(&envelope.status.status))
    }

    /// Quick reachability check of `/api/status`
    pub async fn check_status(&self, server_url: &str) -> ServerStatus {
        let url = endpoint(server_url, "/api/status");

        let result = self.client.get(&url).timeout(STATUS_CHECK_TIMEOUT).send().await;
        let error = match result {
            Ok(response) if response.status().is_success() => None,
            Ok(response) => Some(format!(
                "server responded with status {}",
                response.status().as_u16()
            )),
            Err(e) => Some(e.to_string()),
        };

        ServerStatus {
            connected: error.is_none(),
            server_url: server_url.to_string(),
            error,
        }
    }

    /// Try a host/port pair that has not been saved yet
    pub async fn test_connection(
        &self,
        host: &str,
        port: &str,
    ) -> Result<ConnectionTest, ConfigError> {
        let port = parse_port(port)?;
        let host = match host.trim() {
            "" => DEFAULT_HOST,
            host => host,
        };
        let url = endpoint(&format!("http://{}:{}", host, port), "/api/status");

        let outcome = match self.client.get(&url).timeout(CONNECTION_TEST_TIMEOUT).send().await {
            Ok(response) if response.status().is_success() => ConnectionTest::Connected,
            Ok(response) => ConnectionTest::HttpStatus(response.status().as_u16()),
            Err(e) if e.is_timeout() => ConnectionTest::TimedOut,
            Err(e) => ConnectionTest::Failed(e.to_string()),
        };

        debug!("Connection test for {}: {}", url, outcome);
        Ok(outcome)
    }
}

impl Default for ServiceClient {
    fn default() -> Self {
        Self::new()
    }
}

fn endpoint(server_url: &str, path: &str) -> String {
    format!("{}{}", server_url.trim_end_matches('/'), path)
}
