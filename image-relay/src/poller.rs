//! Follow an accepted task until it finishes or the attempt budget runs out.
//!
//! The machine starts in `Pending`, waits an initial delay and then polls at
//! a fixed interval. `completed` and `failed` are terminal and notified;
//! every other answer, including transport and HTTP errors, uses up one
//! attempt. When the budget is spent the machine is `Abandoned` without
//! telling the user.

use crate::config::SettingsCache;
use crate::error::SubmitError;
use crate::notify::{notify_best_effort, Notifier, TITLE_COMPLETED, TITLE_TASK_FAILED};
use crate::submission::ServiceClient;
use crate::types::{TaskHandle, TaskStatus};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Timing and budget of the poller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub initial_delay: Duration,
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            interval: Duration::from_millis(2000),
            max_attempts: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Pending { attempts: u32 },
    Completed,
    Failed,
    Abandoned,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollState::Pending { .. })
    }
}

/// Apply one poll result. `None` stands for a poll that produced no status.
pub fn advance(state: PollState, observed: Option<&TaskStatus>, max_attempts: u32) -> PollState {
    let PollState::Pending { attempts } = state else {
        return state;
    };

    match observed {
        Some(TaskStatus::Completed) => PollState::Completed,
        Some(TaskStatus::Failed) => PollState::Failed,
        _ => {
            let attempts = attempts + 1;
            if attempts >= max_attempts {
                PollState::Abandoned
            } else {
                PollState::Pending { attempts }
            }
        }
    }
}

/// Where task status comes from
#[async_trait]
pub trait TaskStatusSource: Send + Sync {
    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, SubmitError>;
}

/// Status from the processing service; the URL is fixed when polling starts
pub struct ServiceStatusSource {
    client: ServiceClient,
    server_url: String,
}

impl ServiceStatusSource {
    pub fn new(client: ServiceClient, server_url: impl Into<String>) -> Self {
        Self {
            client,
            server_url: server_url.into(),
        }
    }
}

#[async_trait]
impl TaskStatusSource for ServiceStatusSource {
    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, SubmitError> {
        self.client.task_status(&self.server_url, task_id).await
    }
}

#[derive(Clone)]
pub struct TaskPoller {
    source: Arc<dyn TaskStatusSource>,
    notifier: Arc<dyn Notifier>,
    settings: Arc<SettingsCache>,
    schedule: PollSchedule,
}

impl TaskPoller {
    pub fn new(
        source: Arc<dyn TaskStatusSource>,
        notifier: Arc<dyn Notifier>,
        settings: Arc<SettingsCache>,
        schedule: PollSchedule,
    ) -> Self {
        Self {
            source,
            notifier,
            settings,
            schedule,
        }
    }

    /// Poll until a terminal state
    pub async fn run(&self, task: TaskHandle) -> PollState {
        let mut state = PollState::Pending { attempts: 0 };
        tokio::time::sleep(self.schedule.initial_delay).await;

        loop {
            let observed = match self.source.task_status(&task.task_id).await {
                Ok(status) => Some(status),
                Err(e) => {
                    debug!("Status check for task {} failed: {}", task.task_id, e);
                    None
                }
            };

            state = advance(state, observed.as_ref(), self.schedule.max_attempts);
            match state {
                PollState::Pending { attempts } => {
                    debug!(
                        "Task {} still {:?} after {} checks",
                        task.task_id, observed, attempts
                    );
                    tokio::time::sleep(self.schedule.interval).await;
                }
                PollState::Completed => {
                    info!("✅ Task {} completed", task.task_id);
                    self.notify(TITLE_COMPLETED, &format!("Task {} finished", task.task_id));
                    return state;
                }
                PollState::Failed => {
                    info!("❌ Task {} failed", task.task_id);
                    self.notify(TITLE_TASK_FAILED, &format!("Task {} failed", task.task_id));
                    return state;
                }
                PollState::Abandoned => {
                    debug!(
                        "Stopped following task {} after {} checks",
                        task.task_id, self.schedule.max_attempts
                    );
                    return state;
                }
            }
        }
    }

    /// Run on its own task
    pub fn spawn(self, task: TaskHandle) -> JoinHandle<PollState> {
        tokio::spawn(async move { self.run(task).await })
    }

    fn notify(&self, title: &str, message: &str) {
        let settings = self.settings.snapshot();
        notify_best_effort(self.notifier.as_ref(), &settings, title, message);
    }
}
