//! Privileged side of the pipeline.
//!
//! For each trigger the coordinator makes sure a page extractor answers,
//! asks it for the image and its context, submits the result and, when
//! polling is enabled, hands the accepted task to a [`TaskPoller`]. Each
//! trigger produces at most one submission and at most one error
//! notification; nothing is retried beyond a single extractor reinstall.

use crate::config::{Settings, SettingsCache, SettingsStore};
use crate::error::{ConfigError, MessengerError, RelayError};
use crate::messenger::{ExtractorInstaller, Messenger, PageRequest, ResourcePayload};
use crate::notify::{notify_best_effort, Notifier, TITLE_FAILED, TITLE_SUBMITTED};
use crate::poller::{PollSchedule, PollState, ServiceStatusSource, TaskPoller};
use crate::submission::{ServerStatus, ServiceClient};
use crate::types::{
    AcquiredImage, AcquisitionStrategy, ContextId, PageInfo, SubmissionPageInfo, SubmissionRequest,
    TaskHandle, TriggerEvent, TriggerKind,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Timeouts and delays of the messenger exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorTimings {
    /// How long a probe may take before the extractor counts as absent
    pub probe_timeout: Duration,
    /// Wait after installing an extractor before talking to it
    pub settle_delay: Duration,
    /// Bound on the data request
    pub fetch_timeout: Duration,
}

impl Default for CoordinatorTimings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(1),
            settle_delay: Duration::from_secs(1),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of a trigger the service accepted
#[derive(Debug)]
pub struct TriggerOutcome {
    pub task: TaskHandle,
    pub strategy: AcquisitionStrategy,
    /// Only the locator and basic page info were sent
    pub degraded: bool,
    pub poller: Option<JoinHandle<PollState>>,
}

pub struct Coordinator {
    store: Arc<dyn SettingsStore>,
    settings: Arc<SettingsCache>,
    messenger: Arc<dyn Messenger>,
    installer: Arc<dyn ExtractorInstaller>,
    client: ServiceClient,
    notifier: Arc<dyn Notifier>,
    timings: CoordinatorTimings,
    schedule: PollSchedule,
}

impl Coordinator {
    /// Create a coordinator with default settings.
    ///
    /// Call [`Coordinator::on_startup`] to load stored ones.
    pub fn new(
        store: Arc<dyn SettingsStore>,
        messenger: Arc<dyn Messenger>,
        installer: Arc<dyn ExtractorInstaller>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            settings: Arc::new(SettingsCache::new(Settings::default())),
            messenger,
            installer,
            client: ServiceClient::new(),
            notifier,
            timings: CoordinatorTimings::default(),
            schedule: PollSchedule::default(),
        }
    }

    pub fn with_client(mut self, client: ServiceClient) -> Self {
        self.client = client;
        self
    }

    pub fn with_timings(mut self, timings: CoordinatorTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn with_schedule(mut self, schedule: PollSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Host started: load settings
    pub async fn on_startup(&self) {
        info!("Coordinator starting");
        self.settings.refresh(self.store.as_ref()).await;
    }

    /// Extension installed or updated: load settings
    pub async fn on_installed(&self) {
        info!("Coordinator installed");
        self.settings.refresh(self.store.as_ref()).await;
    }

    /// The store reported a change
    pub async fn on_settings_changed(&self) {
        self.settings.refresh(self.store.as_ref()).await;
    }

    /// Keep the cache in sync with the store until the returned task is aborted
    pub fn watch_settings(&self) -> JoinHandle<()> {
        self.settings.clone().spawn_refresh(self.store.clone())
    }

    /// Settings pushed by the options surface
    pub fn settings_updated(&self, values: Settings) -> Result<(), ConfigError> {
        values.validate()?;
        info!("Settings updated: {}", values.server_url());
        self.settings.apply(values);
        Ok(())
    }

    pub fn current_settings(&self) -> Arc<Settings> {
        self.settings.snapshot()
    }

    pub async fn check_server_connection(&self) -> ServerStatus {
        let settings = self.settings.snapshot();
        self.client.check_status(&settings.server_url()).await
    }

    /// Run the pipeline for one user trigger
    pub async fn handle_trigger(
        &self,
        trigger: TriggerEvent,
    ) -> Result<TriggerOutcome, RelayError> {
        if trigger.kind != TriggerKind::Image {
            debug!("Ignoring {:?} trigger", trigger.kind);
            return Err(RelayError::NotAnImage);
        }
        let locator = trigger
            .resource_locator
            .as_deref()
            .filter(|locator| !locator.is_empty())
            .ok_or(RelayError::MissingLocator)?;

        // One snapshot for the whole trigger
        let settings = self.settings.snapshot();
        let page_info = trigger.page_info();
        info!("Sending image {} from {}", locator, page_info.url);

        let (image, submission_page_info) = match self
            .request_page_data(trigger.context_id, locator, &page_info)
            .await
        {
            Ok(payload) => {
                if let Some(context) = payload.page_info.context() {
                    debug!(
                        "Page context found: {} ({})",
                        context.context_found,
                        payload.image.strategy.as_str()
                    );
                }
                (payload.image, payload.page_info)
            }
            Err(e) => {
                warn!(
                    "Page context {} gave no data ({}), sending the locator only",
                    trigger.context_id, e
                );
                (
                    AcquiredImage::passthrough(locator),
                    SubmissionPageInfo::basic(page_info.clone()),
                )
            }
        };

        let strategy = image.strategy;
        let degraded = image.is_degraded();
        let request =
            SubmissionRequest::new(image.image_data, locator.to_string(), submission_page_info);

        let server_url = settings.server_url();
        let task = match self.client.submit(&server_url, &request).await {
            Ok(task) => task,
            Err(e) => {
                if e.is_network() {
                    error!("Submission failed, no response from {}: {}", server_url, e);
                } else {
                    error!("Submission failed: {}", e);
                }
                notify_best_effort(self.notifier.as_ref(), &settings, TITLE_FAILED, &e.to_string());
                return Err(e.into());
            }
        };

        let page_name = if page_info.title.is_empty() {
            page_info.url.as_str()
        } else {
            page_info.title.as_str()
        };
        notify_best_effort(
            self.notifier.as_ref(),
            &settings,
            TITLE_SUBMITTED,
            &format!("From: {}\nTask: {}", page_name, task.task_id),
        );

        let poller = if settings.polling_enabled {
            let source = ServiceStatusSource::new(self.client.clone(), server_url);
            let poller = TaskPoller::new(
                Arc::new(source),
                self.notifier.clone(),
                self.settings.clone(),
                self.schedule,
            );
            Some(poller.spawn(task.clone()))
        } else {
            None
        };

        Ok(TriggerOutcome {
            task,
            strategy,
            degraded,
            poller,
        })
    }

    /// Probe, reinstall once if needed, then ask for the data exactly once
    async fn request_page_data(
        &self,
        context: ContextId,
        locator: &str,
        page_info: &PageInfo,
    ) -> Result<ResourcePayload, MessengerError> {
        let probe = timeout(
            self.timings.probe_timeout,
            self.messenger.send(context, PageRequest::Probe),
        )
        .await;

        let alive = matches!(&probe, Ok(Ok(response)) if response.success);
        if !alive {
            debug!("No extractor answered in {}, installing", context);
            self.installer.install(context).await?;
            tokio::time::sleep(self.timings.settle_delay).await;
        }

        let request = PageRequest::FetchResourceData {
            locator: locator.to_string(),
            page_info: page_info.clone(),
        };
        let response = timeout(self.timings.fetch_timeout, self.messenger.send(context, request))
            .await
            .map_err(|_| MessengerError::Timeout(context, self.timings.fetch_timeout))??;

        response.into_payload()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemorySettingsStore;
    use crate::messenger::InProcessHost;
    use crate::notify::RecordingNotifier;

    fn coordinator(notifier: Arc<RecordingNotifier>) -> Coordinator {
        let host = Arc::new(InProcessHost::new(|_| None));
        Coordinator::new(
            Arc::new(MemorySettingsStore::new()),
            host.clone(),
            host,
            notifier,
        )
    }

    #[tokio::test]
    async fn test_non_image_trigger_is_rejected_quietly() {
        let notifier = Arc::new(RecordingNotifier::new());
        let mut trigger = TriggerEvent::image(ContextId(1), "https://x/a.png", "https://x/", "X");
        trigger.kind = TriggerKind::Link;

        let result = coordinator(notifier.clone()).handle_trigger(trigger).await;
        assert!(matches!(result, Err(RelayError::NotAnImage)));
        assert!(notifier.shown().is_empty());
    }

    #[tokio::test]
    async fn test_missing_locator() {
        let notifier = Arc::new(RecordingNotifier::new());
        let mut trigger = TriggerEvent::image(ContextId(1), "", "https://x/", "X");
        let result = coordinator(notifier.clone()).handle_trigger(trigger.clone()).await;
        assert!(matches!(result, Err(RelayError::MissingLocator)));

        trigger.resource_locator = None;

        let result = coordinator(notifier).handle_trigger(trigger).await;
        assert!(matches!(result, Err(RelayError::MissingLocator)));
    }

    #[tokio::test]
    async fn test_settings_updated_validates() {
        let coordinator = coordinator(Arc::new(RecordingNotifier::new()));
        let bad = Settings {
            server_port: 80,
            ..Settings::default()
        };
        assert!(coordinator.settings_updated(bad).is_err());
        assert_eq!(coordinator.current_settings().server_port, 8080);

        let good = Settings {
            server_port: 9000,
            ..Settings::default()
        };
        coordinator.settings_updated(good).unwrap();
        assert_eq!(coordinator.current_settings().server_port, 9000);
    }

    #[tokio::test]
    async fn test_startup_loads_store() {
        let store = Arc::new(MemorySettingsStore::with_values(Settings {
            server_host: "127.0.0.1".to_string(),
            ..Settings::default()
        }));
        let host = Arc::new(InProcessHost::new(|_| None));
        let coordinator =
            Coordinator::new(store, host.clone(), host, Arc::new(RecordingNotifier::new()));

        coordinator.on_startup().await;
        assert_eq!(coordinator.current_settings().server_url(), "http://127.0.0.1:8080");
    }
}
