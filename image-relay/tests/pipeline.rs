//! End-to-end behaviour of the coordinator against a local service

use async_trait::async_trait;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{ImageFormat, Rgb, RgbImage};
use image_relay::notify::{TITLE_COMPLETED, TITLE_FAILED, TITLE_SUBMITTED};
use image_relay::{
    AcquisitionStrategy, ConfigError, ContextId, Coordinator, CoordinatorTimings, DocumentSnapshot,
    ExtractorInstaller, FileSettingsStore, InProcessHost, MemorySettingsStore, Messenger,
    MessengerError, PageAgent, PageRequest, PageResponse, PollSchedule, PollState,
    RecordingNotifier, RelayError, Settings, SettingsStore, SettingsUpdate, SubmitError,
    TriggerEvent,
};
use pretty_assertions::assert_eq;
use receiver_service::{ReceiverServer, ServerConfig};
use serde_json::{json, Value};
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

const PAGE_URL: &str = "https://shop.example.com/jackets";
const PAGE_TITLE: &str = "Jackets";

fn png_data_uri() -> String {
    let mut buffer = Cursor::new(Vec::new());
    RgbImage::from_pixel(8, 8, Rgb([200, 40, 40]))
        .write_to(&mut buffer, ImageFormat::Png)
        .unwrap();
    format!("data:image/png;base64,{}", STANDARD.encode(buffer.into_inner()))
}

fn page_agent(locator: &str) -> PageAgent {
    let snapshot = DocumentSnapshot::from_json(
        &json!({
            "url": PAGE_URL,
            "title": PAGE_TITLE,
            "images": [{
                "src": locator,
                "alt": "Red jacket",
                "parent": { "tagName": "FIGURE", "textContent": "Red jacket, 89 EUR" }
            }]
        })
        .to_string(),
    )
    .unwrap();
    PageAgent::for_document(snapshot, reqwest::Client::new())
}

fn fast_timings() -> CoordinatorTimings {
    CoordinatorTimings {
        probe_timeout: Duration::from_millis(500),
        settle_delay: Duration::from_millis(10),
        fetch_timeout: Duration::from_secs(5),
    }
}

fn fast_schedule() -> PollSchedule {
    PollSchedule {
        initial_delay: Duration::from_millis(20),
        interval: Duration::from_millis(50),
        max_attempts: 40,
    }
}

fn settings_for(port: u16, polling_enabled: bool) -> Settings {
    Settings {
        server_host: "127.0.0.1".to_string(),
        server_port: port,
        polling_enabled,
        ..Settings::default()
    }
}

/// Counts every request kind that reaches the page side
struct CountingHost {
    inner: InProcessHost,
    probes: AtomicUsize,
    fetches: AtomicUsize,
    installs: AtomicUsize,
}

impl CountingHost {
    fn new(inner: InProcessHost) -> Self {
        Self {
            inner,
            probes: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            installs: AtomicUsize::new(0),
        }
    }

    fn counts(&self) -> (usize, usize, usize) {
        (
            self.probes.load(Ordering::SeqCst),
            self.installs.load(Ordering::SeqCst),
            self.fetches.load(Ordering::SeqCst),
        )
    }
}

#[async_trait]
impl Messenger for CountingHost {
    async fn send(
        &self,
        context: ContextId,
        request: PageRequest,
    ) -> Result<PageResponse, MessengerError> {
        match request {
            PageRequest::Probe => self.probes.fetch_add(1, Ordering::SeqCst),
            PageRequest::FetchResourceData { .. } => self.fetches.fetch_add(1, Ordering::SeqCst),
        };
        self.inner.send(context, request).await
    }
}

#[async_trait]
impl ExtractorInstaller for CountingHost {
    async fn install(&self, context: ContextId) -> Result<(), MessengerError> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        self.inner.install(context).await
    }
}

/// Scripted stand-in for the processing service
#[derive(Default)]
struct ScriptedService {
    submissions: Mutex<Vec<Value>>,
}

impl ScriptedService {
    fn submissions(&self) -> Vec<Value> {
        self.submissions.lock().unwrap().clone()
    }
}

async fn scripted_receive(
    State(service): State<Arc<ScriptedService>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    service.submissions.lock().unwrap().push(body);
    Json(json!({ "success": true, "taskId": "t1" }))
}

async fn scripted_task() -> Json<Value> {
    Json(json!({ "status": { "status": "completed" } }))
}

async fn start_scripted_service() -> (Arc<ScriptedService>, u16) {
    let service = Arc::new(ScriptedService::default());
    let app = Router::new()
        .route("/api/receive-image", post(scripted_receive))
        .route("/api/task/{task_id}", get(scripted_task))
        .with_state(service.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move { axum::serve(listener, app).await });
    (service, port)
}

async fn coordinator(
    settings: Settings,
    host: Arc<CountingHost>,
    notifier: Arc<RecordingNotifier>,
) -> Coordinator {
    let store = Arc::new(MemorySettingsStore::with_values(settings));
    let coordinator = Coordinator::new(store, host.clone(), host, notifier)
        .with_timings(fast_timings())
        .with_schedule(fast_schedule());
    coordinator.on_startup().await;
    coordinator
}

#[tokio::test]
async fn test_reachable_extractor_submits_once() {
    let (service, port) = start_scripted_service().await;
    let locator = png_data_uri();

    let host = Arc::new(CountingHost::new(InProcessHost::new(|_| None)));
    host.inner.attach(ContextId(1), page_agent(&locator)).await;
    let notifier = Arc::new(RecordingNotifier::new());
    let coordinator = coordinator(settings_for(port, false), host.clone(), notifier.clone()).await;

    let outcome = coordinator
        .handle_trigger(TriggerEvent::image(ContextId(1), &locator, PAGE_URL, PAGE_TITLE))
        .await
        .unwrap();

    assert_eq!(outcome.task.task_id, "t1");
    assert_eq!(outcome.strategy, AcquisitionStrategy::Rasterized);
    assert!(!outcome.degraded);
    assert!(outcome.poller.is_none());
    assert_eq!(host.counts(), (1, 0, 1));

    let submissions = service.submissions();
    assert_eq!(submissions.len(), 1);
    let body = &submissions[0];
    assert!(body["imageData"].as_str().unwrap().starts_with("data:image/jpeg;base64,"));
    assert_eq!(body["originalUrl"], json!(locator));
    assert_eq!(body["source"], json!("browser-extension"));
    assert_eq!(body["pageInfo"]["title"], json!(PAGE_TITLE));
    assert_eq!(body["pageInfo"]["contextFound"], json!(true));
    assert_eq!(body["pageInfo"]["imageContext"]["altText"], json!("Red jacket"));
    assert_eq!(body["pageInfo"]["imageContext"]["parentTagName"], json!("FIGURE"));

    let shown = notifier.shown();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].0, TITLE_SUBMITTED);
    assert!(shown[0].1.contains("t1"));
    assert!(shown[0].1.contains(PAGE_TITLE));
}

#[tokio::test]
async fn test_absent_extractor_is_installed_once() {
    let (service, port) = start_scripted_service().await;
    let locator = png_data_uri();

    let agent_locator = locator.clone();
    let host = Arc::new(CountingHost::new(InProcessHost::new(move |_| {
        Some(page_agent(&agent_locator))
    })));
    let notifier = Arc::new(RecordingNotifier::new());
    let coordinator = coordinator(settings_for(port, false), host.clone(), notifier.clone()).await;

    let outcome = coordinator
        .handle_trigger(TriggerEvent::image(ContextId(4), &locator, PAGE_URL, PAGE_TITLE))
        .await
        .unwrap();

    assert!(!outcome.degraded);
    assert_eq!(host.counts(), (1, 1, 1));
    assert_eq!(service.submissions().len(), 1);
    assert_eq!(notifier.shown().len(), 1);
}

#[tokio::test]
async fn test_uninstallable_page_sends_locator_only() {
    let (service, port) = start_scripted_service().await;
    let host = Arc::new(CountingHost::new(InProcessHost::new(|_| None)));
    let notifier = Arc::new(RecordingNotifier::new());
    let coordinator = coordinator(settings_for(port, false), host.clone(), notifier.clone()).await;

    let locator = "https://cdn.example.com/jacket.png";
    let outcome = coordinator
        .handle_trigger(TriggerEvent::image(ContextId(2), locator, PAGE_URL, PAGE_TITLE))
        .await
        .unwrap();

    assert!(outcome.degraded);
    assert_eq!(outcome.strategy, AcquisitionStrategy::Passthrough);
    // The failed install ends the exchange before any data request
    assert_eq!(host.counts(), (1, 1, 0));

    let submissions = service.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0]["imageData"], json!(locator));
    assert_eq!(
        submissions[0]["pageInfo"],
        json!({ "url": PAGE_URL, "title": PAGE_TITLE })
    );
}

#[tokio::test]
async fn test_refused_connection_notifies_once() {
    // Bind and drop to get a port nothing listens on
    let port = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let locator = png_data_uri();
    let host = Arc::new(CountingHost::new(InProcessHost::new(|_| None)));
    host.inner.attach(ContextId(1), page_agent(&locator)).await;
    let notifier = Arc::new(RecordingNotifier::new());
    let settings = settings_for(port, true);
    let server_url = settings.server_url();
    let coordinator = coordinator(settings, host, notifier.clone()).await;

    let result = coordinator
        .handle_trigger(TriggerEvent::image(ContextId(1), &locator, PAGE_URL, PAGE_TITLE))
        .await;

    match result {
        Err(RelayError::Submit(SubmitError::ConnectionFailed { server_url: url, .. })) => {
            assert_eq!(url, server_url)
        }
        other => panic!("expected a connection failure, got {:?}", other.map(|o| o.task)),
    }

    let shown = notifier.shown();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].0, TITLE_FAILED);
    assert!(shown[0].1.contains(&server_url));
}

#[tokio::test]
async fn test_notifications_disabled_stays_quiet() {
    let (service, port) = start_scripted_service().await;
    let host = Arc::new(CountingHost::new(InProcessHost::new(|_| None)));
    let notifier = Arc::new(RecordingNotifier::new());
    let settings = Settings {
        notifications_enabled: false,
        ..settings_for(port, false)
    };
    let coordinator = coordinator(settings, host, notifier.clone()).await;

    coordinator
        .handle_trigger(TriggerEvent::image(ContextId(1), "https://x/a.png", PAGE_URL, PAGE_TITLE))
        .await
        .unwrap();

    assert_eq!(service.submissions().len(), 1);
    assert!(notifier.shown().is_empty());
}

#[tokio::test]
async fn test_low_port_is_rejected_and_nothing_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSettingsStore::new(dir.path().join("settings.toml"));
    let saved = settings_for(9000, true);
    store.set(&saved).await.unwrap();

    let update = SettingsUpdate {
        server_port: Some("80".to_string()),
        ..SettingsUpdate::default()
    };
    let current = store.get(&Settings::default()).await.unwrap();
    assert!(matches!(update.apply_to(&current), Err(ConfigError::InvalidPort(_))));

    let direct = Settings {
        server_port: 80,
        ..saved.clone()
    };
    assert!(store.set(&direct).await.is_err());
    assert_eq!(store.get(&Settings::default()).await.unwrap(), saved);
}

#[tokio::test]
async fn test_settings_change_reaches_coordinator() {
    let store = Arc::new(MemorySettingsStore::new());
    let host = Arc::new(InProcessHost::new(|_| None));
    let coordinator =
        Coordinator::new(store.clone(), host.clone(), host, Arc::new(RecordingNotifier::new()));
    coordinator.on_installed().await;
    let watcher = coordinator.watch_settings();

    store.set(&settings_for(9123, true)).await.unwrap();

    let mut port = 0;
    for _ in 0..50 {
        port = coordinator.current_settings().server_port;
        if port == 9123 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    watcher.abort();
    assert_eq!(port, 9123);
}

#[tokio::test]
async fn test_submission_completes_against_receiver() {
    let dir = tempfile::tempdir().unwrap();
    let receiver = ReceiverServer::new(ServerConfig {
        bind: SocketAddr::from(([127, 0, 0, 1], 0)),
        data_dir: dir.path().to_path_buf(),
        processing_delay: Duration::from_millis(100),
    })
    .unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(receiver.serve(listener));

    let locator = png_data_uri();
    let host = Arc::new(CountingHost::new(InProcessHost::new(|_| None)));
    host.inner.attach(ContextId(1), page_agent(&locator)).await;
    let notifier = Arc::new(RecordingNotifier::new());
    let coordinator = coordinator(settings_for(port, true), host, notifier.clone()).await;

    let status = coordinator.check_server_connection().await;
    assert!(status.connected);

    let outcome = coordinator
        .handle_trigger(TriggerEvent::image(ContextId(1), &locator, PAGE_URL, PAGE_TITLE))
        .await
        .unwrap();
    let final_state = outcome.poller.unwrap().await.unwrap();
    assert_eq!(final_state, PollState::Completed);

    let titles: Vec<String> = notifier.shown().into_iter().map(|(title, _)| title).collect();
    assert_eq!(titles, vec![TITLE_SUBMITTED.to_string(), TITLE_COMPLETED.to_string()]);

    // Rasterized payloads are JPEG
    let saved: Vec<_> = std::fs::read_dir(dir.path().join("images").join("clothes"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(saved.len(), 1);
    assert!(saved[0].ends_with(".jpg"));
}
