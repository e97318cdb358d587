//! ProcessHost driving the real page-agent binary

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{ImageFormat, Rgb, RgbImage};
use image_relay::{
    AcquisitionStrategy, ContextId, Coordinator, CoordinatorTimings, ExtractorInstaller,
    MemorySettingsStore, Messenger, MessengerError, PageInfo, PageRegistration, PageRequest,
    PageResponse, ProcessHost, RecordingNotifier, Settings, TriggerEvent,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

const PAGE_TITLE: &str = "Jackets";

fn png_bytes() -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    RgbImage::from_pixel(8, 8, Rgb([40, 120, 40]))
        .write_to(&mut buffer, ImageFormat::Png)
        .unwrap();
    buffer.into_inner()
}

fn png_data_uri() -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png_bytes()))
}

fn agent_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_page-agent"))
}

fn page_info(url: &str) -> PageInfo {
    PageInfo {
        url: url.to_string(),
        title: PAGE_TITLE.to_string(),
        fav_icon_url: None,
    }
}

/// Write a document snapshot that describes `locator` as a captioned image
fn write_document(dir: &Path, page_url: &str, locator: &str) -> PathBuf {
    let path = dir.join("document.json");
    let document = json!({
        "url": page_url,
        "title": PAGE_TITLE,
        "images": [{
            "src": locator,
            "alt": "Green jacket",
            "parent": { "tagName": "FIGURE", "textContent": "Green jacket, 59 EUR" }
        }]
    });
    std::fs::write(&path, document.to_string()).unwrap();
    path
}

async fn host_for(page_url: &str, document: Option<PathBuf>) -> Arc<ProcessHost> {
    let host = Arc::new(ProcessHost::with_path(agent_binary()));
    host.register(
        ContextId(1),
        PageRegistration {
            url: page_url.to_string(),
            title: PAGE_TITLE.to_string(),
            document,
        },
    )
    .await;
    host
}

/// Image server whose `/slow.png` answers well after any short deadline
async fn start_image_server() -> String {
    let app = Router::new()
        .route(
            "/slow.png",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(4)).await;
                ([("content-type", "image/png")], png_bytes())
            }),
        )
        .route(
            "/fast.png",
            get(|| async { ([("content-type", "image/png")], png_bytes()) }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move { axum::serve(listener, app).await });
    base
}

#[derive(Default)]
struct ScriptedService {
    submissions: Mutex<Vec<Value>>,
}

async fn scripted_receive(
    State(service): State<Arc<ScriptedService>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    service.submissions.lock().unwrap().push(body);
    Json(json!({ "success": true, "taskId": "t1" }))
}

async fn start_scripted_service() -> (Arc<ScriptedService>, u16) {
    let service = Arc::new(ScriptedService::default());
    let app = Router::new()
        .route("/api/receive-image", post(scripted_receive))
        .with_state(service.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move { axum::serve(listener, app).await });
    (service, port)
}

async fn coordinator(port: u16, host: Arc<ProcessHost>, fetch_timeout: Duration) -> Coordinator {
    let store = Arc::new(MemorySettingsStore::with_values(Settings {
        server_host: "127.0.0.1".to_string(),
        server_port: port,
        polling_enabled: false,
        ..Settings::default()
    }));
    let notifier = Arc::new(RecordingNotifier::new());
    let coordinator = Coordinator::new(store, host.clone(), host, notifier)
        .with_timings(CoordinatorTimings {
            probe_timeout: Duration::from_secs(2),
            settle_delay: Duration::from_millis(100),
            fetch_timeout,
        });
    coordinator.on_startup().await;
    coordinator
}

#[tokio::test]
async fn test_agent_answers_and_stops_on_unregister() {
    let dir = TempDir::new().unwrap();
    let page_url = "https://shop.example.com/jackets";
    let locator = png_data_uri();
    let document = write_document(dir.path(), page_url, &locator);
    let host = host_for(page_url, Some(document)).await;
    assert_eq!(host.binary_path(), agent_binary().as_path());

    assert!(matches!(
        host.send(ContextId(1), PageRequest::Probe).await,
        Err(MessengerError::Unreachable(ContextId(1)))
    ));

    host.install(ContextId(1)).await.unwrap();
    assert_eq!(
        host.send(ContextId(1), PageRequest::Probe).await.unwrap(),
        PageResponse::pong()
    );

    let response = host
        .send(
            ContextId(1),
            PageRequest::FetchResourceData {
                locator: locator.clone(),
                page_info: page_info(page_url),
            },
        )
        .await
        .unwrap();
    let payload = response.into_payload().unwrap();
    assert_eq!(payload.image.strategy, AcquisitionStrategy::Rasterized);
    assert!(payload.image.image_data.starts_with("data:image/jpeg;base64,"));
    let context = payload.page_info.context().unwrap();
    assert!(context.context_found);
    assert_eq!(context.image_context.as_ref().unwrap().alt_text, "Green jacket");

    host.unregister(ContextId(1)).await;
    assert!(matches!(
        host.send(ContextId(1), PageRequest::Probe).await,
        Err(MessengerError::Unreachable(ContextId(1)))
    ));
    // Forgotten pages cannot be reinstalled
    assert!(matches!(
        host.install(ContextId(1)).await,
        Err(MessengerError::Unreachable(ContextId(1)))
    ));
}

#[tokio::test]
async fn test_abandoned_fetch_does_not_answer_next_request() {
    let base = start_image_server().await;
    let host = host_for(&base, None).await;
    host.install(ContextId(1)).await.unwrap();

    let slow = host.send(
        ContextId(1),
        PageRequest::FetchResourceData {
            locator: format!("{}/slow.png", base),
            page_info: page_info(&base),
        },
    );
    assert!(tokio::time::timeout(Duration::from_millis(200), slow).await.is_err());

    // The late reply to the abandoned fetch must never be read as this answer
    assert!(matches!(
        host.send(ContextId(1), PageRequest::Probe).await,
        Err(MessengerError::Unreachable(ContextId(1)))
    ));

    host.install(ContextId(1)).await.unwrap();
    assert_eq!(
        host.send(ContextId(1), PageRequest::Probe).await.unwrap(),
        PageResponse::pong()
    );
    let response = host
        .send(
            ContextId(1),
            PageRequest::FetchResourceData {
                locator: format!("{}/fast.png", base),
                page_info: page_info(&base),
            },
        )
        .await
        .unwrap();
    assert_eq!(
        response.into_payload().unwrap().image.strategy,
        AcquisitionStrategy::Rasterized
    );
}

#[tokio::test]
async fn test_coordinator_installs_real_agent_and_submits() {
    let (service, port) = start_scripted_service().await;
    let dir = TempDir::new().unwrap();
    let page_url = "https://shop.example.com/jackets";
    let locator = png_data_uri();
    let document = write_document(dir.path(), page_url, &locator);
    let host = host_for(page_url, Some(document)).await;
    let coordinator = coordinator(port, host, Duration::from_secs(10)).await;

    let outcome = coordinator
        .handle_trigger(TriggerEvent::image(ContextId(1), &locator, page_url, PAGE_TITLE))
        .await
        .unwrap();

    assert!(!outcome.degraded);
    assert_eq!(outcome.strategy, AcquisitionStrategy::Rasterized);
    let submissions = service.submissions.lock().unwrap().clone();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0]["pageInfo"]["contextFound"], json!(true));
    assert_eq!(
        submissions[0]["pageInfo"]["imageContext"]["altText"],
        json!("Green jacket")
    );
}

#[tokio::test]
async fn test_timed_out_trigger_leaves_context_usable() {
    let (service, port) = start_scripted_service().await;
    let base = start_image_server().await;
    let host = host_for(&base, None).await;
    let coordinator = coordinator(port, host, Duration::from_secs(1)).await;

    let slow = format!("{}/slow.png", base);
    let first = coordinator
        .handle_trigger(TriggerEvent::image(ContextId(1), &slow, &base, PAGE_TITLE))
        .await
        .unwrap();
    assert!(first.degraded);
    assert_eq!(first.strategy, AcquisitionStrategy::Passthrough);

    let fast = format!("{}/fast.png", base);
    let second = coordinator
        .handle_trigger(TriggerEvent::image(ContextId(1), &fast, &base, PAGE_TITLE))
        .await
        .unwrap();
    assert!(!second.degraded);
    assert_eq!(second.strategy, AcquisitionStrategy::Rasterized);

    let submissions = service.submissions.lock().unwrap().clone();
    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[0]["imageData"], json!(slow));
    assert!(submissions[1]["imageData"]
        .as_str()
        .unwrap()
        .starts_with("data:image/jpeg;base64,"));
}
