//! Page Agent - page-context extractor over native messaging
//!
//! Reads framed requests from stdin, answers them for one document and
//! writes framed responses to stdout. Logs go to stderr since stdout carries
//! the protocol.

use clap::Parser;
use image_relay::messenger::framing::{read_message, write_json};
use image_relay::{DocumentSnapshot, PageAgent, PageRequest, PageResponse};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "page-agent", version, about = "Page-context image extractor")]
struct Cli {
    /// Address of the page
    #[arg(long)]
    page_url: String,

    #[arg(long, default_value = "")]
    page_title: String,

    /// Page structure snapshot (JSON)
    #[arg(long)]
    document: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let snapshot = match &cli.document {
        Some(path) => match DocumentSnapshot::load(path).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Cannot read document {:?}: {}, continuing without structure", path, e);
                DocumentSnapshot::empty(cli.page_url.clone(), cli.page_title.clone())
            }
        },
        None => DocumentSnapshot::empty(cli.page_url.clone(), cli.page_title.clone()),
    };

    info!("Page agent started for {} ({} images)", snapshot.url, snapshot.images.len());
    let agent = PageAgent::for_document(snapshot, reqwest::Client::new());

    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();

    loop {
        let message = match read_message(&mut stdin).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!("Connection closed");
                break;
            }
            Err(e) => {
                error!("Read error: {}", e);
                break;
            }
        };

        let response = match serde_json::from_slice::<PageRequest>(&message) {
            Ok(request) => agent.handle(request).await,
            Err(e) => {
                warn!("Unrecognized request ({} bytes): {}", message.len(), e);
                PageResponse::failure(format!("unrecognized request: {}", e))
            }
        };

        if let Err(e) = write_json(&mut stdout, &response).await {
            error!("Failed to write response: {}", e);
            break;
        }
    }
}
