//! Standalone receiver server binary
//!
//! Run this to accept images from `image-relay` on the local machine.

use clap::Parser;
use receiver_service::{ReceiverServer, ServerConfig};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "receiver-server", version, about = "Local image receiving service")]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Database and image directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Time until a received image's task is marked completed
    #[arg(long, default_value_t = 2000)]
    processing_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let defaults = ServerConfig::default();
    let config = ServerConfig {
        bind: SocketAddr::new(cli.host, cli.port),
        data_dir: cli.data_dir.unwrap_or(defaults.data_dir),
        processing_delay: Duration::from_millis(cli.processing_delay_ms),
    };

    println!("Starting image receiver...");
    let server = ReceiverServer::new(config)?;

    println!("Listening on http://{}", server.config().bind);
    println!("Data directory: {:?}", server.config().data_dir);
    println!("Press Ctrl+C to stop");

    // Handle shutdown gracefully
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                eprintln!("Server error: {}", e);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down...");
        }
    }

    Ok(())
}
