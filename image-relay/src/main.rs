//! Image Relay - command line entry point
//!
//! ```bash
//! # Send an image found on a page, following the task until it finishes
//! image-relay send https://example.com/a.jpg --page-url https://example.com/ --page-title Example
//!
//! # Check the configured service
//! image-relay status
//!
//! # Change settings
//! image-relay config --port 9000 --polling false
//! ```

use clap::{Args, Parser, Subcommand};
use image_relay::{
    ContextId, Coordinator, DocumentSnapshot, ExtractorInstaller, FileSettingsStore, InProcessHost,
    LogNotifier, Messenger, PageAgent, PageRegistration, ProcessHost, ServiceClient, Settings,
    SettingsStore, SettingsUpdate, TriggerEvent,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "image-relay",
    version,
    about = "Send web page images to a local processing service"
)]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one image and follow the resulting task
    Send(SendArgs),
    /// Check whether the configured service is reachable
    Status,
    /// Try a host and port without saving them
    TestConnection {
        #[arg(long, default_value = "localhost")]
        host: String,
        #[arg(long)]
        port: String,
    },
    /// Show settings, or change them when any option is given
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
struct SendArgs {
    /// Address of the image
    image: String,

    /// Address of the page showing the image
    #[arg(long)]
    page_url: String,

    #[arg(long, default_value = "")]
    page_title: String,

    #[arg(long)]
    favicon: Option<String>,

    /// Page structure snapshot (JSON) used for context
    #[arg(long)]
    document: Option<PathBuf>,

    /// Run the page extractor inside this process instead of a page-agent child
    #[arg(long)]
    in_process: bool,

    /// page-agent binary to spawn
    #[arg(long)]
    page_agent: Option<PathBuf>,

    /// Page context (tab) identifier
    #[arg(long, default_value_t = 1)]
    context: u32,

    /// Exit once the image is accepted instead of waiting for the task
    #[arg(long)]
    no_wait: bool,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<String>,
    #[arg(long)]
    notifications: Option<bool>,
    #[arg(long)]
    polling: Option<bool>,
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
    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(match cli.config {
        Some(path) => FileSettingsStore::new(path),
        None => FileSettingsStore::open_default(),
    });
    info!("Using settings at {:?}", store.path());

    match cli.command {
        Command::Send(args) => send(store, args).await,
        Command::Status => {
            let settings = store.get(&Settings::default()).await?;
            let status = ServiceClient::new().check_status(&settings.server_url()).await;
            println!("{}", serde_json::to_string_pretty(&status)?);
            if !status.connected {
                std::process::exit(2);
            }
            Ok(())
        }
        Command::TestConnection { host, port } => {
            let outcome = ServiceClient::new().test_connection(&host, &port).await?;
            println!("{}", outcome);
            if !outcome.is_connected() {
                std::process::exit(2);
            }
            Ok(())
        }
        Command::Config(args) => configure(store.as_ref(), args).await,
    }
}

async fn send(
    store: Arc<FileSettingsStore>,
    args: SendArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let context = ContextId(args.context);
    let mut agents = None;
    let (messenger, installer) = if args.in_process {
        let snapshot = match &args.document {
            Some(path) => DocumentSnapshot::load(path).await?,
            None => DocumentSnapshot::empty(args.page_url.clone(), args.page_title.clone()),
        };
        let client = ServiceClient::new().http().clone();
        let host = Arc::new(InProcessHost::new(move |_| {
            Some(PageAgent::for_document(snapshot.clone(), client.clone()))
        }));
        split(host)
    } else {
        let host = Arc::new(match args.page_agent {
            Some(path) => ProcessHost::with_path(path),
            None => ProcessHost::new(),
        });
        debug!("Page agents run from {}", host.binary_path().display());
        host.register(
            context,
            PageRegistration {
                url: args.page_url.clone(),
                title: args.page_title.clone(),
                document: args.document.clone(),
            },
        )
        .await;
        agents = Some(host.clone());
        split(host)
    };

    let coordinator = Coordinator::new(store, messenger, installer, Arc::new(LogNotifier));
    coordinator.on_startup().await;

    let mut trigger = TriggerEvent::image(context, &args.image, &args.page_url, &args.page_title);
    trigger.favicon_locator = args.favicon;

    let result = coordinator.handle_trigger(trigger).await;
    // The page agent is only needed until the image is submitted
    if let Some(host) = &agents {
        host.unregister(context).await;
    }
    let outcome = result?;
    println!("task {} ({})", outcome.task.task_id, outcome.strategy.as_str());

    if let Some(poller) = outcome.poller {
        if args.no_wait {
            poller.abort();
        } else {
            let state = poller.await?;
            println!("task {} {:?}", outcome.task.task_id, state);
        }
    }
    Ok(())
}

/// The same host acts as messenger and installer
fn split<H>(host: Arc<H>) -> (Arc<dyn Messenger>, Arc<dyn ExtractorInstaller>)
where
    H: Messenger + ExtractorInstaller + 'static,
{
    (host.clone(), host)
}

async fn configure(
    store: &FileSettingsStore,
    args: ConfigArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let current = store.get(&Settings::default()).await?;
    let update = SettingsUpdate {
        server_host: args.host,
        server_port: args.port,
        notifications_enabled: args.notifications,
        polling_enabled: args.polling,
    };

    let settings = if update.is_empty() {
        current
    } else {
        let next = update.apply_to(&current)?;
        store.set(&next).await?;
        next
    };

    print!("{}", toml::to_string_pretty(&settings)?);
    Ok(())
}
