use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use dualstore_cloud::CloudBackend;
use dualstore_core::paths::display_path;
use dualstore_core::{DirectoryEntry, SessionDescriptor};
use dualstore_explorer::config::{Command, Config};
use dualstore_explorer::summary::{modified_label, size_label, status_line};
use dualstore_explorer::{BackendSelector, ExplorerEvent, Navigate, NavigationController};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Serialize)]
struct ListOutput<'a> {
    location: String,
    path: String,
    entries: &'a [DirectoryEntry],
}

#[derive(Serialize)]
struct TransferOutput<'a> {
    operation: &'a str,
    remote: &'a str,
    bytes: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so listings can be piped
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();
    let descriptor = config.descriptor();
    info!("Using {} storage at {}", descriptor.storage_mode, descriptor.location());

    let selector = BackendSelector::new(
        Arc::new(config.share_backend()),
        Arc::new(CloudBackend::new(config.cloud_options())),
    );
    let (tx, mut events) = mpsc::unbounded_channel();
    let mut controller = NavigationController::new(selector, move |event: ExplorerEvent| {
        debug!(?event, "explorer event");
        let _ = tx.send(event);
    });

    match &config.command {
        Command::List { path } => {
            let target = path.clone().unwrap_or_default();
            open(&mut controller, &mut events, descriptor.clone().with_path(target)).await?;
            let listing = controller
                .listing()
                .context("listing missing after a successful load")?;
            let current = controller.current_path().unwrap_or_default();

            if config.json {
                let output = ListOutput {
                    location: descriptor.location(),
                    path: display_path(current),
                    entries: listing.entries(),
                };
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("{}{}", descriptor.location(), display_path(current));
                for entry in listing.display_order() {
                    println!(
                        "{:<6} {:>10}  {:<16}  {}",
                        if entry.is_directory { "DIR" } else { "FILE" },
                        size_label(entry),
                        modified_label(entry),
                        entry.name
                    );
                }
                println!("{}", status_line(listing, None));
            }
        }
        Command::Download { remote, local } => {
            open(&mut controller, &mut events, descriptor.clone()).await?;
            let bytes = controller.download(remote, local).await?;
            report(config.json, "download", remote, Some(bytes))?;
        }
        Command::Upload { local } => {
            open(&mut controller, &mut events, descriptor.clone()).await?;
            let remote = controller.upload(local).await?;
            controller.settle().await;
            report(config.json, "upload", &remote, None)?;
        }
    }

    Ok(())
}

/// Open a session and wait for the first listing, failing on any load error.
async fn open(
    controller: &mut NavigationController,
    events: &mut mpsc::UnboundedReceiver<ExplorerEvent>,
    descriptor: SessionDescriptor,
) -> anyhow::Result<()> {
    match controller.open(descriptor) {
        Navigate::Started => {}
        Navigate::NotConnected(e) => bail!("{}", e),
        other => bail!("could not start loading: {:?}", other),
    }
    controller.settle().await;

    while let Ok(event) = events.try_recv() {
        if let ExplorerEvent::LoadFailed { kind, message } = event {
            bail!("{} error: {}", kind, message);
        }
    }
    Ok(())
}

fn report(json: bool, operation: &str, remote: &str, bytes: Option<u64>) -> anyhow::Result<()> {
    if json {
        let output = TransferOutput {
            operation,
            remote,
            bytes,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        match bytes {
            Some(n) => println!("{} {} ({} bytes)", operation, remote, n),
            None => println!("{} {}", operation, remote),
        }
    }
    Ok(())
}
