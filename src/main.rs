//! UMB ingest daemon
//!
//! This service:
//! - Listens for weather-station connections over TCP
//! - Registers each station and selects its wire protocol
//! - Validates and decodes frames into readings
//! - Hands readings to a storage task (log or JSON lines file)
//!
//! Architecture: TCP accept → session task → decoder → channel → store task

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use umb_ingest::config::Config;
use umb_ingest::sink::{spawn_store_task, JsonLinesStore, LogStore};
use umb_ingest::{ChannelSink, IngestContext, IngestListener, ProtocolRegistry};

/// How long queued batches may take to persist at shutdown.
const STORE_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = "umb-ingestd", version, about = "Weather-station telemetry ingest server")]
struct Args {
    /// Configuration file (TOML); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the configuration file
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();
    info!("UMB ingest service starting");

    let mut config = match &args.config {
        Some(path) => Config::load(path).context("Failed to load configuration")?,
        None => {
            warn!("No configuration file given, using defaults");
            let mut config = Config::default();
            config.apply_env_overrides()?;
            config
        }
    };
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    config.validate()?;

    let catalog = Arc::new(config.load_catalog()?);
    info!(
        devices = catalog.device_count(),
        fields = catalog.field_count(),
        "Field catalog loaded"
    );

    let registry = ProtocolRegistry::with_defaults(catalog);
    info!(protocols = ?registry.tags(), "Protocols registered");

    // Storage hand-off
    let (sink, rx) = ChannelSink::channel(config.storage.channel_capacity);
    let store_task = match &config.storage.jsonl_path {
        Some(path) => {
            let store = JsonLinesStore::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            info!(path = %path.display(), "Writing readings as JSON lines");
            spawn_store_task(rx, store)
        }
        None => spawn_store_task(rx, LogStore),
    };

    let ctx = Arc::new(IngestContext::new(
        config.session_config(),
        registry,
        Arc::new(sink.clone()),
    ));

    let listener = IngestListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;

    info!("Service running. Press Ctrl+C to stop.");
    listener
        .serve_until(ctx, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl+C, shutting down");
        })
        .await?;

    // Sessions still running keep their sink clones; intake is closed
    // instead of waiting for them.
    if !store_task.shutdown(STORE_DRAIN_GRACE).await {
        warn!(
            grace_secs = STORE_DRAIN_GRACE.as_secs(),
            "Storage did not drain in time, queued batches lost"
        );
    }
    if sink.dropped() > 0 {
        warn!(dropped = sink.dropped(), "Batches dropped while storage was busy");
    }

    info!("UMB ingest service stopped");
    Ok(())
}
