//! tile-bridge CLI entry point.
//!
//! Runs a map viewer module against the terminal: module output is printed,
//! tiles are fetched over HTTP and track files are read from disk.

mod console;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tile_bridge_common::ConfigFile;
use tile_bridge_driver::{BridgeDriver, HostServices, IntervalScheduler};
use tile_bridge_host::{FsFileSource, HttpTileFetcher, host_event_channel};

use crate::console::{ConsoleSurface, spawn_stdin_reader};

#[derive(Parser, Debug)]
#[command(name = "tile-bridge", version, about)]
struct Args {
    /// Compiled viewer module (.wasm or .wat)
    module: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, env = "TILE_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Frames per second
    #[arg(long)]
    fps: Option<u32>,

    /// Pointer width of the module in bytes (4 or 8)
    #[arg(long)]
    word_size: Option<usize>,

    /// Initial surface width
    #[arg(long)]
    width: Option<u32>,

    /// Initial surface height
    #[arg(long)]
    height: Option<u32>,

    /// Meter fuel on every export call
    #[arg(long)]
    fuel: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing; stdout is reserved for module output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tile_bridge=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    // Load configuration
    let mut file = match &args.config {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ConfigFile::default(),
    };
    if let Some(fps) = args.fps {
        file.runtime.frame.fps = fps;
    }
    if let Some(word_size) = args.word_size {
        file.runtime.module.word_size = word_size;
    }
    if let Some(width) = args.width {
        file.surface.width = width;
    }
    if let Some(height) = args.height {
        file.surface.height = height;
    }
    if args.fuel {
        file.runtime.engine.fuel_metering = true;
    }

    let module_path = args
        .module
        .or_else(|| file.module_path.as_ref().map(PathBuf::from))
        .context("No module given. Pass a path or set module_path in the config file")?;
    let config = file.runtime;

    info!(
        module = %module_path.display(),
        fps = config.frame.fps,
        word_size = config.module.word_size,
        "Configuration loaded"
    );

    let surface = Arc::new(ConsoleSurface::new(file.surface));
    let (events_tx, events_rx) = host_event_channel();
    let services = HostServices {
        surface: surface.clone(),
        fetcher: Arc::new(HttpTileFetcher::new(&config.fetch)?),
        files: Arc::new(FsFileSource),
        scheduler: Box::new(IntervalScheduler::from_config(&config.frame)),
    };

    let mut driver = BridgeDriver::new(config, services, events_rx)?;
    driver
        .start_file(&module_path)
        .await
        .with_context(|| format!("Failed to start {}", module_path.display()))?;

    spawn_stdin_reader(surface, events_tx);
    info!("Commands: resize <w> <h> | open <path> | drop <path> | cancel");

    let summary = driver.run_until(shutdown_signal()).await?;

    info!(
        frames = summary.metrics.frames,
        tiles_delivered = summary.metrics.tiles_delivered,
        tile_failures = summary.metrics.tile_failures,
        tracks_delivered = summary.metrics.tracks_delivered,
        files_rejected = summary.metrics.files_rejected,
        callback_failures = summary.metrics.callback_failures,
        fuel_consumed = summary.metrics.fuel_consumed,
        abandoned = summary.abandoned,
        "Viewer exited"
    );

    Ok(())
}

/// Wait for Ctrl+C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
