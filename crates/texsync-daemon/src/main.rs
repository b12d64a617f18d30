//! texsync-daemon: collaborative LaTeX sync server.
//!
//! Accepts WebSocket clients, batches their edits through the shared
//! `Editor`, and persists documents under a confined storage root.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use texsync_core::Editor;
use texsync_core::protocol::MAX_MESSAGE_SIZE;
use texsync_daemon::config::{
    DEFAULT_BATCH_INTERVAL_MS, DEFAULT_LISTEN, DEFAULT_ROOT, DaemonConfig,
};
use texsync_daemon::native_fs::NativeFs;
use texsync_daemon::server::WebSocketServer;
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "texsync-daemon")]
#[command(about = "Collaborative LaTeX document sync server")]
struct Args {
    /// Storage root for documents
    #[arg(short, long, default_value = DEFAULT_ROOT)]
    root: PathBuf,

    /// Address to listen on for incoming connections
    #[arg(short, long, default_value = DEFAULT_LISTEN)]
    listen: String,

    /// Milliseconds between batch ticks
    #[arg(long, default_value_t = DEFAULT_BATCH_INTERVAL_MS)]
    batch_interval_ms: u64,

    /// Largest accepted inbound message, in bytes
    #[arg(long, default_value_t = MAX_MESSAGE_SIZE)]
    max_message_size: usize,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> DaemonConfig {
        DaemonConfig {
            root: self.root,
            listen: self.listen,
            batch_interval: Duration::from_millis(self.batch_interval_ms),
            max_message_size: self.max_message_size,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,texsync_daemon=debug"
    } else {
        "info,texsync_daemon=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = args.into_config().validate()?;

    info!("Starting texsync-daemon");
    info!("Storage root: {:?}", config.root);
    info!("Listen address: {}", config.listen);
    info!("Batch interval: {:?}", config.batch_interval);

    let storage = NativeFs::open(&config.root).await?;
    info!("Resolved storage root: {:?}", storage.base_path());
    let editor = Arc::new(Editor::new(Arc::new(storage)));

    // Batch ticker runs on its own task so slow commits never stall accepts
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let ticker = {
        let editor = Arc::clone(&editor);
        let period = config.batch_interval;
        tokio::spawn(async move {
            editor
                .run(period, async {
                    let _ = stop_rx.await;
                })
                .await;
        })
    };

    let mut server =
        WebSocketServer::new(Arc::clone(&editor)).with_max_message_size(config.max_message_size);
    let listener = WebSocketServer::bind(&config.listen).await?;

    info!("Daemon running. Press Ctrl+C to stop.");

    server
        .serve(&listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Shutdown signal received");
        })
        .await;

    info!("Shutting down");
    drop(listener);

    // Final tick and flush happen inside the ticker before it returns
    let _ = stop_tx.send(());
    if let Err(e) = ticker.await {
        error!("Batch task failed: {}", e);
    }

    server.shutdown().await;
    info!("Shutdown complete ({} file(s) registered)", editor.registry().len());
    Ok(())
}
