//! Chunkferry upload server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use chunkferry_http::{AppState, serve};
use chunkferry_receiver::{ReceiverConfig, UploadCoordinator, spawn_janitor};

#[derive(Debug, Parser)]
#[command(name = "chunkferry-serverd", about = "Resumable chunked-upload server")]
struct Args {
    /// Listen address.
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Base directory for chunks and assembled files.
    #[arg(long, default_value = "uploads")]
    base_dir: PathBuf,

    /// Prefix of per-session temporary directories.
    #[arg(long, default_value = "temp_")]
    temp_prefix: String,

    /// Largest accepted chunk payload in bytes.
    #[arg(long)]
    max_chunk_size: Option<u64>,

    /// Largest accepted chunk count per session.
    #[arg(long)]
    max_chunk_count: Option<u32>,

    /// Concurrent chunk-upload ceiling.
    #[arg(long)]
    max_concurrent_uploads: Option<usize>,

    /// Size of the blocking pool for disk writes and assembly.
    #[arg(long)]
    io_pool_size: Option<usize>,

    /// Disable the periodic cleanup of stale terminal sessions.
    #[arg(long)]
    no_auto_cleanup: bool,

    /// Age in hours after which terminal sessions are evicted.
    #[arg(long)]
    cleanup_delay_hours: Option<u64>,

    /// Additional allowed CORS origins (repeatable).
    #[arg(long = "cors-origin")]
    cors_origins: Vec<String>,
}

impl Args {
    fn into_config(self) -> (SocketAddr, ReceiverConfig) {
        let mut config = ReceiverConfig::default();
        config.storage.base_directory = self.base_dir;
        config.storage.temp_dir_prefix = self.temp_prefix;
        if let Some(size) = self.max_chunk_size {
            config.chunk.max_size = size;
        }
        if let Some(count) = self.max_chunk_count {
            config.chunk.max_count = count;
        }
        if let Some(limit) = self.max_concurrent_uploads {
            config.performance.max_concurrent_uploads = limit;
        }
        if let Some(size) = self.io_pool_size {
            config.performance.io_pool_size = size.max(1);
        }
        if self.no_auto_cleanup {
            config.cleanup.auto_cleanup_enabled = false;
        }
        if let Some(hours) = self.cleanup_delay_hours {
            config.cleanup.cleanup_delay = Duration::from_secs(hours * 3600);
        }
        config.cors.allowed_origins.extend(self.cors_origins);
        (self.listen, config)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chunkferry=info,tower_http=info".into()),
        )
        .init();

    let (listen, config) = Args::parse().into_config();

    // Disk writes and assembly run on the blocking pool; bound it per
    // the configured I/O pool size.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(config.performance.io_pool_size)
        .build()?;
    runtime.block_on(run(listen, config))
}

async fn run(listen: SocketAddr, config: ReceiverConfig) -> anyhow::Result<()> {
    let coordinator = Arc::new(UploadCoordinator::from_config(&config)?);
    let shutdown = CancellationToken::new();

    let janitor = if config.cleanup.auto_cleanup_enabled {
        Some(spawn_janitor(
            Arc::clone(coordinator.registry()),
            coordinator.store().clone(),
            config.cleanup.clone(),
            shutdown.clone(),
        ))
    } else {
        None
    };

    let state = AppState::new(
        Arc::clone(&coordinator),
        config.performance.max_concurrent_uploads,
    );
    let listener = tokio::net::TcpListener::bind(listen).await?;

    // Ctrl-C triggers a graceful drain.
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                shutdown.cancel();
            }
        }
    });

    serve(listener, state, &config, shutdown.clone()).await?;

    shutdown.cancel();
    if let Some(janitor) = janitor {
        let _ = janitor.await;
    }

    let stats = coordinator.statistics();
    tracing::info!(
        active = stats.active,
        completed = stats.completed,
        failed = stats.failed,
        "server stopped"
    );
    Ok(())
}
