//! ==============================================================================
//! quill-leader - leader entry point
//! ==============================================================================
//!
//! startup:
//!     1. load leader.toml (or defaults)
//!     2. set up logging
//!     3. open the reading store (sqlite file, or memory when db_file unset)
//!     4. bind the node listener and the dashboard api
//!     5. serve until ctrl-c / SIGTERM
//!
//! ==============================================================================

use anyhow::Context;
use clap::Parser;
use quill::api::{self, ApiState};
use quill::config::{self, LeaderConfig};
use quill::leader::{LeaderRegistry, LeaderServer};
use quill::store::{MemoryStore, ReadingSink, SqliteStore};
use quill::{logging, shutdown};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "quill-leader", version, about = "Tracks node liveness and stores their readings")]
struct Cli {
    /// path to leader.toml
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // step 1: configuration
    let loaded = config::load_or_default::<LeaderConfig>(cli.config.as_deref(), "leader")?;
    let cfg = &loaded.config;

    // step 2: logging
    let log_file = logging::init(&cfg.logging)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), env = %cfg.env, "quill leader starting");
    loaded.log();
    if let Some(path) = &log_file {
        tracing::info!(path = %path.display(), "logging to file");
    }
    cfg.print_summary();

    // step 3: storage
    let store: Arc<dyn ReadingSink> = match &cfg.db_file {
        Some(path) => {
            let store = SqliteStore::open(path)
                .with_context(|| format!("failed to open database {}", path.display()))?;
            tracing::info!(path = %path.display(), "sqlite store ready");
            Arc::new(store)
        }
        None => {
            tracing::warn!("no db_file configured - readings are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    // step 4: listeners
    let registry = Arc::new(LeaderRegistry::new(cfg.node_timeout()));
    let addr: SocketAddr = format!("{}:{}", cfg.bind_host, cfg.leader_port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", cfg.bind_host, cfg.leader_port))?;
    let server = LeaderServer::bind(addr, registry.clone(), store.clone()).await?;
    let close = server.close_handle();

    let api_addr = SocketAddr::new(addr.ip(), cfg.api.port);
    let api_listener = tokio::net::TcpListener::bind(api_addr)
        .await
        .with_context(|| format!("failed to bind dashboard api on {api_addr}"))?;
    let app = api::router(
        ApiState { registry, store, default_days: cfg.api.dashboard_stats_days },
        &cfg.api.cors_origins,
        cfg.api.static_dir.clone(),
    );
    tracing::info!(addr = %api_addr, "dashboard api live");
    let api_task = tokio::spawn(async move {
        if let Err(e) = api::serve(api_listener, app).await {
            tracing::error!(error = %e, "dashboard api error");
        }
    });

    // step 5: serve until signalled
    let server_task = tokio::spawn(server.run());
    shutdown::signal().await;
    close.close();

    server_task.await.context("leader server task panicked")??;
    api_task.abort();
    tracing::info!("bye");
    Ok(())
}
