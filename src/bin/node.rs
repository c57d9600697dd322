//! ==============================================================================
//! quill-node - sensor node entry point
//! ==============================================================================
//!
//! startup:
//!     1. load node.toml (or defaults), apply cli overrides
//!     2. set up logging
//!     3. build the agent, register every configured sensor
//!     4. start heartbeat + outbound consumer
//!     5. wait for ctrl-c / SIGTERM, then shut down cooperatively
//!
//! a sensor that fails to initialize is fatal: the node exits non-zero
//! instead of running with a partial sensor set.
//!
//! ==============================================================================

use anyhow::Context;
use clap::Parser;
use quill::config::{self, NodeConfig};
use quill::node::NodeAgent;
use quill::{logging, shutdown};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "quill-node", version, about = "Collects sensor readings and ships them to the leader")]
struct Cli {
    /// path to node.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// override device_id from the config file
    #[arg(long)]
    device_id: Option<u8>,

    /// override the leader host
    #[arg(long)]
    leader_host: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // step 1: configuration
    let loaded = config::load_or_default::<NodeConfig>(cli.config.as_deref(), "node")?;
    let mut cfg = loaded.config.clone();
    if let Some(id) = cli.device_id {
        cfg.device_id = id;
    }
    if let Some(host) = cli.leader_host {
        cfg.leader_host = host;
    }

    // step 2: logging
    let log_file = logging::init(&cfg.logging)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "quill node starting");
    loaded.log();
    if let Some(path) = &log_file {
        tracing::info!(path = %path.display(), "logging to file");
    }
    cfg.print_summary();

    // step 3: agent + sensors
    let mut agent = NodeAgent::new(cfg.settings()).context("failed to create node agent")?;
    let adapters = cfg.sensors.adapters();
    if adapters.is_empty() {
        tracing::warn!("no sensors configured - node will only send heartbeats");
    }
    for adapter in adapters {
        let name = adapter.kind_name();
        if let Err(e) = agent.register_sensor(adapter).await {
            tracing::error!(sensor = name, error = %e, "sensor init failed");
            agent.shutdown().await;
            return Err(e).with_context(|| format!("failed to register {name} sensor"));
        }
    }

    // step 4: run
    agent.start();

    // step 5: wait for a signal
    shutdown::signal().await;
    agent.shutdown().await;
    tracing::info!("bye");
    Ok(())
}
