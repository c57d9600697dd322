//! ==============================================================================
//! config.rs - runtime configuration loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `node.toml` and `leader.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - NodeConfig:   identity (device_id), leader address, heartbeat,
//!                     outbound buffer, sensors
//!     - LeaderConfig: listener, node timeout, storage, dashboard api
//!     - LoggingConfig: shared by both
//!
//! logging is not up yet while config loads, so the loader reports what it
//! did through `Loaded` and the binary logs it afterwards.
//!
//! ==============================================================================

use crate::node::{DropPolicy, NodeSettings};
use crate::sensor::{AtmosphericSensor, FakeSensor, SensorAdapter};
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ==============================================================================
// node
// ==============================================================================

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NodeConfig {
    pub device_id: u8,
    pub leader_host: String,
    pub leader_port: u16,
    pub ping_interval_secs: u64,
    pub packet_buffer_size: usize,
    pub drop_policy: DropPolicy,
    pub sensors: SensorsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SensorsConfig {
    pub fake: Option<FakeConfig>,
    pub atmospheric: Option<AtmosphericConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FakeConfig {
    pub payload: String,
    pub interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AtmosphericConfig {
    pub executable: PathBuf,
    #[serde(default = "default_poll_frequency")]
    pub poll_frequency_secs: u64,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_poll_frequency() -> u64 {
    1
}

fn default_shutdown_timeout() -> u64 {
    5
}

impl Default for FakeConfig {
    fn default() -> Self {
        Self { payload: "fake data".to_string(), interval_secs: 5 }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            device_id: 1,
            leader_host: "localhost".to_string(),
            leader_port: 8765,
            ping_interval_secs: 5,
            packet_buffer_size: 100,
            drop_policy: DropPolicy::default(),
            sensors: SensorsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn settings(&self) -> NodeSettings {
        NodeSettings {
            device_id: self.device_id,
            leader_host: self.leader_host.clone(),
            leader_port: self.leader_port,
            ping_interval: Duration::from_secs(self.ping_interval_secs.max(1)),
            buffer_size: self.packet_buffer_size,
            drop_policy: self.drop_policy,
        }
    }

    pub fn print_summary(&self) {
        tracing::info!(
            device_id = self.device_id,
            leader = format!("{}:{}", self.leader_host, self.leader_port),
            ping_interval_secs = self.ping_interval_secs,
            packet_buffer_size = self.packet_buffer_size,
            drop_policy = ?self.drop_policy,
            fake_sensor = self.sensors.fake.is_some(),
            atmospheric_sensor = self.sensors.atmospheric.is_some(),
            "node configuration"
        );
    }
}

impl SensorsConfig {
    /// adapters for every configured sensor, atmospheric first
    pub fn adapters(&self) -> Vec<SensorAdapter> {
        let mut out = Vec::new();
        if let Some(a) = &self.atmospheric {
            out.push(
                AtmosphericSensor::new(&a.executable, a.poll_frequency_secs)
                    .with_shutdown_timeout(Duration::from_secs(a.shutdown_timeout_secs))
                    .into(),
            );
        }
        if let Some(f) = &self.fake {
            out.push(
                FakeSensor::with_interval(f.payload.as_bytes(), Duration::from_secs(f.interval_secs.max(1)))
                    .into(),
            );
        }
        out
    }
}

// ==============================================================================
// leader
// ==============================================================================

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LeaderConfig {
    pub env: String,
    pub bind_host: String,
    pub leader_port: u16,
    pub node_ping_timeout_secs: u64,
    /// sqlite file; in-memory store when absent
    pub db_file: Option<PathBuf>,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
    pub dashboard_stats_days: u32,
    pub static_dir: Option<PathBuf>,
    /// browser origins allowed to call the api; "*" allows any
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            dashboard_stats_days: 7,
            static_dir: None,
            cors_origins: vec![
                "https://quillsecure.com".to_string(),
                "https://www.quillsecure.com".to_string(),
            ],
        }
    }
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            env: "dev".to_string(),
            bind_host: "0.0.0.0".to_string(),
            leader_port: 8765,
            node_ping_timeout_secs: 30,
            db_file: None,
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl LeaderConfig {
    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_ping_timeout_secs)
    }

    pub fn print_summary(&self) {
        tracing::info!(
            env = %self.env,
            listen = format!("{}:{}", self.bind_host, self.leader_port),
            node_ping_timeout_secs = self.node_ping_timeout_secs,
            db_file = ?self.db_file,
            api_port = self.api.port,
            dashboard_stats_days = self.api.dashboard_stats_days,
            "leader configuration"
        );
    }
}

// ==============================================================================
// shared
// ==============================================================================

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// multi-line human output instead of compact lines
    pub pretty: bool,
    /// also write a dated log file when set (see logging.rs)
    pub file_suffix: Option<String>,
    pub file_dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            pretty: false,
            file_suffix: None,
            file_dir: PathBuf::from("."),
        }
    }
}

/// a loaded config plus what the loader went through to get it
#[derive(Debug)]
pub struct Loaded<T> {
    pub config: T,
    /// None when defaults were used
    pub source: Option<PathBuf>,
    pub warnings: Vec<String>,
}

impl<T> Loaded<T> {
    pub fn log(&self) {
        for w in &self.warnings {
            tracing::warn!("{w}");
        }
        match &self.source {
            Some(path) => tracing::info!(path = %path.display(), "configuration loaded"),
            None => tracing::warn!("no config file found - using defaults"),
        }
    }
}

/// load configuration from file
pub fn load<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> anyhow::Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("failed to parse config {}", path.display()))
}

/// load with default fallback.
///
/// an explicit path must load; otherwise `config/<name>.toml` and
/// `../config/<name>.toml` are tried in order.
pub fn load_or_default<T>(explicit: Option<&Path>, name: &str) -> anyhow::Result<Loaded<T>>
where
    T: DeserializeOwned + Default,
{
    if let Some(path) = explicit {
        let config = load(path)?;
        return Ok(Loaded { config, source: Some(path.to_path_buf()), warnings: Vec::new() });
    }

    let file = format!("{name}.toml");
    let paths = [
        PathBuf::from("config").join(&file),
        PathBuf::from("..").join("config").join(&file),
    ];

    let mut warnings = Vec::new();
    for path in paths {
        if !path.exists() {
            continue;
        }
        match load(&path) {
            Ok(config) => return Ok(Loaded { config, source: Some(path), warnings }),
            Err(e) => warnings.push(format!("failed to load {}: {:#}", path.display(), e)),
        }
    }

    Ok(Loaded { config: T::default(), source: None, warnings })
}
