//! ==============================================================================
//! registry.rs - node liveness registry
//! ==============================================================================
//!
//! state machine per device id:
//!
//! ```text
//!     Unseen ──announce──► Active ──sweep (silent > timeout)──► Inactive
//!                           ▲  │                                   │
//!                           │  └──announce (refresh last_seen)     │
//!                           └───────────announce (reconnected)─────┘
//! ```
//!
//! every read and write happens under one mutex for the whole
//! read-modify-write, so no half-updated record is ever visible.
//! records are never removed.
//!
//! ==============================================================================

use crate::domain::SensorKind;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// aging sweep cadence
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeRecord {
    pub device_id: u8,
    /// last sensor kind a reading arrived from, if any
    pub sensor_kind: Option<SensorKind>,
    pub active: bool,
    pub last_seen_at: Instant,
}

/// what an announce did to the record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Unseen -> Active
    Registered,
    /// Active -> Active
    Refreshed,
    /// Inactive -> Active
    Reconnected,
}

/// read-only view for the dashboard
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub device_id: u8,
    pub sensor_kind: Option<&'static str>,
    pub active: bool,
    pub seconds_since_seen: u64,
}

#[derive(Debug)]
pub struct LeaderRegistry {
    nodes: Mutex<HashMap<u8, NodeRecord>>,
    timeout: Duration,
}

impl LeaderRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self { nodes: Mutex::new(HashMap::new()), timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    // every critical section leaves the map consistent, so a poisoned
    // lock still holds valid data
    fn nodes(&self) -> MutexGuard<'_, HashMap<u8, NodeRecord>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn announce(&self, device_id: u8) -> Transition {
        self.announce_at(device_id, Instant::now())
    }

    pub(crate) fn announce_at(&self, device_id: u8, now: Instant) -> Transition {
        let mut nodes = self.nodes();
        match nodes.get_mut(&device_id) {
            None => {
                nodes.insert(
                    device_id,
                    NodeRecord { device_id, sensor_kind: None, active: true, last_seen_at: now },
                );
                tracing::info!(device_id, "new node connected");
                Transition::Registered
            }
            Some(record) => {
                record.last_seen_at = now;
                if record.active {
                    Transition::Refreshed
                } else {
                    record.active = true;
                    tracing::info!(device_id, "previously seen node reconnected");
                    Transition::Reconnected
                }
            }
        }
    }

    /// remember which sensor a known node last reported from.
    /// does not create records and does not count as a heartbeat.
    pub fn note_sensor(&self, device_id: u8, kind: SensorKind) {
        if let Some(record) = self.nodes().get_mut(&device_id) {
            record.sensor_kind = Some(kind);
        }
    }

    /// demote active nodes silent for longer than the timeout.
    /// returns the ids demoted by this pass.
    pub fn sweep(&self) -> Vec<u8> {
        self.sweep_at(Instant::now())
    }

    pub(crate) fn sweep_at(&self, now: Instant) -> Vec<u8> {
        let mut demoted = Vec::new();
        for record in self.nodes().values_mut() {
            if record.active && now.saturating_duration_since(record.last_seen_at) > self.timeout {
                record.active = false;
                tracing::warn!(device_id = record.device_id, "node has gone offline, marking inactive");
                demoted.push(record.device_id);
            }
        }
        demoted
    }

    pub fn active_count(&self) -> usize {
        self.nodes().values().filter(|r| r.active).count()
    }

    pub fn get(&self, device_id: u8) -> Option<NodeRecord> {
        self.nodes().get(&device_id).cloned()
    }

    pub fn snapshot(&self) -> Vec<NodeStatus> {
        let now = Instant::now();
        let mut out: Vec<NodeStatus> = self
            .nodes()
            .values()
            .map(|r| NodeStatus {
                device_id: r.device_id,
                sensor_kind: r.sensor_kind.map(SensorKind::name),
                active: r.active,
                seconds_since_seen: now.saturating_duration_since(r.last_seen_at).as_secs(),
            })
            .collect();
        out.sort_by_key(|s| s.device_id);
        out
    }

    /// run the aging sweep every SWEEP_INTERVAL until `stop` flips
    pub fn spawn_aging(self: &Arc<Self>, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = stop.wait_for(|s| *s) => break,
                    _ = ticker.tick() => {
                        registry.sweep();
                    }
                }
            }
            tracing::debug!("node aging worker stopped");
        })
    }
}
