//! ==============================================================================
//! sensor/mod.rs - sensor adapter abstraction
//! ==============================================================================
//!
//! purpose:
//!     one interface over every sensor source a node can own. the set of
//!     sources is closed: adding a kind means adding a variant here.
//!
//! lifecycle:
//!     init()        acquire the backing resource (subprocess, nothing, ...)
//!     data_stream() start producing; returns reading + error receivers
//!     close()       best-effort shutdown, always safe to call
//!
//! relationships:
//!     - fake.rs:        synthetic periodic emitter (smoke testing)
//!     - atmospheric.rs: drives the bme280/sgp40 driver subprocess
//!     - used by: node/mod.rs (registers adapters, fans their streams in)
//!
//! ==============================================================================

pub mod atmospheric;
pub mod fake;

pub use atmospheric::AtmosphericSensor;
pub use fake::FakeSensor;

use crate::domain::{Reading, SensorKind};
use crate::error::SensorError;
use tokio::sync::mpsc;

/// per-adapter channel depth
pub(crate) const STREAM_DEPTH: usize = 16;

/// the two halves of an adapter's output
pub struct SensorStreams {
    pub readings: mpsc::Receiver<Reading>,
    pub errors: mpsc::Receiver<SensorError>,
}

impl SensorStreams {
    pub(crate) fn channel() -> (mpsc::Sender<Reading>, mpsc::Sender<SensorError>, Self) {
        let (readings_tx, readings) = mpsc::channel(STREAM_DEPTH);
        let (errors_tx, errors) = mpsc::channel(STREAM_DEPTH);
        (readings_tx, errors_tx, Self { readings, errors })
    }
}

pub enum SensorAdapter {
    Fake(FakeSensor),
    Atmospheric(AtmosphericSensor),
}

impl SensorAdapter {
    pub fn kind(&self) -> SensorKind {
        match self {
            SensorAdapter::Fake(_) => SensorKind::Fake,
            SensorAdapter::Atmospheric(_) => SensorKind::Atmospheric,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind().name()
    }

    pub async fn init(&mut self) -> Result<(), SensorError> {
        match self {
            SensorAdapter::Fake(s) => s.init(),
            SensorAdapter::Atmospheric(s) => s.init(),
        }
    }

    pub fn data_stream(&mut self) -> Result<SensorStreams, SensorError> {
        match self {
            SensorAdapter::Fake(s) => Ok(s.data_stream()),
            SensorAdapter::Atmospheric(s) => s.data_stream(),
        }
    }

    pub async fn close(&mut self) {
        match self {
            SensorAdapter::Fake(s) => s.close(),
            SensorAdapter::Atmospheric(s) => s.close().await,
        }
    }
}

impl From<FakeSensor> for SensorAdapter {
    fn from(s: FakeSensor) -> Self {
        SensorAdapter::Fake(s)
    }
}

impl From<AtmosphericSensor> for SensorAdapter {
    fn from(s: AtmosphericSensor) -> Self {
        SensorAdapter::Atmospheric(s)
    }
}
