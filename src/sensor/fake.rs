use super::SensorStreams;
use crate::domain::{Reading, SensorKind};
use crate::error::SensorError;
use std::time::Duration;
use tokio::task::JoinHandle;

/// default emit cadence
pub const FAKE_INTERVAL: Duration = Duration::from_secs(5);

/// emits a fixed payload on a fixed interval
pub struct FakeSensor {
    payload: Vec<u8>,
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl FakeSensor {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self::with_interval(payload, FAKE_INTERVAL)
    }

    pub fn with_interval(payload: impl Into<Vec<u8>>, interval: Duration) -> Self {
        Self { payload: payload.into(), interval, task: None }
    }

    pub fn init(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    pub fn data_stream(&mut self) -> SensorStreams {
        // the fake never fails, so errors_tx just keeps that side open
        let (readings_tx, errors_tx, streams) = SensorStreams::channel();
        let payload = self.payload.clone();
        let period = self.interval;

        let task = tokio::spawn(async move {
            let _errors_tx = errors_tx;
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let reading = Reading::new(SensorKind::Fake, payload.clone());
                if readings_tx.send(reading).await.is_err() {
                    break;
                }
            }
        });

        if let Some(old) = self.task.replace(task) {
            old.abort();
        }
        streams
    }

    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        tracing::info!("close fake sensor");
    }
}
