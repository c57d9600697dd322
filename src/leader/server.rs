//! ==============================================================================
//! server.rs - leader accept loop and packet dispatch
//! ==============================================================================
//!
//! purpose:
//!     accept node connections, read exactly one packet from each, route it.
//!
//! tasks:
//!     - accept loop (this task): one spawned handler per connection, no limit
//!     - aging worker: registry.spawn_aging, 1s sweep
//!     - reading consumer: parses raw payloads, writes the persistence sink
//!
//! failure handling:
//!     - decode failure: logged, connection dropped, nothing sent back
//!     - storage failure: logged, reading lost
//!     - close(): accept loop exits; in-flight handlers are not awaited
//!
//! ==============================================================================

use super::registry::LeaderRegistry;
use crate::domain::{AtmosphericReading, Reading, SensorKind};
use crate::error::LeaderError;
use crate::store::ReadingSink;
use crate::wire::{self, Packet, Payload};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

/// depth of the handler -> reading consumer channel
pub const READING_CHANNEL_DEPTH: usize = 100;

/// a reading tagged with the device that sent it
#[derive(Debug)]
pub struct InboundReading {
    pub device_id: u8,
    pub reading: Reading,
}

/// flips the server's close flag; cheap to clone
#[derive(Clone)]
pub struct CloseHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CloseHandle {
    pub fn close(&self) {
        tracing::debug!("close listener");
        self.tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }
}

pub struct LeaderServer {
    listener: TcpListener,
    registry: Arc<LeaderRegistry>,
    sink: Arc<dyn ReadingSink>,
    closing: Arc<watch::Sender<bool>>,
}

impl LeaderServer {
    pub async fn bind(
        addr: SocketAddr,
        registry: Arc<LeaderRegistry>,
        sink: Arc<dyn ReadingSink>,
    ) -> Result<Self, LeaderError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| LeaderError::Bind { addr, source })?;
        let (closing, _) = watch::channel(false);
        Ok(Self { listener, registry, sink, closing: Arc::new(closing) })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, LeaderError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle { tx: self.closing.clone() }
    }

    pub fn registry(&self) -> &Arc<LeaderRegistry> {
        &self.registry
    }

    /// serve until the close flag is set
    pub async fn run(self) -> Result<(), LeaderError> {
        let addr = self.local_addr()?;
        tracing::info!(%addr, "started listening");

        let aging = self.registry.spawn_aging(self.closing.subscribe());
        let (readings_tx, readings_rx) = mpsc::channel(READING_CHANNEL_DEPTH);
        let consumer = tokio::spawn(consume_readings(readings_rx, self.sink.clone()));

        let mut closed = self.closing.subscribe();
        loop {
            if *closed.borrow() {
                break;
            }
            tokio::select! {
                _ = closed.wait_for(|c| *c) => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(handle_connection(
                            stream,
                            peer,
                            self.registry.clone(),
                            readings_tx.clone(),
                        ));
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "error accepting connection");
                    }
                },
            }
        }

        // handlers still hold senders; the consumer ends when they finish
        drop(readings_tx);
        drop(consumer);
        let _ = aging.await;
        tracing::info!(%addr, "stopped listening");
        Ok(())
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<LeaderRegistry>,
    readings: mpsc::Sender<InboundReading>,
) {
    match wire::read_packet(&mut stream).await {
        Ok(packet) => dispatch(packet, &registry, &readings).await,
        Err(e) => tracing::warn!(%peer, error = %e, "error decoding packet"),
    }
}

pub(crate) async fn dispatch(
    packet: Packet,
    registry: &LeaderRegistry,
    readings: &mpsc::Sender<InboundReading>,
) {
    let device_id = packet.sender_id;
    match packet.payload {
        Payload::Announce => {
            registry.announce(device_id);
        }
        Payload::SensorReading(reading) => {
            tracing::debug!(device_id, sensor = reading.kind.name(), "sensor readout");
            registry.note_sensor(device_id, reading.kind);
            if readings.send(InboundReading { device_id, reading }).await.is_err() {
                tracing::warn!(device_id, "reading consumer gone, dropping reading");
            }
        }
    }
}

/// parse and persist readings one at a time
pub(crate) async fn consume_readings(
    mut readings: mpsc::Receiver<InboundReading>,
    sink: Arc<dyn ReadingSink>,
) {
    while let Some(InboundReading { device_id, reading }) = readings.recv().await {
        match reading.kind {
            SensorKind::Fake => tracing::debug!(device_id, "parse fake sensor data"),
            SensorKind::Atmospheric => {
                let parsed = AtmosphericReading::parse_line(&String::from_utf8_lossy(&reading.raw));
                let sink = sink.clone();
                match tokio::task::spawn_blocking(move || sink.record_reading(&parsed, device_id)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::error!(device_id, error = %e, "error recording atmospheric measurement")
                    }
                    Err(e) => tracing::error!(device_id, error = %e, "storage task failed"),
                }
            }
            SensorKind::Other(code) => {
                tracing::warn!(device_id, code, "no parser for sensor kind, dropping reading")
            }
        }
    }
    tracing::debug!("reading consumer stopped");
}
