//! ==============================================================================
//! node/mod.rs - per-device agent
//! ==============================================================================
//!
//! purpose:
//!     owns the device's sensor adapters and ships their readings to the
//!     leader, one tcp connection per packet.
//!
//! pipeline:
//!
//! ```text
//!     ┌──────────┐  forwarder   ┌──────────┐  offer()   ┌──────────────┐
//!     │ sensor 1 │ ───────────► │          │ ─────────► │ outbound     │
//!     ├──────────┤              │ readings │ (lossy)    │ queue        │
//!     │ sensor n │ ───────────► │ fan-in   │            │ (bounded)    │
//!     └──────────┘              └──────────┘            └──────┬───────┘
//!                                                              │ pop() while healthy
//!     ┌───────────┐  announce every ping_interval       ┌──────┴───────┐
//!     │ heartbeat │ ──────────────► leader              │ consumer     │ ──► leader
//!     └─────┬─────┘                                     └──────┬───────┘
//!           └──────────── LeaderHealth (watch) ────────────────┘
//! ```
//!
//! shutdown:
//!     close adapters -> stop forwarders + heartbeat -> readings channel
//!     closes -> outbound queue closes -> consumer flushes (leader healthy)
//!     or discards (leader unreachable) -> done.
//!
//! ==============================================================================

pub mod health;
pub mod outbound;

pub use health::{HealthWatch, LeaderHealth};
pub use outbound::{Admission, DropPolicy, OutboundQueue};

use crate::domain::Reading;
use crate::error::{NodeError, SensorError};
use crate::sensor::{SensorAdapter, SensorStreams};
use crate::wire::{self, Packet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// depth of the shared fan-in channels
const FAN_IN_DEPTH: usize = 64;

/// values the agent needs; loading them is config.rs' job
#[derive(Clone, Debug)]
pub struct NodeSettings {
    pub device_id: u8,
    pub leader_host: String,
    pub leader_port: u16,
    pub ping_interval: Duration,
    pub buffer_size: usize,
    pub drop_policy: DropPolicy,
}

/// an adapter error tagged with where it came from
#[derive(Debug)]
pub struct SensorFault {
    pub sensor: &'static str,
    pub error: SensorError,
}

/// resolve the leader destination. accepts an ip literal or "localhost".
pub fn resolve_leader(host: &str, port: u16) -> Result<SocketAddr, NodeError> {
    let ip = match host.parse::<IpAddr>() {
        Ok(ip) => ip,
        Err(_) if host == "localhost" => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Err(_) => return Err(NodeError::InvalidHost(host.to_string())),
    };
    Ok(SocketAddr::new(ip, port))
}

/// open a connection, write one packet, close.
///
/// the packet is framed first, so an oversized one fails without a connection.
pub async fn send_packet(leader: SocketAddr, packet: &Packet) -> Result<(), NodeError> {
    tracing::debug!(?packet, "send packet");
    let frame = packet.encode()?;
    let conn_err = |source| NodeError::Connection { addr: leader, source };

    let mut stream = TcpStream::connect(leader).await.map_err(conn_err)?;
    wire::write_frame(&mut stream, &frame).await.map_err(conn_err)?;
    stream.shutdown().await.map_err(conn_err)?;
    Ok(())
}

pub struct NodeAgent {
    device_id: u8,
    leader: SocketAddr,
    ping_interval: Duration,

    sensors: Vec<SensorAdapter>,
    readings_tx: Option<mpsc::Sender<Reading>>,
    errors_tx: Option<mpsc::Sender<SensorFault>>,
    readings_rx: Option<mpsc::Receiver<Reading>>,
    errors_rx: Option<mpsc::Receiver<SensorFault>>,

    outbound: Arc<OutboundQueue<Packet>>,
    health: Arc<LeaderHealth>,
    stop: watch::Sender<bool>,

    forwarders: Vec<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
    done: Option<oneshot::Receiver<()>>,
}

impl NodeAgent {
    /// build the agent; nothing runs until start()
    pub fn new(settings: NodeSettings) -> Result<Self, NodeError> {
        let leader = resolve_leader(&settings.leader_host, settings.leader_port)?;
        let (readings_tx, readings_rx) = mpsc::channel(FAN_IN_DEPTH);
        let (errors_tx, errors_rx) = mpsc::channel(FAN_IN_DEPTH);
        let (stop, _) = watch::channel(false);

        Ok(Self {
            device_id: settings.device_id,
            leader,
            ping_interval: settings.ping_interval,
            sensors: Vec::new(),
            readings_tx: Some(readings_tx),
            errors_tx: Some(errors_tx),
            readings_rx: Some(readings_rx),
            errors_rx: Some(errors_rx),
            outbound: Arc::new(OutboundQueue::new(settings.buffer_size, settings.drop_policy)),
            health: Arc::new(LeaderHealth::new()),
            stop,
            forwarders: Vec::new(),
            heartbeat: None,
            pump: None,
            done: None,
        })
    }

    pub fn device_id(&self) -> u8 {
        self.device_id
    }

    pub fn leader(&self) -> SocketAddr {
        self.leader
    }

    pub fn leader_healthy(&self) -> bool {
        self.health.is_healthy()
    }

    pub fn outbound(&self) -> &OutboundQueue<Packet> {
        &self.outbound
    }

    pub fn sensor_count(&self) -> usize {
        self.sensors.len()
    }

    /// init the adapter and start forwarding its streams into the agent.
    ///
    /// the error is returned as-is; whether it aborts the node is the
    /// caller's decision.
    pub async fn register_sensor(&mut self, mut adapter: SensorAdapter) -> Result<(), SensorError> {
        let name = adapter.kind_name();
        let (Some(readings_tx), Some(errors_tx)) = (self.readings_tx.clone(), self.errors_tx.clone())
        else {
            return Err(SensorError::NotInitialized(name));
        };

        adapter.init().await?;
        let streams = match adapter.data_stream() {
            Ok(streams) => streams,
            Err(e) => {
                adapter.close().await;
                return Err(e);
            }
        };
        tracing::info!(device_id = self.device_id, sensor = name, "registered new sensor");

        let stop = self.stop.subscribe();
        self.forwarders.push(tokio::spawn(forward_sensor(name, streams, readings_tx, errors_tx, stop)));
        self.sensors.push(adapter);
        Ok(())
    }

    /// spawn heartbeat, admission pump and outbound consumer
    pub fn start(&mut self) {
        let (Some(readings_rx), Some(errors_rx)) = (self.readings_rx.take(), self.errors_rx.take())
        else {
            tracing::warn!(device_id = self.device_id, "node agent already started");
            return;
        };

        self.heartbeat = Some(tokio::spawn(heartbeat(
            self.device_id,
            self.leader,
            self.ping_interval,
            self.health.clone(),
            self.stop.subscribe(),
        )));

        self.pump = Some(tokio::spawn(admit(
            self.device_id,
            readings_rx,
            errors_rx,
            self.outbound.clone(),
        )));

        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(consume_outbound(
            self.leader,
            self.outbound.clone(),
            self.health.watch(),
            done_tx,
        ));
        self.done = Some(done_rx);

        tracing::info!(device_id = self.device_id, leader = %self.leader, "node agent started");
    }

    /// cooperative shutdown; returns once the outbound consumer is done
    pub async fn shutdown(mut self) {
        tracing::info!(device_id = self.device_id, "node agent shutting down");

        for sensor in &mut self.sensors {
            sensor.close().await;
        }
        self.stop.send_replace(true);
        for forwarder in self.forwarders.drain(..) {
            let _ = forwarder.await;
        }

        // last senders gone: the pump sees the readings channel close
        self.readings_tx.take();
        self.errors_tx.take();
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }
        self.outbound.close();

        if let Some(heartbeat) = self.heartbeat.take() {
            let _ = heartbeat.await;
        }
        if let Some(done) = self.done.take() {
            let _ = done.await;
        }
        tracing::info!(device_id = self.device_id, "node agent stopped");
    }
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    // a dropped sender also means stop
    let _ = stop.wait_for(|s| *s).await;
}

/// copy one adapter's streams into the shared channels until stopped
async fn forward_sensor(
    name: &'static str,
    streams: SensorStreams,
    readings_tx: mpsc::Sender<Reading>,
    errors_tx: mpsc::Sender<SensorFault>,
    mut stop: watch::Receiver<bool>,
) {
    let SensorStreams { mut readings, mut errors } = streams;
    loop {
        tokio::select! {
            _ = stopped(&mut stop) => break,
            Some(reading) = readings.recv() => {
                // the fan-in channel can be full (agent never started)
                tokio::select! {
                    _ = stopped(&mut stop) => break,
                    sent = readings_tx.send(reading) => if sent.is_err() { break },
                }
            }
            Some(error) = errors.recv() => {
                tokio::select! {
                    _ = stopped(&mut stop) => break,
                    sent = errors_tx.send(SensorFault { sensor: name, error }) => if sent.is_err() { break },
                }
            }
            else => break,
        }
    }
    tracing::debug!(sensor = name, "sensor forwarder stopped");
}

/// wrap readings into packets and offer them to the outbound queue
async fn admit(
    device_id: u8,
    mut readings: mpsc::Receiver<Reading>,
    mut errors: mpsc::Receiver<SensorFault>,
    outbound: Arc<OutboundQueue<Packet>>,
) {
    loop {
        tokio::select! {
            reading = readings.recv() => {
                let Some(reading) = reading else { break };
                let sensor = reading.kind.name();
                match outbound.offer(Packet::sensor_reading(device_id, reading)) {
                    Admission::Accepted => {}
                    Admission::Rejected => {
                        tracing::warn!(device_id, sensor, "outbound buffer is full, dropping packet");
                    }
                    Admission::Evicted(_) => {
                        tracing::warn!(device_id, sensor, "outbound buffer is full, dropping oldest packet");
                    }
                    Admission::Closed => {
                        tracing::debug!(device_id, sensor, "outbound queue closed, dropping packet");
                    }
                }
            }
            Some(fault) = errors.recv() => {
                tracing::warn!(device_id, sensor = fault.sensor, error = %fault.error, "sensor error");
            }
        }
    }
    outbound.close();
}

/// announce on every tick; success/failure drives LeaderHealth
async fn heartbeat(
    device_id: u8,
    leader: SocketAddr,
    every: Duration,
    health: Arc<LeaderHealth>,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let announce = Packet::announce(device_id);

    loop {
        tokio::select! {
            _ = stopped(&mut stop) => break,
            _ = ticker.tick() => {
                match send_packet(leader, &announce).await {
                    Ok(()) => {
                        if !health.mark(true) {
                            tracing::info!(device_id, "leader node reachable again");
                        }
                    }
                    Err(e) => {
                        health.mark(false);
                        tracing::error!(device_id, error = %e, "cannot reach leader node");
                    }
                }
            }
        }
    }
}

/// single consumer: send while healthy, hold while not.
///
/// once the queue closes the remainder is flushed if the leader is healthy
/// and discarded otherwise, so shutdown always completes.
async fn consume_outbound(
    leader: SocketAddr,
    outbound: Arc<OutboundQueue<Packet>>,
    mut health: HealthWatch,
    done: oneshot::Sender<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = outbound.closed() => break,
            alive = health.until(true) => if !alive { break },
        }

        let next = tokio::select! {
            next = outbound.pop() => next,
            _ = health.until(false) => continue,
        };
        let Some(packet) = next else { break };
        if let Err(e) = send_packet(leader, &packet).await {
            tracing::error!(error = %e, "error sending packet");
        }
    }

    let remaining = outbound.drain();
    if !remaining.is_empty() {
        if health.is_healthy() {
            tracing::info!(count = remaining.len(), "flushing outbound packets before exit");
            for packet in &remaining {
                if let Err(e) = send_packet(leader, packet).await {
                    tracing::error!(error = %e, "error sending packet");
                }
            }
        } else {
            tracing::warn!(count = remaining.len(), "leader unreachable, discarding outbound packets");
        }
    }
    let _ = done.send(());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SensorKind;
    use crate::sensor::FakeSensor;
    use crate::wire::Payload;
    use tokio::net::TcpListener;

    fn settings(port: u16) -> NodeSettings {
        NodeSettings {
            device_id: 5,
            leader_host: "127.0.0.1".into(),
            leader_port: port,
            ping_interval: Duration::from_millis(50),
            buffer_size: 8,
            drop_policy: DropPolicy::Newest,
        }
    }

    /// accept connections and hand every decoded packet to the test
    async fn fake_leader() -> (u16, mpsc::UnboundedReceiver<Packet>) {
        fake_leader_on(0).await
    }

    async fn fake_leader_on(port: u16) -> (u16, mpsc::UnboundedReceiver<Packet>) {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                if let Ok(packet) = wire::read_packet(&mut stream).await {
                    let _ = tx.send(packet);
                }
            }
        });
        (port, rx)
    }

    async fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn leader_host_resolution() {
        assert_eq!(
            resolve_leader("localhost", 9).unwrap(),
            "127.0.0.1:9".parse::<SocketAddr>().unwrap()
        );
        assert!(resolve_leader("10.0.0.2", 9).is_ok());
        assert!(resolve_leader("::1", 9).is_ok());
        assert!(matches!(resolve_leader("leader.lan", 9), Err(NodeError::InvalidHost(_))));
    }

    #[tokio::test]
    async fn invalid_host_fails_construction() {
        let mut s = settings(1);
        s.leader_host = "not a host".into();
        assert!(matches!(NodeAgent::new(s), Err(NodeError::InvalidHost(_))));
    }

    #[tokio::test]
    async fn announces_then_ships_readings() {
        let (port, mut packets) = fake_leader().await;
        let mut agent = NodeAgent::new(settings(port)).unwrap();
        let sensor = FakeSensor::with_interval("fake data", Duration::from_millis(30));
        agent.register_sensor(sensor.into()).await.unwrap();
        agent.start();

        let mut saw_announce = false;
        let reading = loop {
            let packet = tokio::time::timeout(Duration::from_secs(5), packets.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(packet.sender_id, 5);
            match packet.payload {
                Payload::Announce => saw_announce = true,
                Payload::SensorReading(r) => break r,
            }
        };
        assert!(saw_announce);
        assert_eq!(reading, Reading::new(SensorKind::Fake, "fake data"));
        assert!(agent.leader_healthy());

        tokio::time::timeout(Duration::from_secs(5), agent.shutdown()).await.unwrap();
    }

    #[tokio::test]
    async fn holds_packets_while_leader_unreachable() {
        let port = unused_port().await;
        let mut agent = NodeAgent::new(settings(port)).unwrap();
        agent.start();

        agent.readings_tx.as_ref().unwrap().send(Reading::new(SensorKind::Fake, "a")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!agent.leader_healthy());
        assert_eq!(agent.outbound().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_completes_without_leader() {
        let port = unused_port().await;
        let mut agent = NodeAgent::new(settings(port)).unwrap();
        agent
            .register_sensor(FakeSensor::with_interval("x", Duration::from_millis(10)).into())
            .await
            .unwrap();
        agent.start();
        tokio::time::sleep(Duration::from_millis(150)).await;

        tokio::time::timeout(Duration::from_secs(5), agent.shutdown()).await.unwrap();
    }

    #[tokio::test]
    async fn full_buffer_drops_newest() {
        let port = unused_port().await;
        let mut s = settings(port);
        s.buffer_size = 1;
        let mut agent = NodeAgent::new(s).unwrap();
        agent.start();

        let tx = agent.readings_tx.clone().unwrap();
        tx.send(Reading::new(SensorKind::Fake, "first")).await.unwrap();
        tx.send(Reading::new(SensorKind::Fake, "second")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let kept = agent.outbound().drain();
        assert_eq!(kept, vec![Packet::sensor_reading(5, Reading::new(SensorKind::Fake, "first"))]);
    }

    fn fake_reading(n: usize) -> Packet {
        Packet::sensor_reading(5, Reading::new(SensorKind::Fake, format!("r{n}")))
    }

    /// sensor readings received so far, announces skipped
    async fn collect_readings(packets: &mut mpsc::UnboundedReceiver<Packet>, wait: Duration) -> Vec<Packet> {
        let mut out = Vec::new();
        while let Ok(Some(packet)) = tokio::time::timeout(wait, packets.recv()).await {
            if matches!(packet.payload, Payload::SensorReading(_)) {
                out.push(packet);
            }
        }
        out
    }

    #[tokio::test]
    async fn closed_queue_is_flushed_to_healthy_leader() {
        let (port, mut packets) = fake_leader().await;
        let leader = SocketAddr::from(([127, 0, 0, 1], port));
        let outbound = Arc::new(OutboundQueue::new(8, DropPolicy::Newest));
        for n in 0..3 {
            outbound.offer(fake_reading(n));
        }
        outbound.close();

        let health = LeaderHealth::new();
        health.mark(true);
        let (done_tx, done_rx) = oneshot::channel();
        consume_outbound(leader, outbound.clone(), health.watch(), done_tx).await;
        done_rx.await.unwrap();

        let got = collect_readings(&mut packets, Duration::from_millis(500)).await;
        assert_eq!(got, (0..3).map(fake_reading).collect::<Vec<_>>());
        assert!(outbound.is_empty());
    }

    #[tokio::test]
    async fn closed_queue_is_discarded_when_leader_unhealthy() {
        let (port, mut packets) = fake_leader().await;
        let leader = SocketAddr::from(([127, 0, 0, 1], port));
        let outbound = Arc::new(OutboundQueue::new(8, DropPolicy::Newest));
        for n in 0..3 {
            outbound.offer(fake_reading(n));
        }
        outbound.close();

        // listener is up, but the heartbeat has not vouched for it
        let health = LeaderHealth::new();
        let (done_tx, done_rx) = oneshot::channel();
        tokio::time::timeout(
            Duration::from_secs(5),
            consume_outbound(leader, outbound.clone(), health.watch(), done_tx),
        )
        .await
        .unwrap();
        done_rx.await.unwrap();

        assert!(outbound.is_empty());
        assert!(collect_readings(&mut packets, Duration::from_millis(200)).await.is_empty());
    }

    #[tokio::test]
    async fn readings_held_while_down_reach_leader_once_it_is_up() {
        let port = unused_port().await;
        let mut agent = NodeAgent::new(settings(port)).unwrap();
        agent.start();

        let tx = agent.readings_tx.clone().unwrap();
        for n in 0..3 {
            tx.send(Reading::new(SensorKind::Fake, format!("r{n}"))).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(agent.outbound().len(), 3);

        let (_, mut packets) = fake_leader_on(port).await;
        for _ in 0..100 {
            if agent.leader_healthy() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(agent.leader_healthy());
        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), agent.shutdown()).await.unwrap();

        let got = collect_readings(&mut packets, Duration::from_millis(500)).await;
        assert_eq!(got, (0..3).map(fake_reading).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn shutdown_before_start_does_not_hang_on_full_fan_in() {
        let mut agent = NodeAgent::new(settings(unused_port().await)).unwrap();
        agent
            .register_sensor(FakeSensor::with_interval("x", Duration::from_millis(1)).into())
            .await
            .unwrap();
        // more than the fan-in and per-sensor channels can hold
        tokio::time::sleep(Duration::from_millis(300)).await;

        tokio::time::timeout(Duration::from_secs(5), agent.shutdown()).await.unwrap();
    }
}
