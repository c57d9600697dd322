//! node -> leader flows over real loopback sockets.

use quill::domain::{Reading, SensorKind};
use quill::leader::{CloseHandle, LeaderRegistry, LeaderServer};
use quill::node::{send_packet, DropPolicy, NodeAgent, NodeSettings};
use quill::store::{MemoryStore, ReadingSink};
use quill::wire::Packet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

struct Leader {
    addr: SocketAddr,
    registry: Arc<LeaderRegistry>,
    store: Arc<MemoryStore>,
    close: CloseHandle,
    task: JoinHandle<Result<(), quill::error::LeaderError>>,
}

impl Leader {
    async fn start(node_timeout: Duration) -> Self {
        let registry = Arc::new(LeaderRegistry::new(node_timeout));
        let store = Arc::new(MemoryStore::new());
        let server = LeaderServer::bind("127.0.0.1:0".parse().unwrap(), registry.clone(), store.clone())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let close = server.close_handle();
        let task = tokio::spawn(server.run());
        Self { addr, registry, store, close, task }
    }

    async fn stop(self) {
        self.close.close();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn node_ages_out_and_comes_back() {
    let leader = Leader::start(Duration::from_secs(1)).await;

    send_packet(leader.addr, &Packet::announce(5)).await.unwrap();
    eventually("registration", || leader.registry.active_count() == 1).await;

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(leader.registry.active_count(), 0);
    assert!(!leader.registry.get(5).unwrap().active);

    send_packet(leader.addr, &Packet::announce(5)).await.unwrap();
    eventually("reconnect", || leader.registry.active_count() == 1).await;

    leader.stop().await;
}

#[tokio::test]
async fn atmospheric_reading_lands_in_store() {
    let leader = Leader::start(Duration::from_secs(30)).await;

    send_packet(leader.addr, &Packet::announce(2)).await.unwrap();
    let now = chrono::Utc::now().timestamp();
    let line = format!("{now},22.5,41.0,1009.2,130.0,95.0");
    send_packet(leader.addr, &Packet::sensor_reading(2, Reading::new(SensorKind::Atmospheric, line)))
        .await
        .unwrap();

    eventually("stored reading", || leader.store.len() == 1).await;
    let recent = leader.store.recent_readings(Duration::from_secs(60)).unwrap();
    assert_eq!(recent[0].timestamp, now);
    assert_eq!(recent[0].pressure, 1009.2);
    assert_eq!(
        leader.registry.get(2).unwrap().sensor_kind,
        Some(SensorKind::Atmospheric)
    );

    leader.stop().await;
}

#[cfg(unix)]
#[tokio::test]
async fn agent_ships_sensor_driver_output() {
    use quill::sensor::AtmosphericSensor;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    let leader = Leader::start(Duration::from_secs(30)).await;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "#!/bin/sh\nwhile true; do echo \"$(date +%s),20.0,50.0,1000.0,100.0,80.0\"; sleep 1; done"
    )
    .unwrap();
    let script = file.into_temp_path();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut agent = NodeAgent::new(NodeSettings {
        device_id: 7,
        leader_host: "127.0.0.1".into(),
        leader_port: leader.addr.port(),
        ping_interval: Duration::from_millis(100),
        buffer_size: 16,
        drop_policy: DropPolicy::Newest,
    })
    .unwrap();
    agent
        .register_sensor(AtmosphericSensor::new(script.to_path_buf(), 1).into())
        .await
        .unwrap();
    agent.start();

    eventually("heartbeat", || leader.registry.active_count() == 1).await;
    eventually("sensor reading", || !leader.store.by_device(7).is_empty()).await;
    assert_eq!(leader.store.by_device(7)[0].temperature, 20.0);

    tokio::time::timeout(Duration::from_secs(10), agent.shutdown()).await.unwrap();
    leader.stop().await;
}
