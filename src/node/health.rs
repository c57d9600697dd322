use tokio::sync::watch;

/// leader reachability as last observed by the heartbeat.
///
/// written only by the heartbeat task, watched by the outbound consumer.
/// starts unhealthy: nothing is sent until the first announce succeeds.
#[derive(Debug)]
pub struct LeaderHealth {
    tx: watch::Sender<bool>,
}

impl Default for LeaderHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaderHealth {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// store the new state, returning the previous one
    pub fn mark(&self, healthy: bool) -> bool {
        self.tx.send_replace(healthy)
    }

    pub fn is_healthy(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn watch(&self) -> HealthWatch {
        HealthWatch { rx: self.tx.subscribe() }
    }
}

/// read side handed to consumers
pub struct HealthWatch {
    rx: watch::Receiver<bool>,
}

impl HealthWatch {
    pub fn is_healthy(&self) -> bool {
        *self.rx.borrow()
    }

    /// resolves once the flag equals `healthy`; false if the writer is gone
    pub async fn until(&mut self, healthy: bool) -> bool {
        self.rx.wait_for(|h| *h == healthy).await.is_ok()
    }
}
