use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;

use crate::config::HeartbeatConfig;
use crate::registry::{ConnectionRegistry, ConnectionSnapshot, EvictReason};

/// Recurring liveness task.
///
/// One timer for the whole registry rather than per-connection timers, so
/// eviction decisions stay centralized and scheduling overhead stays flat.
pub struct HeartbeatSupervisor {
    config: HeartbeatConfig,
    registry: Arc<ConnectionRegistry>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatSupervisor {
    pub fn new(
        config: HeartbeatConfig,
        registry: Arc<ConnectionRegistry>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            registry,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(Duration::from_secs(self.config.interval_secs));

        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            interval_secs = self.config.interval_secs,
            pong_deadline_secs = self.config.pong_deadline_secs,
            "heartbeat supervisor started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("heartbeat supervisor received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.sweep();
                }
            }
        }

        tracing::info!("heartbeat supervisor stopped");
    }

    fn sweep(&self) {
        self.sweep_connections(self.registry.snapshot());
    }

    /// One probe round over a registry snapshot: evict connections past the
    /// pong deadline, ping the rest. A refused ping means the peer is
    /// presumed gone and is evicted immediately rather than retried.
    /// Evictions go through the snapshotted connection id, so an entry
    /// superseded after the snapshot cannot take its replacement down.
    fn sweep_connections(&self, connections: Vec<ConnectionSnapshot>) {
        let deadline = chrono::Duration::seconds(self.config.pong_deadline_secs as i64);
        let now = Utc::now();
        let mut probed = 0usize;
        let mut evicted = 0usize;

        for connection in connections {
            if now.signed_duration_since(connection.last_pong) > deadline {
                self.registry.evict_connection(
                    connection.user_id,
                    connection.connection_id,
                    EvictReason::IdleTimeout,
                );
                evicted += 1;
            } else if !self.registry.send_ping(connection.user_id) {
                self.registry.evict_connection(
                    connection.user_id,
                    connection.connection_id,
                    EvictReason::ProbeFailed,
                );
                evicted += 1;
            } else {
                probed += 1;
            }
        }

        if probed > 0 || evicted > 0 {
            tracing::debug!(probed, evicted, "heartbeat sweep completed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::registry::ConnectionHandle;
    use crate::websocket::{EventType, Outbound};
    use tokio::sync::mpsc;

    fn supervisor(registry: Arc<ConnectionRegistry>) -> HeartbeatSupervisor {
        let (_tx, rx) = broadcast::channel(1);
        HeartbeatSupervisor::new(HeartbeatConfig::default(), registry, rx)
    }

    fn register(registry: &ConnectionRegistry, user_id: i64) -> mpsc::Receiver<Outbound> {
        let (tx, mut rx) = mpsc::channel(8);
        registry.register(ConnectionHandle::new(
            user_id,
            Role::User,
            format!("sess-{user_id}"),
            tx,
        ));
        // Drain the registration greeting.
        rx.try_recv().unwrap();
        rx
    }

    #[test]
    fn test_fresh_connection_is_probed_not_evicted() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut rx = register(&registry, 1);

        supervisor(registry.clone()).sweep();

        assert_eq!(registry.len(), 1);
        match rx.try_recv().unwrap() {
            Outbound::Envelope(envelope) => assert_eq!(envelope.event, EventType::Ping),
            other => panic!("expected ping, got {other:?}"),
        }
    }

    #[test]
    fn test_connection_past_deadline_is_evicted() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, mut rx) = mpsc::channel(8);
        let mut handle = ConnectionHandle::new(1, Role::User, "sess-1".to_string(), tx);
        // Last pong well past the deadline.
        handle.last_pong = Utc::now() - chrono::Duration::seconds(60);
        registry.register(handle);
        rx.try_recv().unwrap();

        supervisor(registry.clone()).sweep();

        assert!(registry.is_empty());
        match rx.try_recv().unwrap() {
            Outbound::Close(reason) => assert_eq!(reason, EvictReason::IdleTimeout),
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[test]
    fn test_sweep_over_stale_snapshot_spares_replacement() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, _old_rx) = mpsc::channel(8);
        let mut old = ConnectionHandle::new(1, Role::User, "sess-1".to_string(), tx);
        old.last_pong = Utc::now() - chrono::Duration::seconds(60);
        registry.register(old);

        let stale_view = registry.snapshot();

        // Superseded between the snapshot and the eviction pass.
        let mut fresh_rx = register(&registry, 1);

        supervisor(registry.clone()).sweep_connections(stale_view);

        // The stale entry's deadline breach must not touch the replacement.
        assert_eq!(registry.len(), 1);
        assert!(fresh_rx.try_recv().is_err());
    }

    #[test]
    fn test_refused_probe_evicts_immediately() {
        let registry = Arc::new(ConnectionRegistry::new());
        let rx = register(&registry, 1);
        drop(rx); // peer gone, channel refuses frames

        supervisor(registry.clone()).sweep();

        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_supervisor_stops_on_shutdown() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = HeartbeatSupervisor::new(HeartbeatConfig::default(), registry, shutdown_rx);

        let handle = tokio::spawn(task.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("supervisor should stop")
            .expect("supervisor should not panic");
    }
}
