use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;

use crate::notification::Notification;
use crate::websocket::{Envelope, EventType, Outbound};

use super::{ConnectionHandle, ConnectionSnapshot, ConnectionStatus, EvictReason};

/// Outcome of a best-effort delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryResult {
    Delivered,
    /// Target absent or its channel no longer accepts frames. Never an error.
    Skipped,
}

/// Single source of truth for "is this user currently reachable".
///
/// Keyed by user id with at most one live connection per key; registering a
/// new connection for a registered user closes the previous channel. The
/// shard locking of the underlying map makes every operation atomic per key
/// while operations on unrelated keys stay concurrent.
pub struct ConnectionRegistry {
    connections: DashMap<i64, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Insert or replace the entry for the handle's user. The superseded
    /// channel, if any, is closed with a superseded-session close frame.
    /// The new channel is greeted with an authentication-success event.
    pub fn register(&self, handle: ConnectionHandle) {
        let user_id = handle.user_id;
        let role = handle.role;

        handle.try_send(Outbound::Envelope(Envelope::with_data(
            EventType::AuthenticationSuccess,
            json!({ "message": "connection established" }),
        )));

        if let Some(old) = self.connections.insert(user_id, handle) {
            old.try_send(Outbound::Close(EvictReason::Superseded));
            tracing::info!(user_id, "existing connection superseded");
        }

        tracing::info!(user_id, role = ?role, "connection registered");
    }

    /// Best-effort fan-out of one notification: sends if the user is
    /// reachable, silently skips otherwise. Never blocks, never fails.
    pub fn deliver(&self, user_id: i64, notification: Notification) -> DeliveryResult {
        match self.connections.get(&user_id) {
            Some(handle) if handle.try_send(Outbound::Notification(notification)) => {
                tracing::debug!(user_id, "notification delivered");
                DeliveryResult::Delivered
            }
            Some(_) => {
                tracing::debug!(user_id, "outbound channel not accepting frames, notification dropped");
                DeliveryResult::Skipped
            }
            None => {
                tracing::debug!(user_id, "user not connected, notification dropped");
                DeliveryResult::Skipped
            }
        }
    }

    /// Remove the entry if present and close its channel. Evicting an absent
    /// user is a no-op.
    pub fn evict(&self, user_id: i64, reason: EvictReason) {
        if let Some((_, mut handle)) = self.connections.remove(&user_id) {
            handle.status = ConnectionStatus::Disconnected;
            handle.try_send(Outbound::Close(reason));
            tracing::info!(user_id, reason = reason.as_str(), "connection evicted");
        }
    }

    /// Evict only while `connection_id` is still the registered channel for
    /// the user. Lets a superseded connection's teardown run without
    /// touching its replacement.
    pub fn evict_connection(&self, user_id: i64, connection_id: u64, reason: EvictReason) {
        let removed = self
            .connections
            .remove_if(&user_id, |_, handle| handle.connection_id == connection_id);

        if let Some((_, mut handle)) = removed {
            handle.status = ConnectionStatus::Disconnected;
            handle.try_send(Outbound::Close(reason));
            tracing::info!(user_id, reason = reason.as_str(), "connection evicted");
        }
    }

    /// Record a liveness pong. A pong racing its own eviction is a no-op.
    pub fn touch_pong(&self, user_id: i64) {
        if let Some(mut handle) = self.connections.get_mut(&user_id) {
            handle.last_pong = Utc::now();
        }
    }

    pub fn set_status(&self, user_id: i64, status: ConnectionStatus) {
        if let Some(mut handle) = self.connections.get_mut(&user_id) {
            handle.status = status;
        }
    }

    /// Queue a liveness probe. Reports `false` only when the registered
    /// channel refused the frame; an absent user is not a probe failure.
    pub fn send_ping(&self, user_id: i64) -> bool {
        match self.connections.get(&user_id) {
            Some(handle) => handle.try_send(Outbound::Envelope(Envelope::event(EventType::Ping))),
            None => true,
        }
    }

    /// Copy-on-read view for the heartbeat sweep, safe under concurrent
    /// register/evict.
    pub fn snapshot(&self) -> Vec<ConnectionSnapshot> {
        self.connections
            .iter()
            .map(|entry| ConnectionSnapshot {
                connection_id: entry.value().connection_id,
                user_id: *entry.key(),
                status: entry.value().status,
                last_pong: entry.value().last_pong,
            })
            .collect()
    }

    /// Shutdown sweep: close every remaining connection.
    pub fn evict_all(&self, reason: EvictReason) {
        let users: Vec<i64> = self.connections.iter().map(|entry| *entry.key()).collect();
        for user_id in users {
            self.evict(user_id, reason);
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::notification::{Action, TableName};
    use tokio::sync::mpsc;

    fn notification(user_id: i64) -> Notification {
        Notification {
            user_id,
            table: TableName::Users,
            action: Action::Update,
        }
    }

    fn connect(
        registry: &ConnectionRegistry,
        user_id: i64,
    ) -> (u64, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        let handle = ConnectionHandle::new(user_id, Role::User, format!("sess-{user_id}"), tx);
        let connection_id = handle.connection_id;
        registry.register(handle);
        (connection_id, rx)
    }

    fn expect_auth_success(rx: &mut mpsc::Receiver<Outbound>) {
        match rx.try_recv().unwrap() {
            Outbound::Envelope(envelope) => {
                assert_eq!(envelope.event, EventType::AuthenticationSuccess)
            }
            other => panic!("expected authentication success, got {other:?}"),
        }
    }

    #[test]
    fn test_register_greets_new_connection() {
        let registry = ConnectionRegistry::new();
        let (_, mut rx) = connect(&registry, 1);
        expect_auth_success(&mut rx);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_replaces_and_closes_old_connection() {
        let registry = ConnectionRegistry::new();
        let (_, mut first) = connect(&registry, 1);
        expect_auth_success(&mut first);

        let (_, mut second) = connect(&registry, 1);
        expect_auth_success(&mut second);

        // Old channel is told it was superseded.
        match first.try_recv().unwrap() {
            Outbound::Close(reason) => assert_eq!(reason, EvictReason::Superseded),
            other => panic!("expected close frame, got {other:?}"),
        }

        // Delivery only ever reaches the replacement.
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.deliver(1, notification(1)), DeliveryResult::Delivered);
        assert!(first.try_recv().is_err());
        assert!(matches!(second.try_recv().unwrap(), Outbound::Notification(_)));
    }

    #[test]
    fn test_deliver_to_absent_user_is_skipped() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.deliver(99, notification(99)), DeliveryResult::Skipped);
    }

    #[test]
    fn test_deliver_to_closed_channel_is_skipped() {
        let registry = ConnectionRegistry::new();
        let (_, rx) = connect(&registry, 1);
        drop(rx);
        assert_eq!(registry.deliver(1, notification(1)), DeliveryResult::Skipped);
    }

    #[test]
    fn test_evict_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (_, mut rx) = connect(&registry, 1);
        expect_auth_success(&mut rx);

        registry.evict(1, EvictReason::IdleTimeout);
        assert!(registry.is_empty());
        match rx.try_recv().unwrap() {
            Outbound::Close(reason) => assert_eq!(reason, EvictReason::IdleTimeout),
            other => panic!("expected close frame, got {other:?}"),
        }

        // Second eviction is externally unobservable.
        registry.evict(1, EvictReason::IdleTimeout);
        assert!(registry.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_evict_connection_ignores_superseded_teardown() {
        let registry = ConnectionRegistry::new();
        let (old_id, _old_rx) = connect(&registry, 1);
        let (_, mut new_rx) = connect(&registry, 1);
        expect_auth_success(&mut new_rx);

        // The superseded connection's close handler fires late; the
        // replacement must survive it.
        registry.evict_connection(1, old_id, EvictReason::PeerClosed);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.deliver(1, notification(1)), DeliveryResult::Delivered);
    }

    #[test]
    fn test_touch_pong_after_evict_is_noop() {
        let registry = ConnectionRegistry::new();
        let (_, _rx) = connect(&registry, 1);
        registry.evict(1, EvictReason::PeerClosed);
        // Late pong racing the eviction.
        registry.touch_pong(1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_touch_pong_advances_timestamp() {
        let registry = ConnectionRegistry::new();
        let (_, _rx) = connect(&registry, 1);

        let before = registry.snapshot()[0].last_pong;
        registry.touch_pong(1);
        let after = registry.snapshot()[0].last_pong;
        assert!(after >= before);
    }

    #[test]
    fn test_send_ping_reports_refused_frame() {
        let registry = ConnectionRegistry::new();
        let (_, rx) = connect(&registry, 1);

        assert!(registry.send_ping(1));
        drop(rx);
        assert!(!registry.send_ping(1));

        // Probing an absent user is not a failure.
        assert!(registry.send_ping(99));
    }

    #[test]
    fn test_evict_all_sweeps_every_connection() {
        let registry = ConnectionRegistry::new();
        let mut receivers = Vec::new();
        for user_id in 1..=3 {
            let (_, mut rx) = connect(&registry, user_id);
            expect_auth_success(&mut rx);
            receivers.push(rx);
        }

        registry.evict_all(EvictReason::Shutdown);
        assert!(registry.is_empty());
        for mut rx in receivers {
            match rx.try_recv().unwrap() {
                Outbound::Close(reason) => assert_eq!(reason, EvictReason::Shutdown),
                other => panic!("expected close frame, got {other:?}"),
            }
        }
    }
}
