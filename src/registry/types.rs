use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::auth::Role;
use crate::websocket::Outbound;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Authenticating,
}

/// Why a connection was removed from the registry. Carried to the peer as a
/// close frame on every eviction except a transport-initiated close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictReason {
    Superseded,
    IdleTimeout,
    ProbeFailed,
    InvalidToken,
    PeerClosed,
    Shutdown,
}

impl EvictReason {
    pub fn close_code(&self) -> u16 {
        match self {
            // 1008 = policy violation
            EvictReason::InvalidToken => 1008,
            _ => 1000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EvictReason::Superseded => "session superseded by a new connection",
            EvictReason::IdleTimeout => "idle timeout",
            EvictReason::ProbeFailed => "liveness probe failed",
            EvictReason::InvalidToken => "invalid token",
            EvictReason::PeerClosed => "peer closed",
            EvictReason::Shutdown => "server shutting down",
        }
    }
}

/// One registered duplex channel to one authenticated party.
///
/// Owned exclusively by the registry; callers interact with it through
/// registry operations only.
pub struct ConnectionHandle {
    /// Distinguishes a live connection from a superseded one for the same user.
    pub connection_id: u64,
    pub user_id: i64,
    pub role: Role,
    pub session_id: String,
    pub status: ConnectionStatus,
    pub last_pong: DateTime<Utc>,
    sender: mpsc::Sender<Outbound>,
}

impl ConnectionHandle {
    pub fn new(user_id: i64, role: Role, session_id: String, sender: mpsc::Sender<Outbound>) -> Self {
        Self {
            connection_id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            user_id,
            role,
            session_id,
            status: ConnectionStatus::Connected,
            last_pong: Utc::now(),
            sender,
        }
    }

    /// Queue a frame without blocking. A full or closed outbound channel
    /// reports failure instead of waiting on a possibly dead peer.
    pub(crate) fn try_send(&self, frame: Outbound) -> bool {
        self.sender.try_send(frame).is_ok()
    }
}

/// Read-only view used by the heartbeat supervisor. Deliberately carries no
/// channel handle so a sweep can never send on an evicted connection.
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub connection_id: u64,
    pub user_id: i64,
    pub status: ConnectionStatus,
    pub last_pong: DateTime<Utc>,
}
