use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::notification::Notification;
use crate::registry::EvictReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Ping,
    Pong,
    TokenUpdate,
    Notification,
    AuthenticationSuccess,
    AuthenticationFailed,
    Error,
}

/// Wire envelope shared by both directions of a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn event(event: EventType) -> Self {
        Self {
            event,
            data: None,
            token: None,
            error: None,
        }
    }

    pub fn with_data(event: EventType, data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::event(event)
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::event(EventType::Error)
        }
    }
}

/// Frames queued to a connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    Envelope(Envelope),
    /// Decoded stream notification, forwarded verbatim.
    Notification(Notification),
    /// Terminates the writer after emitting a close frame.
    Close(EvictReason),
}
