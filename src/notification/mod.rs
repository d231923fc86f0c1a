use serde::{Deserialize, Serialize};

/// A backend data-change event targeted at one user.
///
/// Immutable once decoded; delivery is fire-and-forget with at-most-once
/// semantics. The decoded object is forwarded to the target connection
/// verbatim, not wrapped in an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: i64,
    pub table: TableName,
    pub action: Action,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableName {
    Users,
    UserCredentials,
    UserStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl Notification {
    /// Decode a raw stream payload.
    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_stream_payload() {
        let payload = br#"{"user_id": 7, "table": "users", "action": "UPDATE"}"#;
        let notification = Notification::decode(payload).unwrap();
        assert_eq!(notification.user_id, 7);
        assert_eq!(notification.table, TableName::Users);
        assert_eq!(notification.action, Action::Update);
    }

    #[test]
    fn test_serialization_round_trips_verbatim() {
        let notification = Notification {
            user_id: 42,
            table: TableName::UserCredentials,
            action: Action::Delete,
        };
        let text = serde_json::to_string(&notification).unwrap();
        assert_eq!(
            text,
            r#"{"user_id":42,"table":"user_credentials","action":"DELETE"}"#
        );
    }

    #[test]
    fn test_decode_rejects_unknown_table() {
        let payload = br#"{"user_id": 7, "table": "orders", "action": "UPDATE"}"#;
        assert!(Notification::decode(payload).is_err());
    }

    #[test]
    fn test_decode_rejects_non_json() {
        assert!(Notification::decode(b"not json").is_err());
    }
}
