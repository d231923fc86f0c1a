use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Admin,
}

/// Verification result returned by the session service.
///
/// Ephemeral by design: never stored, recomputed on every verification call
/// including mid-session token refreshes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedToken {
    pub user_id: i64,
    pub role: Role,
    pub session_id: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl DecodedToken {
    pub fn is_expired(&self) -> bool {
        self.exp < chrono::Utc::now().timestamp()
    }
}
