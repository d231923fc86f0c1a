use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Request-level failures of the gateway. None of these are fatal to the
/// process; each one resolves the single request it concerns.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("WebSocket upgrade required")]
    MalformedUpgrade,

    #[error("Route not found")]
    RouteNotFound,

    #[error("Missing authentication token")]
    MissingToken,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Insufficient role")]
    InsufficientRole,

    #[error("Failed to upgrade connection")]
    UpgradeFailed,
}

impl GatewayError {
    fn status(&self) -> StatusCode {
        match self {
            GatewayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::MalformedUpgrade => StatusCode::UPGRADE_REQUIRED,
            GatewayError::RouteNotFound => StatusCode::NOT_FOUND,
            GatewayError::MissingToken => StatusCode::UNAUTHORIZED,
            GatewayError::InvalidToken => StatusCode::UNAUTHORIZED,
            GatewayError::InsufficientRole => StatusCode::FORBIDDEN,
            GatewayError::UpgradeFailed => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();

        tracing::warn!(
            status = %status.as_u16(),
            reason = %self,
            "request rejected"
        );

        (status, self.to_string()).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(GatewayError::MalformedUpgrade.status(), StatusCode::UPGRADE_REQUIRED);
        assert_eq!(GatewayError::RouteNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(GatewayError::MissingToken.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(GatewayError::InvalidToken.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(GatewayError::InsufficientRole.status(), StatusCode::FORBIDDEN);
        assert_eq!(GatewayError::UpgradeFailed.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
