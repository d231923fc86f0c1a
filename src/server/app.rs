use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::error::GatewayError;
use crate::websocket::{admin_ws_handler, user_ws_handler};

use super::AppState;

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // WebSocket endpoints, one per route role
        .route("/ws/user", get(user_ws_handler))
        .route("/ws/admin", get(admin_ws_handler))
        .fallback(unknown_route)
        // Add middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Add state
        .with_state(state)
}

async fn unknown_route() -> GatewayError {
    GatewayError::RouteNotFound
}
