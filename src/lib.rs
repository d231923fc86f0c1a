// Leaf components
pub mod auth;
pub mod config;
pub mod error;
pub mod notification;

// Connection state and routing
pub mod registry;

// Transport and stream consumption
pub mod bridge;
pub mod websocket;

// Application wiring
pub mod server;
pub mod tasks;
