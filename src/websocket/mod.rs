mod handler;
mod message;

pub use handler::{admin_ws_handler, user_ws_handler};
pub use message::{Envelope, EventType, Outbound};
