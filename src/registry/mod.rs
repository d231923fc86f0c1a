mod registry;
mod types;

pub use registry::{ConnectionRegistry, DeliveryResult};
pub use types::{ConnectionHandle, ConnectionSnapshot, ConnectionStatus, EvictReason};
