mod settings;

pub use settings::{
    HeartbeatConfig, ServerConfig, SessionServiceConfig, Settings, StreamConfig,
};
