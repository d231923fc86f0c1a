use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    pub session: SessionServiceConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// External session-verification service.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionServiceConfig {
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Message-stream broker the notification bridge subscribes to.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_stream_url")]
    pub url: String,
    #[serde(default = "default_stream_topic")]
    pub topic: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval between liveness probe rounds, in seconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,
    /// Evict a connection whose last pong is older than this. Must exceed the interval.
    #[serde(default = "default_pong_deadline")]
    pub pong_deadline_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_request_timeout() -> u64 {
    5
}

fn default_stream_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_stream_topic() -> String {
    "user_credentials".to_string()
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_pong_deadline() -> u64 {
    35
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8081)?
            .set_default("stream.url", "redis://localhost:6379")?
            .set_default("stream.topic", "user_credentials")?
            .set_default("heartbeat.interval_secs", 30)?
            .set_default("heartbeat.pong_deadline_secs", 35)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // SERVER__PORT, SESSION__BASE_URL, STREAM__URL, HEARTBEAT__INTERVAL_SECS, etc.
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.session.base_url.trim().is_empty() {
            return Err(ConfigError::Message(
                "session.base_url must not be empty".to_string(),
            ));
        }
        if self.heartbeat.interval_secs == 0 {
            return Err(ConfigError::Message(
                "heartbeat.interval_secs must be at least 1".to_string(),
            ));
        }
        if self.heartbeat.pong_deadline_secs <= self.heartbeat.interval_secs {
            return Err(ConfigError::Message(format!(
                "heartbeat.pong_deadline_secs ({}) must exceed heartbeat.interval_secs ({})",
                self.heartbeat.pong_deadline_secs, self.heartbeat.interval_secs
            )));
        }
        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            session: SessionServiceConfig::default(),
            stream: StreamConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for SessionServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8082".to_string(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: default_stream_url(),
            topic: default_stream_topic(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat_interval(),
            pong_deadline_secs: default_pong_deadline(),
        }
    }
}
