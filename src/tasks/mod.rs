mod heartbeat;

pub use heartbeat::HeartbeatSupervisor;
