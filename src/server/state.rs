use std::sync::Arc;

use crate::auth::AuthVerifier;
use crate::config::Settings;
use crate::registry::ConnectionRegistry;

/// Top-level composition: one registry instance with an explicit lifecycle,
/// passed by reference everywhere it is needed.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<ConnectionRegistry>,
    pub verifier: Arc<dyn AuthVerifier>,
}

impl AppState {
    pub fn new(settings: Settings, verifier: Arc<dyn AuthVerifier>) -> Self {
        Self {
            settings: Arc::new(settings),
            registry: Arc::new(ConnectionRegistry::new()),
            verifier,
        }
    }
}
