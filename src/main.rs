use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use notification_gateway::auth::HttpAuthVerifier;
use notification_gateway::bridge::NotificationBridge;
use notification_gateway::config::Settings;
use notification_gateway::registry::EvictReason;
use notification_gateway::server::{create_app, AppState};
use notification_gateway::tasks::HeartbeatSupervisor;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    init_tracing();

    // Load configuration
    let settings = Settings::new()?;
    tracing::info!("Configuration loaded");

    // Create application state
    let verifier = Arc::new(HttpAuthVerifier::new(&settings.session)?);
    let state = AppState::new(settings.clone(), verifier);
    tracing::info!("Application state initialized");

    let (shutdown_tx, _) = broadcast::channel(1);

    // The broker must be reachable at startup; afterwards the bridge
    // reconnects on its own.
    let bridge = NotificationBridge::new(
        settings.stream.clone(),
        state.registry.clone(),
        shutdown_tx.subscribe(),
    );
    let pubsub = bridge.connect().await?;
    let bridge_handle = tokio::spawn(bridge.run(Some(pubsub)));

    // Start heartbeat supervisor in background
    let heartbeat = HeartbeatSupervisor::new(
        settings.heartbeat.clone(),
        state.registry.clone(),
        shutdown_tx.subscribe(),
    );
    let heartbeat_handle = tokio::spawn(heartbeat.run());

    // Create Axum app
    let app = create_app(state.clone());

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Gateway listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(shutdown_tx))
        .await?;

    // Background loops stop before the connection sweep so no probe or
    // delivery races the shutdown.
    tracing::info!("Waiting for background tasks to finish...");
    let _ = tokio::join!(bridge_handle, heartbeat_handle);

    state.registry.evict_all(EvictReason::Shutdown);

    tracing::info!("Gateway shutdown complete");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal_handler(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    // Stop the heartbeat supervisor and the notification bridge
    let _ = shutdown_tx.send(());
}
