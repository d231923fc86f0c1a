use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::broadcast;

use crate::config::StreamConfig;
use crate::notification::Notification;
use crate::registry::{ConnectionRegistry, DeliveryResult};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Consumes the backend change stream and routes each decoded notification
/// to its target user through the registry.
pub struct NotificationBridge {
    config: StreamConfig,
    registry: Arc<ConnectionRegistry>,
    /// Held from construction; a signal fired while the stream is down or
    /// reconnecting is buffered in the receiver, not missed.
    shutdown: broadcast::Receiver<()>,
}

impl NotificationBridge {
    pub fn new(
        config: StreamConfig,
        registry: Arc<ConnectionRegistry>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            registry,
            shutdown,
        }
    }

    /// Establish the broker subscription. Called once at startup, where a
    /// failure aborts initialization; the run loop reuses it to reconnect.
    pub async fn connect(&self) -> anyhow::Result<redis::aio::PubSub> {
        let client = redis::Client::open(self.config.url.as_str())?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(&self.config.topic).await?;

        tracing::info!(topic = %self.config.topic, "subscribed to notification stream");
        Ok(pubsub)
    }

    /// Consume until shutdown, reconnecting with a fixed delay whenever the
    /// stream drops. Takes the subscription established at startup, or
    /// connects itself when handed none.
    pub async fn run(mut self, mut pubsub: Option<redis::aio::PubSub>) {
        loop {
            let connection = match pubsub.take() {
                Some(existing) => existing,
                None => match self.connect().await {
                    Ok(connection) => connection,
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            delay_secs = RECONNECT_DELAY.as_secs(),
                            "stream reconnect failed, retrying"
                        );
                        tokio::select! {
                            _ = self.shutdown.recv() => return,
                            _ = tokio::time::sleep(RECONNECT_DELAY) => continue,
                        }
                    }
                },
            };

            if self.consume(connection).await {
                return;
            }
        }
    }

    /// Returns true when stopped by shutdown, false when the stream ended
    /// and a reconnect is needed.
    async fn consume(&mut self, mut pubsub: redis::aio::PubSub) -> bool {
        let mut messages = pubsub.on_message();

        loop {
            let message = tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("notification bridge received shutdown signal");
                    return true;
                }
                message = messages.next() => message,
            };

            match message {
                Some(message) => {
                    let payload: Vec<u8> = match message.get_payload() {
                        Ok(payload) => payload,
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to read stream payload");
                            continue;
                        }
                    };
                    self.handle_payload(&payload);
                }
                None => {
                    tracing::warn!("notification stream ended, reconnecting");
                    return false;
                }
            }
        }
    }

    /// Decode one raw payload and hand it to the registry. A message that
    /// does not decode is dropped so it can never halt the consume loop.
    fn handle_payload(&self, payload: &[u8]) {
        let notification = match Notification::decode(payload) {
            Ok(notification) => notification,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable stream message");
                return;
            }
        };

        let user_id = notification.user_id;
        match self.registry.deliver(user_id, notification) {
            DeliveryResult::Delivered => {
                tracing::debug!(user_id, "stream notification routed");
            }
            DeliveryResult::Skipped => {
                tracing::debug!(user_id, "stream notification skipped, target not connected");
            }
        }
    }
}
