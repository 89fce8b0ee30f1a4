use futures::StreamExt;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::services::progress::{ProgressEvent, ProgressHub};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Progress event on the Redis channel, tagged with the publishing process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub origin: String,
    pub event: ProgressEvent,
}

/// Forwards progress events between processes over Redis pub/sub.
///
/// Worker processes publish everything their hub sees; API processes
/// ingest the channel into their own hub so WebSocket subscribers get
/// events from jobs running elsewhere.
pub struct ProgressRelay {
    client: redis::Client,
    channel: String,
    origin: String,
}

impl ProgressRelay {
    pub fn new(client: redis::Client, channel: &str, origin: &str) -> Self {
        Self {
            client,
            channel: channel.to_string(),
            origin: origin.to_string(),
        }
    }

    /// Publish tapped hub events until `shutdown` fires or the tap closes.
    pub async fn publish_from(
        &self,
        mut tap: mpsc::UnboundedReceiver<ProgressEvent>,
        shutdown: CancellationToken,
    ) {
        let mut conn = None;
        loop {
            // Queued events go out before a pending shutdown is honoured.
            let event = tokio::select! {
                biased;
                event = tap.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                _ = shutdown.cancelled() => break,
            };

            let payload = match serde_json::to_string(&RelayEnvelope {
                origin: self.origin.clone(),
                event,
            }) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode progress event");
                    continue;
                }
            };

            if conn.is_none() {
                match self.client.get_multiplexed_async_connection().await {
                    Ok(c) => conn = Some(c),
                    Err(e) => {
                        tracing::warn!(error = %e, "Progress relay cannot reach Redis, event dropped");
                        continue;
                    }
                }
            }
            if let Some(c) = conn.as_mut() {
                if let Err(e) = c.publish::<_, _, ()>(&self.channel, &payload).await {
                    tracing::warn!(error = %e, "Failed to publish progress event");
                    conn = None;
                }
            }
        }
        tracing::info!(channel = %self.channel, "Progress relay publisher stopped");
    }

    /// Feed events from other processes into `hub` until `shutdown` fires.
    pub async fn ingest_into(&self, hub: Arc<ProgressHub>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                res = self.ingest_once(&hub) => {
                    if let Err(e) = res {
                        tracing::warn!(error = %e, "Progress relay subscription lost, reconnecting");
                    }
                }
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }
        tracing::info!(channel = %self.channel, "Progress relay subscriber stopped");
    }

    async fn ingest_once(&self, hub: &ProgressHub) -> Result<(), redis::RedisError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;
        tracing::info!(channel = %self.channel, "Progress relay subscribed");

        let mut messages = pubsub.on_message();
        while let Some(msg) = messages.next().await {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(error = %e, "Unreadable progress relay message");
                    continue;
                }
            };
            if let Some(event) = self.accept(&payload) {
                hub.publish_relayed(event);
            }
        }
        Ok(())
    }

    /// Decode a relay payload, ignoring our own events.
    fn accept(&self, payload: &str) -> Option<ProgressEvent> {
        match serde_json::from_str::<RelayEnvelope>(payload) {
            Ok(envelope) if envelope.origin == self.origin => None,
            Ok(envelope) => Some(envelope.event),
            Err(e) => {
                tracing::warn!(error = %e, "Malformed progress relay message");
                None
            }
        }
    }
}
