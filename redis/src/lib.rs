//! Redis pub/sub event bus for gridcast.
//!
//! Implements the [`EventBus`] trait over Redis channels, one channel per
//! stream (`game:<gid>`, `room:<rid>`). Redis pub/sub matches the bus
//! contract exactly: subscribers receive messages published after they
//! subscribed, there is no replay, and delivery is best-effort; the event
//! store remains the source of truth and receivers dedup by `(stream,
//! seq)`.
//!
//! ```text
//! instance A ── publish game:g1 ──> Redis ──> instance B relay ──> local subscribers
//! ```
//!
//! Envelopes travel as JSON, the same shape the rest of the system speaks.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use futures::StreamExt;
use gridcast_core::bus::{BusEnvelope, BusError, BusFuture, EnvelopeStream, EventBus};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

/// Redis-backed pub/sub bus.
///
/// Publishing rides a shared [`ConnectionManager`] (auto-reconnecting
/// multiplexed connection); each subscription opens its own pub/sub
/// connection, which Redis requires.
#[derive(Clone)]
pub struct RedisEventBus {
    client: Client,
    publisher: ConnectionManager,
}

impl RedisEventBus {
    /// Connect to Redis at `redis_url` (e.g. `redis://127.0.0.1:6379`).
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if the URL is invalid or the
    /// initial connection cannot be established.
    pub async fn new(redis_url: &str) -> Result<Self, BusError> {
        let client = Client::open(redis_url)
            .map_err(|e| BusError::ConnectionFailed(format!("invalid Redis URL: {e}")))?;

        let publisher = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| BusError::ConnectionFailed(format!("Redis connect failed: {e}")))?;

        tracing::info!(url = %redis_url, "Redis event bus connected");
        Ok(Self { client, publisher })
    }
}

impl EventBus for RedisEventBus {
    fn publish(&self, channel: &str, envelope: &BusEnvelope) -> BusFuture<'_, ()> {
        let channel = channel.to_string();
        let payload = serde_json::to_vec(envelope);
        let mut conn = self.publisher.clone();

        Box::pin(async move {
            let payload = payload.map_err(|e| BusError::PublishFailed {
                channel: channel.clone(),
                reason: format!("envelope serialization failed: {e}"),
            })?;

            let receivers: i64 =
                conn.publish(&channel, payload)
                    .await
                    .map_err(|e| BusError::PublishFailed {
                        channel: channel.clone(),
                        reason: e.to_string(),
                    })?;

            tracing::trace!(channel = %channel, receivers, "Envelope published");
            Ok(())
        })
    }

    fn subscribe(&self, channels: &[&str]) -> BusFuture<'_, EnvelopeStream> {
        let channels: Vec<String> = channels.iter().map(|c| (*c).to_string()).collect();
        let client = self.client.clone();

        Box::pin(async move {
            let mut pubsub =
                client
                    .get_async_pubsub()
                    .await
                    .map_err(|e| BusError::SubscriptionFailed {
                        channels: channels.clone(),
                        reason: format!("pub/sub connection failed: {e}"),
                    })?;

            for channel in &channels {
                pubsub
                    .subscribe(channel)
                    .await
                    .map_err(|e| BusError::SubscriptionFailed {
                        channels: channels.clone(),
                        reason: format!("subscribe '{channel}' failed: {e}"),
                    })?;
            }

            tracing::debug!(channels = ?channels, "Subscribed to Redis channels");

            let stream = pubsub.into_on_message().map(|msg| {
                let payload = msg.get_payload_bytes();
                serde_json::from_slice::<BusEnvelope>(payload)
                    .map_err(|e| BusError::Decode(format!("envelope decode failed: {e}")))
            });

            Ok(Box::pin(stream) as EnvelopeStream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_event_bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedisEventBus>();
        assert_sync::<RedisEventBus>();
    }
}
