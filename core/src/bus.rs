//! Pub/sub bus abstraction for cross-instance event distribution.
//!
//! Each stream maps to one bus channel (`game:<gid>` / `room:<rid>`). After
//! an event is persisted, the hub publishes it to the stream's channel;
//! other instances subscribed to that channel forward it to their local
//! subscribers. The bus is best-effort: publish failures degrade to
//! single-instance delivery, and duplicates or reordering on the receiving
//! side are absorbed by `(stream, seq)` dedup plus a small reorder buffer.
//!
//! # Key principles
//!
//! - **Persist first**: events reach the bus only after the store accepted
//!   them. Broadcast-then-persist is prohibited.
//! - **Echo suppression**: every envelope carries the publishing instance's
//!   `origin_id`; an instance never re-delivers its own envelopes.
//! - **At-least-once**: delivery may duplicate; receivers must dedup.

use crate::event::EventRecord;
use crate::stream::{StreamId, StreamKind};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during bus operations.
#[derive(Error, Debug, Clone)]
pub enum BusError {
    /// Failed to connect to the bus.
    #[error("Bus connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish to a channel.
    #[error("Publish failed on channel '{channel}': {reason}")]
    PublishFailed {
        /// The channel that failed.
        channel: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Failed to subscribe to channels.
    #[error("Subscription failed for channels {channels:?}: {reason}")]
    SubscriptionFailed {
        /// The channels that failed to subscribe.
        channels: Vec<String>,
        /// The reason for the failure.
        reason: String,
    },

    /// A received message failed to decode.
    #[error("Bus message decode failed: {0}")]
    Decode(String),

    /// Network or transport error on an established subscription.
    #[error("Bus transport error: {0}")]
    Transport(String),
}

/// Message envelope carried on the bus.
///
/// `origin_id` identifies the publishing hub instance for echo suppression;
/// the embedded record carries everything else, including the `(stream,
/// seq)` pair used for dedup on the receiving side.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BusEnvelope {
    /// Publishing instance, for echo suppression.
    pub origin_id: Uuid,
    /// Stream kind of the carried event.
    pub stream_kind: StreamKind,
    /// Stream the event belongs to.
    pub stream_id: StreamId,
    /// The persisted event.
    pub event: EventRecord,
}

impl BusEnvelope {
    /// The channel this envelope belongs on.
    #[must_use]
    pub fn channel(&self) -> String {
        self.stream_kind.channel(&self.stream_id)
    }
}

/// Stream of envelopes from a subscription.
pub type EnvelopeStream = Pin<Box<dyn Stream<Item = Result<BusEnvelope, BusError>> + Send>>;

/// Boxed future alias used by the bus trait methods.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BusError>> + Send + 'a>>;

/// Pub/sub bus for cross-instance fan-out.
///
/// Subscribers receive messages published after the subscription was
/// established; there is no replay. Implementations must be `Send + Sync`.
///
/// # Dyn compatibility
///
/// Explicit `Pin<Box<dyn Future>>` returns enable `Arc<dyn EventBus>` usage
/// in the hub.
pub trait EventBus: Send + Sync {
    /// Publish an envelope to a channel.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::PublishFailed`] when the publish fails. Callers
    /// on the hot path treat this as best-effort and log.
    fn publish(&self, channel: &str, envelope: &BusEnvelope) -> BusFuture<'_, ()>;

    /// Subscribe to one or more channels and receive an envelope stream.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] if the subscription cannot
    /// be established.
    fn subscribe(&self, channels: &[&str]) -> BusFuture<'_, EnvelopeStream>;
}
