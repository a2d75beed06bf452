//! The stream hub: subscriber registry and persist-then-broadcast pipeline.
//!
//! One `StreamHub` runs per server instance. Clients subscribe to streams
//! and receive every event appended to them, in persisted order; publishes
//! go through the store first and are fanned out only after the append
//! succeeded. With a bus configured, events also fan out across instances
//! (see [`crate::relay`]).
//!
//! # Concurrency
//!
//! - The subscriber registry sits behind a plain mutex with small critical
//!   sections; fan-out snapshots the subscriber set and releases the lock
//!   before any delivery.
//! - Delivery to one subscriber is non-blocking: each subscriber owns a
//!   bounded queue, and a full queue drops that subscriber (the client
//!   reconnects and resyncs) instead of backing up the stream.
//! - Publishes to the same stream serialize on a per-stream async lock so
//!   local delivery and bus publication happen in sequence order. Publishes
//!   to different streams proceed in parallel.

use crate::relay::{run_relay, RelayContext};
use crate::sentinel::resolve_timestamp_sentinels;
use gridcast_core::bus::{BusEnvelope, EventBus};
use gridcast_core::clock::Clock;
use gridcast_core::event::{EventBody, EventDecodeError, EventDraft, EventRecord};
use gridcast_core::store::{EventStore, StoreError};
use gridcast_core::stream::{StreamId, StreamKind};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Deadline for a single store call on the publish path.
const STORE_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for a full-stream sync read.
const SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// Tuning knobs for the hub.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Bounded outbound queue size per subscriber; overflow drops the
    /// subscriber.
    pub subscriber_queue_capacity: usize,
    /// How long a bus-sourced sequence gap may wait in the reorder buffer
    /// before a gap-fill read from the store.
    pub reorder_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscriber_queue_capacity: 1024,
            reorder_timeout: Duration::from_millis(250),
        }
    }
}

/// Errors from hub operations.
#[derive(Error, Debug)]
pub enum HubError {
    /// The submitted event draft failed validation.
    #[error(transparent)]
    Validation(#[from] EventDecodeError),

    /// The event store rejected the operation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The hub is shutting down.
    #[error("Hub is shutting down")]
    Closed,
}

pub(crate) type StreamKey = (StreamKind, StreamId);

#[derive(Default)]
pub(crate) struct StreamEntry {
    pub(crate) subscribers: HashMap<Uuid, mpsc::Sender<EventRecord>>,
    pub(crate) relay: Option<tokio::task::JoinHandle<()>>,
}

#[derive(Default)]
pub(crate) struct Registry {
    pub(crate) streams: HashMap<StreamKey, StreamEntry>,
    pub(crate) closed: bool,
}

/// A live subscription to one stream.
///
/// Yields events in persisted order. Dropping the subscription removes the
/// subscriber from the stream immediately; events already queued are lost
/// with it.
pub struct Subscription {
    receiver: mpsc::Receiver<EventRecord>,
    _guard: SubscriberGuard,
}

impl Subscription {
    /// Receive the next event. `None` means the hub dropped this
    /// subscriber (backpressure or shutdown); the client should resync.
    pub async fn recv(&mut self) -> Option<EventRecord> {
        self.receiver.recv().await
    }
}

struct SubscriberGuard {
    registry: Arc<Mutex<Registry>>,
    key: StreamKey,
    subscriber_id: Uuid,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        let mut registry = lock_registry(&self.registry);
        remove_subscriber(&mut registry, &self.key, self.subscriber_id);
    }
}

/// Persist-then-broadcast delivery hub for one server instance.
pub struct StreamHub {
    origin_id: Uuid,
    store: Arc<dyn EventStore>,
    bus: Option<Arc<dyn EventBus>>,
    clock: Arc<dyn Clock>,
    config: HubConfig,
    registry: Arc<Mutex<Registry>>,
    publish_locks: Mutex<HashMap<StreamKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl StreamHub {
    /// Create a hub over the given store, with optional cross-instance bus.
    #[must_use]
    pub fn new(
        store: Arc<dyn EventStore>,
        bus: Option<Arc<dyn EventBus>>,
        clock: Arc<dyn Clock>,
        config: HubConfig,
    ) -> Self {
        let origin_id = Uuid::new_v4();
        info!(origin_id = %origin_id, bus = bus.is_some(), "Stream hub created");
        Self {
            origin_id,
            store,
            bus,
            clock,
            config,
            registry: Arc::new(Mutex::new(Registry::default())),
            publish_locks: Mutex::new(HashMap::new()),
        }
    }

    /// This instance's identity on the bus (echo suppression).
    #[must_use]
    pub const fn origin_id(&self) -> Uuid {
        self.origin_id
    }

    /// Subscribe to a stream. The first local subscriber on a stream also
    /// starts the bus relay for its channel (when a bus is configured).
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] when the hub is shutting down.
    pub fn subscribe(&self, kind: StreamKind, stream_id: StreamId) -> Result<Subscription, HubError> {
        let key = (kind, stream_id.clone());
        let (tx, rx) = mpsc::channel(self.config.subscriber_queue_capacity);
        let subscriber_id = Uuid::new_v4();

        let first_subscriber = {
            let mut registry = lock_registry(&self.registry);
            if registry.closed {
                return Err(HubError::Closed);
            }
            let entry = registry.streams.entry(key.clone()).or_default();
            let first = entry.subscribers.is_empty();
            entry.subscribers.insert(subscriber_id, tx);
            first
        };

        metrics::gauge!("hub.subscribers").increment(1.0);
        debug!(
            stream = %kind.channel(&stream_id),
            subscriber_id = %subscriber_id,
            "Subscriber joined"
        );

        if first_subscriber {
            if let Some(bus) = &self.bus {
                let handle = tokio::spawn(run_relay(RelayContext {
                    registry: Arc::clone(&self.registry),
                    store: Arc::clone(&self.store),
                    bus: Arc::clone(bus),
                    origin_id: self.origin_id,
                    reorder_timeout: self.config.reorder_timeout,
                    kind,
                    stream_id: stream_id.clone(),
                }));

                let mut registry = lock_registry(&self.registry);
                match registry.streams.get_mut(&key) {
                    // The subscriber may already be gone, or a racing
                    // subscriber may have installed a relay first; never
                    // leave two relays running for one stream.
                    Some(entry) if !entry.subscribers.is_empty() && entry.relay.is_none() => {
                        entry.relay = Some(handle);
                    }
                    _ => handle.abort(),
                }
            }
        }

        Ok(Subscription {
            receiver: rx,
            _guard: SubscriberGuard {
                registry: Arc::clone(&self.registry),
                key,
                subscriber_id,
            },
        })
    }

    /// Publish a client event draft: normalize, persist, then broadcast.
    ///
    /// 1. `{".sv":"timestamp"}` sentinels are replaced with the current
    ///    wall-clock ms.
    /// 2. The draft is decoded against the closed event set for `kind`.
    /// 3. The store appends it (assigning `seq`); failure is surfaced and
    ///    nothing is broadcast.
    /// 4. Local subscribers receive the stored record; a full queue drops
    ///    that subscriber only.
    /// 5. With a bus configured, the record is published to the stream's
    ///    channel, best-effort: a bus failure is logged and does not affect
    ///    the caller.
    ///
    /// # Errors
    ///
    /// - [`HubError::Validation`] for malformed or unknown-tag drafts
    /// - [`HubError::Store`] when the append fails (conflict or backend)
    /// - [`HubError::Closed`] when the hub is shutting down
    pub async fn publish(
        &self,
        kind: StreamKind,
        stream_id: StreamId,
        draft: EventDraft,
    ) -> Result<EventRecord, HubError> {
        let key = (kind, stream_id.clone());
        let publish_lock = self.publish_lock(&key);
        let _serialized = publish_lock.lock().await;

        if lock_registry(&self.registry).closed {
            return Err(HubError::Closed);
        }

        let now_ms = self.clock.now_ms();
        let mut body = draft.body;
        resolve_timestamp_sentinels(&mut body, now_ms);
        let typed = EventBody::decode_tagged(kind, body)?;

        let record = tokio::time::timeout(
            STORE_CALL_TIMEOUT,
            self.store
                .append(kind, stream_id.clone(), typed, draft.user_id, now_ms, 1),
        )
        .await
        .map_err(|_| StoreError::Backend("append timed out".to_string()))??;

        debug!(
            stream = %kind.channel(&stream_id),
            seq = %record.seq,
            event_type = record.body.event_type(),
            "Event persisted"
        );
        metrics::counter!("hub.publish.total", "result" => "success").increment(1);

        deliver_to_stream(&self.registry, &key, &record);

        if let Some(bus) = &self.bus {
            let channel = kind.channel(&stream_id);
            let envelope = BusEnvelope {
                origin_id: self.origin_id,
                stream_kind: kind,
                stream_id,
                event: record.clone(),
            };
            if let Err(e) = bus.publish(&channel, &envelope).await {
                // Best-effort: cross-instance delivery degrades, local
                // correctness is unchanged; clients resync on reconnect.
                warn!(channel = %channel, error = %e, "Bus publish failed");
                metrics::counter!("hub.bus.publish_failures").increment(1);
            }
        }

        Ok(record)
    }

    /// Read the full stream in order, for reconnecting clients.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Store`] when the read fails or exceeds the sync
    /// deadline.
    pub async fn sync(
        &self,
        kind: StreamKind,
        stream_id: StreamId,
    ) -> Result<Vec<EventRecord>, HubError> {
        let events = tokio::time::timeout(SYNC_TIMEOUT, self.store.read(kind, stream_id, None, None))
            .await
            .map_err(|_| StoreError::Backend("sync read timed out".to_string()))??;
        Ok(events)
    }

    /// Number of local subscribers on a stream.
    #[must_use]
    pub fn subscriber_count(&self, kind: StreamKind, stream_id: &StreamId) -> usize {
        lock_registry(&self.registry)
            .streams
            .get(&(kind, stream_id.clone()))
            .map_or(0, |entry| entry.subscribers.len())
    }

    /// Shut the hub down: stop relays and detach every subscriber.
    ///
    /// Subscribers drain whatever is already queued and then see the end of
    /// their stream; the transport layer owns any hard deadline on top of
    /// that.
    pub fn close(&self) {
        let mut registry = lock_registry(&self.registry);
        registry.closed = true;
        for (key, entry) in registry.streams.drain() {
            if let Some(handle) = entry.relay {
                handle.abort();
            }
            debug!(stream = %key.0.channel(&key.1), "Stream detached on shutdown");
        }
        info!(origin_id = %self.origin_id, "Stream hub closed");
    }

    fn publish_lock(&self, key: &StreamKey) -> Arc<tokio::sync::Mutex<()>> {
        // Entries are tiny and streams are long-lived; the map is not
        // pruned.
        #[allow(clippy::unwrap_used)] // Lock poisoning propagates the original panic
        let mut locks = self.publish_locks.lock().unwrap();
        Arc::clone(locks.entry(key.clone()).or_default())
    }
}

pub(crate) fn lock_registry(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    #[allow(clippy::unwrap_used)] // Lock poisoning propagates the original panic
    registry.lock().unwrap()
}

/// Fan a record out to a stream's local subscribers.
///
/// Takes a snapshot of the subscriber set under the lock, delivers without
/// it, then drops any subscriber whose queue was full or closed.
pub(crate) fn deliver_to_stream(
    registry: &Arc<Mutex<Registry>>,
    key: &StreamKey,
    record: &EventRecord,
) {
    let senders: Vec<(Uuid, mpsc::Sender<EventRecord>)> = {
        let reg = lock_registry(registry);
        match reg.streams.get(key) {
            Some(entry) => entry
                .subscribers
                .iter()
                .map(|(id, tx)| (*id, tx.clone()))
                .collect(),
            None => return,
        }
    };

    let mut dropped = Vec::new();
    for (subscriber_id, sender) in senders {
        match sender.try_send(record.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    stream = %key.0.channel(&key.1),
                    subscriber_id = %subscriber_id,
                    "Subscriber queue full, dropping subscriber"
                );
                metrics::counter!("hub.subscribers.dropped", "reason" => "backpressure")
                    .increment(1);
                dropped.push(subscriber_id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                dropped.push(subscriber_id);
            }
        }
    }

    if !dropped.is_empty() {
        let mut reg = lock_registry(registry);
        for subscriber_id in dropped {
            remove_subscriber(&mut reg, key, subscriber_id);
        }
    }
}

fn remove_subscriber(registry: &mut Registry, key: &StreamKey, subscriber_id: Uuid) {
    if let Some(entry) = registry.streams.get_mut(key) {
        if entry.subscribers.remove(&subscriber_id).is_some() {
            metrics::gauge!("hub.subscribers").decrement(1.0);
        }
        if entry.subscribers.is_empty() {
            if let Some(handle) = entry.relay.take() {
                handle.abort();
            }
            registry.streams.remove(key);
        }
    }
}
