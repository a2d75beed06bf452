//! Bus relay: forward cross-instance events to local subscribers in order.
//!
//! One relay task runs per locally-subscribed stream. It consumes the
//! stream's bus channel, suppresses this instance's own echoes, drops
//! duplicates by sequence number, and delivers everything else to local
//! subscribers in strictly increasing `seq`. Minor reordering waits in a
//! small buffer; a gap that outlives the reorder timeout is filled with a
//! read from the store, which holds the canonical order.
//!
//! Own echoes still advance the expected sequence: the local fan-out
//! already delivered those events, so the relay marks them delivered
//! without re-emitting them. Otherwise a mixed-publisher stream would make
//! every foreign event wait out the gap timer behind this instance's own
//! sequence numbers.
//!
//! On start the relay subscribes to the bus channel first and only then
//! reads the stream's tail from the store to prime its expected sequence.
//! Persist precedes bus publish, so every event persisted after the
//! subscription is live carries a sequence above the primed baseline: an
//! envelope the bus never delivered (lost while the subscription was still
//! being established, or dropped later) shows up as a gap and is recovered
//! from the store instead of being silently absorbed as a new baseline.

use crate::hub::{deliver_to_stream, Registry, StreamKey};
use futures::StreamExt;
use gridcast_core::bus::EventBus;
use gridcast_core::event::EventRecord;
use gridcast_core::store::EventStore;
use gridcast_core::stream::{Seq, StreamId, StreamKind};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Everything a relay task needs, cloned out of the hub at spawn time.
pub(crate) struct RelayContext {
    pub(crate) registry: Arc<Mutex<Registry>>,
    pub(crate) store: Arc<dyn EventStore>,
    pub(crate) bus: Arc<dyn EventBus>,
    pub(crate) origin_id: uuid::Uuid,
    pub(crate) reorder_timeout: Duration,
    pub(crate) kind: StreamKind,
    pub(crate) stream_id: StreamId,
}

/// Per-stream reorder buffer for bus-sourced events.
///
/// The baseline comes from [`ReorderBuffer::primed`] (the store's tail at
/// relay start); from then on events are released only in increasing
/// `seq`. Anything below the expected sequence is a duplicate; anything
/// above waits in `pending` until the gap closes (by arrival, by an
/// own-echo skip, or by a store gap-fill). Sequences in `skipped` were
/// already delivered by the local fan-out and are advanced past without
/// re-delivery. An unprimed buffer (baseline read failed) falls back to
/// adopting the first observed sequence.
#[derive(Default)]
struct ReorderBuffer {
    next: Option<Seq>,
    pending: BTreeMap<i64, EventRecord>,
    skipped: BTreeSet<i64>,
    gap_since: Option<Instant>,
}

impl ReorderBuffer {
    /// A buffer expecting `next` as the first deliverable sequence.
    fn primed(next: Seq) -> Self {
        Self {
            next: Some(next),
            ..Self::default()
        }
    }

    /// Offer one foreign event; returns the events now ready for delivery,
    /// in order.
    fn offer(&mut self, event: EventRecord) -> Vec<EventRecord> {
        let seq = event.seq;
        let mut ready = Vec::new();
        match self.next {
            None => {
                ready.push(event);
                let cursor = self.drain_from(seq.next(), &mut ready);
                self.next = Some(cursor);
            }
            Some(expected) if seq < expected => {
                metrics::counter!("hub.bus.duplicates").increment(1);
            }
            Some(expected) if seq == expected => {
                ready.push(event);
                let cursor = self.drain_from(expected.next(), &mut ready);
                self.next = Some(cursor);
            }
            Some(_) => {
                self.pending.insert(seq.value(), event);
            }
        }
        self.update_gap_timer();
        ready
    }

    /// Mark one of this instance's own sequence numbers as already
    /// delivered (by the local fan-out); returns any pending foreign
    /// events unblocked by the advance.
    fn skip(&mut self, seq: Seq) -> Vec<EventRecord> {
        let mut ready = Vec::new();
        match self.next {
            None => {
                let cursor = self.drain_from(seq.next(), &mut ready);
                self.next = Some(cursor);
            }
            Some(expected) if seq < expected => {}
            Some(expected) if seq == expected => {
                let cursor = self.drain_from(expected.next(), &mut ready);
                self.next = Some(cursor);
            }
            Some(_) => {
                self.skipped.insert(seq.value());
            }
        }
        self.update_gap_timer();
        ready
    }

    /// Absorb a gap-fill read (inclusive range from the store) and return
    /// everything deliverable, in order. Skipped sequences in the range
    /// are advanced past without delivery.
    fn absorb_fill(&mut self, events: Vec<EventRecord>) -> Vec<EventRecord> {
        let mut ready = Vec::new();
        let Some(mut cursor) = self.next else {
            return ready;
        };

        for event in events {
            if event.seq < cursor {
                continue;
            }
            // The store read is contiguous from `cursor`, so each row
            // either matches the cursor or was already consumed above.
            self.pending.remove(&event.seq.value());
            if event.seq == cursor {
                if self.skipped.remove(&cursor.value()) {
                    // Locally delivered already; advance silently.
                } else {
                    ready.push(event);
                }
                cursor = cursor.next();
            }
        }

        cursor = self.drain_from(cursor, &mut ready);
        self.next = Some(cursor);
        // Any hole left means the fill raced a writer; restart the clock.
        self.gap_since = None;
        self.update_gap_timer();
        ready
    }

    /// Advance the cursor through buffered and skipped sequences, pushing
    /// deliverable events onto `ready`.
    fn drain_from(&mut self, mut cursor: Seq, ready: &mut Vec<EventRecord>) -> Seq {
        loop {
            if let Some(buffered) = self.pending.remove(&cursor.value()) {
                ready.push(buffered);
                cursor = cursor.next();
            } else if self.skipped.remove(&cursor.value()) {
                cursor = cursor.next();
            } else {
                return cursor;
            }
        }
    }

    /// The gap timer runs exactly while foreign events wait in `pending`.
    fn update_gap_timer(&mut self) {
        if self.pending.is_empty() {
            self.gap_since = None;
        } else if self.gap_since.is_none() {
            self.gap_since = Some(Instant::now());
        }
    }

    /// When the current gap should trigger a store read.
    fn gap_deadline(&self, timeout: Duration) -> Option<Instant> {
        self.gap_since.map(|since| since + timeout)
    }

    /// Highest buffered sequence, when a gap exists.
    fn highest_pending(&self) -> Option<Seq> {
        self.pending.keys().next_back().map(|&seq| Seq::new(seq))
    }
}

/// Relay loop body; runs until the bus subscription ends or the task is
/// aborted (last local subscriber left).
pub(crate) async fn run_relay(ctx: RelayContext) {
    let channel = ctx.kind.channel(&ctx.stream_id);
    let key: StreamKey = (ctx.kind, ctx.stream_id.clone());

    let mut envelopes = match ctx.bus.subscribe(&[channel.as_str()]).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(channel = %channel, error = %e, "Bus subscription failed; relay not running");
            return;
        }
    };
    // Baseline: the stream's tail as of now. The bus subscription is
    // already live, so everything persisted from here on has a higher
    // sequence and either arrives as an envelope or surfaces as a gap.
    let mut buffer = match ctx
        .store
        .read(ctx.kind, ctx.stream_id.clone(), None, None)
        .await
    {
        Ok(events) => {
            let next = events.last().map_or(Seq::FIRST, |last| last.seq.next());
            debug!(channel = %channel, baseline = %next, "Bus relay started");
            ReorderBuffer::primed(next)
        }
        Err(e) => {
            // Unknown baseline: adopt the first observed sequence and rely
            // on the client's sync for anything before it.
            warn!(channel = %channel, error = %e, "Baseline read failed; relay starts unprimed");
            ReorderBuffer::default()
        }
    };

    loop {
        let deadline = buffer.gap_deadline(ctx.reorder_timeout);
        let sleep_target =
            deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            incoming = envelopes.next() => {
                match incoming {
                    Some(Ok(envelope)) => {
                        if envelope.stream_kind != ctx.kind || envelope.stream_id != ctx.stream_id {
                            warn!(channel = %channel, "Envelope for foreign stream on channel");
                            continue;
                        }
                        let ready = if envelope.origin_id == ctx.origin_id {
                            // Own echo: already delivered by local fan-out.
                            buffer.skip(envelope.event.seq)
                        } else {
                            buffer.offer(envelope.event)
                        };
                        for record in ready {
                            deliver_to_stream(&ctx.registry, &key, &record);
                        }
                    }
                    Some(Err(e)) => {
                        warn!(channel = %channel, error = %e, "Bus stream error");
                    }
                    None => {
                        debug!(channel = %channel, "Bus stream ended; relay stopping");
                        break;
                    }
                }
            }
            () = tokio::time::sleep_until(sleep_target), if deadline.is_some() => {
                gap_fill(&ctx, &key, &mut buffer).await;
            }
        }
    }
}

/// A gap outlived the reorder window: read the missing range from the
/// store and deliver in order.
async fn gap_fill(ctx: &RelayContext, key: &StreamKey, buffer: &mut ReorderBuffer) {
    let (Some(from), Some(to)) = (buffer.next, buffer.highest_pending()) else {
        buffer.gap_since = None;
        return;
    };

    debug!(
        stream = %ctx.kind.channel(&ctx.stream_id),
        from = %from,
        to = %to,
        "Gap fill from store"
    );
    metrics::counter!("hub.bus.gap_fills").increment(1);

    match ctx
        .store
        .read(ctx.kind, ctx.stream_id.clone(), Some(from), Some(to))
        .await
    {
        Ok(events) => {
            for record in buffer.absorb_fill(events) {
                deliver_to_stream(&ctx.registry, key, &record);
            }
        }
        Err(e) => {
            warn!(
                stream = %ctx.kind.channel(&ctx.stream_id),
                error = %e,
                "Gap-fill read failed; will retry after the next timeout"
            );
            buffer.gap_since = Some(Instant::now());
        }
    }
}
