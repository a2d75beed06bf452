//! # Gridcast Hub
//!
//! Real-time fan-out for event streams: persist-then-broadcast to every
//! subscriber of a stream, on every instance.
//!
//! ```text
//! client ── draft ──> StreamHub ── append ──> EventStore
//!                        │ (on success)
//!                        ├──> local subscribers (bounded queues)
//!                        └──> bus channel game:<gid> / room:<rid>
//!                                  │
//!                other instances ──┴──> relay ──> their local subscribers
//! ```
//!
//! Guarantees, per stream:
//!
//! - Nothing is broadcast unless the append succeeded (persisted order is
//!   canonical; clients recover any missed tail via [`StreamHub::sync`]).
//! - Each subscriber sees events in increasing `seq`; bus reordering is
//!   absorbed by a small buffer with a store-backed gap fill.
//! - A slow subscriber is dropped when its bounded queue overflows; other
//!   subscribers and the publisher are unaffected.
//! - An instance never re-delivers its own bus echoes.
//!
//! There is no ordering across different streams.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod hub;
mod relay;
mod sentinel;

pub use hub::{HubConfig, HubError, StreamHub, Subscription};
pub use sentinel::resolve_timestamp_sentinels;
