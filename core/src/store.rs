//! Event store trait: append-only per-stream persistence with snapshots.
//!
//! The store is the sole arbiter of ordering. Appending assigns the next
//! per-stream sequence number atomically in the backing store; the unique
//! index on `(stream, seq)` enforces the contiguous-prefix invariant, and
//! conflict retry is the liveness mechanism (see the Postgres
//! implementation for the chosen strategy).
//!
//! Snapshots are an optimization only: one slot per stream, overwritten on
//! refresh, never required for correctness. A snapshot whose `snapshot_seq`
//! exceeds the persisted stream is invalid and must be ignored by readers.
//!
//! # Dyn compatibility
//!
//! The trait uses explicit `Pin<Box<dyn Future>>` returns instead of
//! `async fn` so it can be used as `Arc<dyn EventStore>` throughout the hub
//! and services.

use crate::event::{EventBody, EventDecodeError, EventRecord};
use crate::stream::{Seq, StreamId, StreamKind};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future alias used by the store trait methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors that can occur during event store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Sequence assignment lost the race more times than the retry budget
    /// allows.
    #[error("Append conflict on {kind} stream {stream_id} after retries")]
    Conflict {
        /// Stream kind.
        kind: StreamKind,
        /// Stream the conflict occurred on.
        stream_id: StreamId,
    },

    /// The backing store is unreachable or rejected the operation.
    #[error("Store backend error: {0}")]
    Backend(String),

    /// A stored row failed to decode into a typed event.
    #[error(transparent)]
    Decode(#[from] EventDecodeError),

    /// Serialization of a payload or snapshot blob failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// A cached projection of a stream at a known sequence number.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    /// Stream the snapshot belongs to.
    pub stream_id: StreamId,
    /// Projected state blob.
    pub data: Value,
    /// Last sequence number included in `data`.
    pub snapshot_seq: Seq,
    /// Creation timestamp, ms since epoch.
    pub created_at: i64,
    /// Last overwrite timestamp, ms since epoch.
    pub updated_at: i64,
}

/// Append-only event persistence with per-stream sequencing.
///
/// Implementations must be `Send + Sync`; callers run concurrently and the
/// store resolves per-stream write contention internally.
pub trait EventStore: Send + Sync {
    /// Append one event, assigning the next sequence number for the stream.
    ///
    /// Returns the stored record including its assigned [`Seq`].
    ///
    /// # Errors
    ///
    /// - [`StoreError::Conflict`] when sequence retries exhaust
    /// - [`StoreError::Backend`] for transport/store failures
    fn append(
        &self,
        kind: StreamKind,
        stream_id: StreamId,
        body: EventBody,
        user_id: Option<String>,
        ts: i64,
        schema_version: i32,
    ) -> StoreFuture<'_, EventRecord>;

    /// Read an ordered range of a stream, ascending by `seq`.
    ///
    /// `from_seq`/`to_seq` are inclusive bounds; absent bounds read the
    /// whole stream. A stream with no events yields an empty vector, not an
    /// error.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Backend`] for transport/store failures
    /// - [`StoreError::Decode`] for rows that no longer decode (unknown tag
    ///   or malformed payload; never silently dropped)
    fn read(
        &self,
        kind: StreamKind,
        stream_id: StreamId,
        from_seq: Option<Seq>,
        to_seq: Option<Seq>,
    ) -> StoreFuture<'_, Vec<EventRecord>>;

    /// Load the snapshot slot for a stream, if one exists.
    ///
    /// Callers must validate the snapshot against the stream before use: a
    /// `snapshot_seq` beyond the persisted prefix means the slot is stale
    /// garbage and must be ignored.
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] for transport/store failures.
    fn get_snapshot(&self, kind: StreamKind, stream_id: StreamId)
        -> StoreFuture<'_, Option<Snapshot>>;

    /// Overwrite the snapshot slot for a stream (one-writer-wins upsert).
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] for transport/store failures.
    fn upsert_snapshot(
        &self,
        kind: StreamKind,
        stream_id: StreamId,
        data: Value,
        snapshot_seq: Seq,
    ) -> StoreFuture<'_, ()>;
}
