//! `PostgreSQL` persistence for gridcast.
//!
//! This crate implements the storage traits from `gridcast-core` with sqlx:
//!
//! - [`PostgresEventStore`]: append-only event streams with per-stream
//!   sequencing and a snapshot slot per game
//! - [`PostgresPuzzleCatalog`]: puzzle lookup, public listing, CRUD
//! - [`PostgresSolveStore`]: exactly-once solve recording with the puzzle
//!   counter bump in the same transaction
//!
//! # Sequencing strategy
//!
//! Of the two valid append strategies (serialized next-seq vs.
//! advisory-lock-per-stream) this implementation uses **serialized
//! next-seq**: within one transaction it reads `MAX(seq)` for the stream,
//! inserts at `max + 1`, and relies on the unique `(stream, seq)` index to
//! reject concurrent writers that computed the same sequence. Losing
//! writers retry with exponential backoff (base 10 ms, 5 attempts) before
//! surfacing a conflict. Colocating sequence assignment with insertion
//! keeps the store the sole arbiter of ordering and survives restarts with
//! no counter state.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod solves;

pub use catalog::PostgresPuzzleCatalog;
pub use solves::PostgresSolveStore;

use gridcast_core::event::{EventBody, EventRecord};
use gridcast_core::store::{EventStore, Snapshot, StoreError, StoreFuture};
use gridcast_core::stream::{Seq, StreamId, StreamKind};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;

/// Maximum attempts at assigning a sequence number before giving up.
const MAX_APPEND_ATTEMPTS: u32 = 5;

/// Base delay between append retries; doubles per attempt.
const APPEND_RETRY_BASE: Duration = Duration::from_millis(10);

/// `PostgreSQL` unique-constraint violation.
const UNIQUE_VIOLATION: &str = "23505";

/// Event table and key column for a stream kind.
const fn stream_table(kind: StreamKind) -> (&'static str, &'static str) {
    match kind {
        StreamKind::Game => ("game_events", "gid"),
        StreamKind::Room => ("room_events", "rid"),
    }
}

/// `PostgreSQL`-backed event store.
pub struct PostgresEventStore {
    pool: PgPool,
}

/// Outcome of one append attempt, internal to the retry loop.
enum AppendAttempt {
    Stored(EventRecord),
    LostRace,
}

impl PostgresEventStore {
    /// Create a store from a database URL with a default pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the URL is invalid or the
    /// database is unreachable.
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Create a store from an existing connection pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool, for health checks and the sibling
    /// repositories.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded SQL migrations. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if a migration fails to apply.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))?;
        tracing::info!("Database migrations completed");
        Ok(())
    }

    /// One serialized next-seq attempt: read `MAX(seq)`, insert at the next
    /// value, commit. A unique-index violation means another writer won the
    /// race for this sequence number.
    async fn try_append(
        &self,
        kind: StreamKind,
        stream_id: &StreamId,
        event_type: &str,
        payload: &serde_json::Value,
        user_id: Option<&str>,
        ts: i64,
        schema_version: i32,
    ) -> Result<AppendAttempt, StoreError> {
        let (table, id_col) = stream_table(kind);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let current: i64 = sqlx::query_scalar(&format!(
            "SELECT COALESCE(MAX(seq), 0) FROM {table} WHERE {id_col} = $1"
        ))
        .bind(stream_id.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        let seq = Seq::new(current + 1);

        let insert = if kind == StreamKind::Game {
            sqlx::query(&format!(
                "INSERT INTO {table} ({id_col}, seq, event_type, payload, user_id, ts, version)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)"
            ))
            .bind(stream_id.as_str())
            .bind(seq.value())
            .bind(event_type)
            .bind(payload)
            .bind(user_id)
            .bind(ts)
            .bind(schema_version)
            .execute(&mut *tx)
            .await
        } else {
            sqlx::query(&format!(
                "INSERT INTO {table} ({id_col}, seq, event_type, payload, user_id, ts)
                 VALUES ($1, $2, $3, $4, $5, $6)"
            ))
            .bind(stream_id.as_str())
            .bind(seq.value())
            .bind(event_type)
            .bind(payload)
            .bind(user_id)
            .bind(ts)
            .execute(&mut *tx)
            .await
        };

        if let Err(e) = insert {
            if e.as_database_error()
                .and_then(|db| db.code())
                .as_deref()
                == Some(UNIQUE_VIOLATION)
            {
                // Concurrent writer took this seq; the caller backs off and
                // retries.
                let _ = tx.rollback().await;
                return Ok(AppendAttempt::LostRace);
            }
            return Err(StoreError::Backend(e.to_string()));
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let body = EventBody::decode(kind, event_type, payload.clone())?;
        Ok(AppendAttempt::Stored(EventRecord {
            stream_kind: kind,
            stream_id: stream_id.clone(),
            seq,
            body,
            user_id: user_id.map(ToOwned::to_owned),
            ts,
            schema_version,
        }))
    }
}

impl EventStore for PostgresEventStore {
    fn append(
        &self,
        kind: StreamKind,
        stream_id: StreamId,
        body: EventBody,
        user_id: Option<String>,
        ts: i64,
        schema_version: i32,
    ) -> StoreFuture<'_, EventRecord> {
        Box::pin(async move {
            let start = std::time::Instant::now();
            let event_type = body.event_type();
            let payload = body.payload()?;

            tracing::debug!(
                stream = %kind.channel(&stream_id),
                event_type,
                "Appending event"
            );

            for attempt in 0..MAX_APPEND_ATTEMPTS {
                match self
                    .try_append(
                        kind,
                        &stream_id,
                        event_type,
                        &payload,
                        user_id.as_deref(),
                        ts,
                        schema_version,
                    )
                    .await?
                {
                    AppendAttempt::Stored(record) => {
                        metrics::histogram!("event_store.append.duration_seconds")
                            .record(start.elapsed().as_secs_f64());
                        metrics::counter!("event_store.append.total", "result" => "success")
                            .increment(1);
                        tracing::debug!(
                            stream = %kind.channel(&stream_id),
                            seq = %record.seq,
                            "Event appended"
                        );
                        return Ok(record);
                    }
                    AppendAttempt::LostRace => {
                        metrics::counter!("event_store.append.seq_races").increment(1);
                        let backoff = APPEND_RETRY_BASE * 2_u32.pow(attempt);
                        tracing::debug!(
                            stream = %kind.channel(&stream_id),
                            attempt,
                            backoff_ms = backoff.as_millis() as u64,
                            "Sequence race, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                }
            }

            metrics::counter!("event_store.append.total", "result" => "conflict").increment(1);
            tracing::warn!(
                stream = %kind.channel(&stream_id),
                attempts = MAX_APPEND_ATTEMPTS,
                "Append retries exhausted"
            );
            Err(StoreError::Conflict { kind, stream_id })
        })
    }

    fn read(
        &self,
        kind: StreamKind,
        stream_id: StreamId,
        from_seq: Option<Seq>,
        to_seq: Option<Seq>,
    ) -> StoreFuture<'_, Vec<EventRecord>> {
        Box::pin(async move {
            let start = std::time::Instant::now();
            let (table, id_col) = stream_table(kind);

            // room_events carries no version column; the envelope version
            // is fixed at 1 there.
            let version_col = if kind == StreamKind::Game {
                "version"
            } else {
                "1 AS version"
            };

            let mut builder = sqlx::QueryBuilder::new(format!(
                "SELECT seq, event_type, payload, user_id, ts, {version_col} \
                 FROM {table} WHERE {id_col} = "
            ));
            builder.push_bind(stream_id.as_str());
            if let Some(from) = from_seq {
                builder.push(" AND seq >= ").push_bind(from.value());
            }
            if let Some(to) = to_seq {
                builder.push(" AND seq <= ").push_bind(to.value());
            }
            builder.push(" ORDER BY seq ASC");

            let rows = builder
                .build()
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            let mut events = Vec::with_capacity(rows.len());
            for row in rows {
                let event_type: String = row.get("event_type");
                let payload: serde_json::Value = row.get("payload");
                let body = EventBody::decode(kind, &event_type, payload)?;
                events.push(EventRecord {
                    stream_kind: kind,
                    stream_id: stream_id.clone(),
                    seq: Seq::new(row.get::<i64, _>("seq")),
                    body,
                    user_id: row.get("user_id"),
                    ts: row.get("ts"),
                    schema_version: row.get::<i32, _>("version"),
                });
            }

            metrics::histogram!("event_store.load.duration_seconds")
                .record(start.elapsed().as_secs_f64());
            tracing::debug!(
                stream = %kind.channel(&stream_id),
                event_count = events.len(),
                "Loaded events"
            );
            Ok(events)
        })
    }

    fn get_snapshot(
        &self,
        kind: StreamKind,
        stream_id: StreamId,
    ) -> StoreFuture<'_, Option<Snapshot>> {
        Box::pin(async move {
            // Only game streams carry a snapshot slot; rooms are cheap to
            // replay in full.
            if kind != StreamKind::Game {
                return Ok(None);
            }

            let row = sqlx::query(
                "SELECT data, snapshot_seq, created_at, updated_at
                 FROM game_snapshots WHERE gid = $1",
            )
            .bind(stream_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

            Ok(row.map(|row| Snapshot {
                stream_id,
                data: row.get("data"),
                snapshot_seq: Seq::new(row.get::<i64, _>("snapshot_seq")),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            }))
        })
    }

    fn upsert_snapshot(
        &self,
        kind: StreamKind,
        stream_id: StreamId,
        data: serde_json::Value,
        snapshot_seq: Seq,
    ) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            if kind != StreamKind::Game {
                tracing::debug!(stream = %kind.channel(&stream_id), "No snapshot slot for room streams");
                return Ok(());
            }

            sqlx::query(
                "INSERT INTO game_snapshots (gid, data, snapshot_seq, created_at, updated_at)
                 VALUES ($1, $2, $3,
                         (extract(epoch from now()) * 1000)::bigint,
                         (extract(epoch from now()) * 1000)::bigint)
                 ON CONFLICT (gid) DO UPDATE
                 SET data = EXCLUDED.data,
                     snapshot_seq = EXCLUDED.snapshot_seq,
                     updated_at = EXCLUDED.updated_at",
            )
            .bind(stream_id.as_str())
            .bind(&data)
            .bind(snapshot_seq.value())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

            tracing::debug!(
                stream = %kind.channel(&stream_id),
                snapshot_seq = %snapshot_seq,
                "Snapshot saved"
            );
            Ok(())
        })
    }
}
