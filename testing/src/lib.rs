//! # Gridcast Testing
//!
//! In-memory fakes and fixtures for exercising the collaboration engine
//! without Postgres or Redis:
//!
//! - [`mocks::InMemoryEventStore`]: per-stream append-only log with the
//!   same sequencing contract as the Postgres store
//! - [`mocks::InMemoryEventBus`]: broadcast-channel pub/sub with
//!   deliver-after-subscribe semantics
//! - [`mocks::InMemoryCatalog`] / [`mocks::InMemorySolveStore`]: a linked
//!   catalog + solve store sharing one lock, so the solve row and the
//!   `times_solved` bump stay atomic like the real transaction
//! - [`mocks::FixedClock`]: deterministic time
//! - [`fixtures`]: small puzzles for scenario tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// In-memory fakes for the engine's injected dependencies.
pub mod mocks {
    use chrono::{DateTime, Utc};
    use gridcast_core::bus::{BusEnvelope, BusError, BusFuture, EnvelopeStream, EventBus};
    use gridcast_core::catalog::{
        CatalogError, CatalogFuture, ListFilter, NewPuzzle, PuzzleCatalog,
    };
    use gridcast_core::clock::Clock;
    use gridcast_core::event::{EventBody, EventRecord};
    use gridcast_core::puzzle::{pid_numeric_prefix, Puzzle, PuzzleListing};
    use gridcast_core::solve::{SolveFuture, SolveOutcome, SolveRecord, SolveStats, SolveStore};
    use gridcast_core::store::{EventStore, Snapshot, StoreFuture};
    use gridcast_core::stream::{Seq, StreamId, StreamKind};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::sync::{broadcast, mpsc};

    /// Fixed clock for deterministic tests: always returns the same time.
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a fixed clock at the given time.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }

        /// Create a fixed clock at the given ms-since-epoch timestamp.
        ///
        /// # Panics
        ///
        /// Panics if `ms` is outside chrono's representable range, which
        /// does not happen for realistic test timestamps.
        #[must_use]
        #[allow(clippy::expect_used)]
        pub fn at_ms(ms: i64) -> Self {
            Self::new(
                DateTime::<Utc>::from_timestamp_millis(ms).expect("timestamp in range"),
            )
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create the default test clock (2025-01-01 00:00:00 UTC).
    ///
    /// # Panics
    ///
    /// Panics only if the hardcoded timestamp fails to parse, which never
    /// happens in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    type StreamKey = (StreamKind, StreamId);

    #[derive(Default)]
    struct EventStoreState {
        streams: HashMap<StreamKey, Vec<EventRecord>>,
        snapshots: HashMap<StreamKey, Snapshot>,
    }

    /// In-memory event store with the production sequencing contract:
    /// appends serialize per store, sequence numbers are the contiguous
    /// prefix `1..N` per stream.
    #[derive(Clone, Default)]
    pub struct InMemoryEventStore {
        state: Arc<Mutex<EventStoreState>>,
    }

    impl InMemoryEventStore {
        /// Create an empty store.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, EventStoreState> {
            // Lock poisoning only happens if a holder panicked; tests want
            // the underlying panic, not a secondary one.
            #[allow(clippy::unwrap_used)]
            self.state.lock().unwrap()
        }
    }

    impl EventStore for InMemoryEventStore {
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
                let mut state = self.lock();
                let stream = state.streams.entry((kind, stream_id.clone())).or_default();
                let seq = stream.last().map_or(Seq::FIRST, |last| last.seq.next());
                let record = EventRecord {
                    stream_kind: kind,
                    stream_id,
                    seq,
                    body,
                    user_id,
                    ts,
                    schema_version,
                };
                stream.push(record.clone());
                Ok(record)
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
                let state = self.lock();
                let events = state
                    .streams
                    .get(&(kind, stream_id))
                    .map(|stream| {
                        stream
                            .iter()
                            .filter(|e| from_seq.is_none_or(|from| e.seq >= from))
                            .filter(|e| to_seq.is_none_or(|to| e.seq <= to))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(events)
            })
        }

        fn get_snapshot(
            &self,
            kind: StreamKind,
            stream_id: StreamId,
        ) -> StoreFuture<'_, Option<Snapshot>> {
            Box::pin(async move { Ok(self.lock().snapshots.get(&(kind, stream_id)).cloned()) })
        }

        fn upsert_snapshot(
            &self,
            kind: StreamKind,
            stream_id: StreamId,
            data: serde_json::Value,
            snapshot_seq: Seq,
        ) -> StoreFuture<'_, ()> {
            Box::pin(async move {
                let mut state = self.lock();
                let now = 0;
                let slot = state
                    .snapshots
                    .entry((kind, stream_id.clone()))
                    .or_insert_with(|| Snapshot {
                        stream_id,
                        data: serde_json::Value::Null,
                        snapshot_seq,
                        created_at: now,
                        updated_at: now,
                    });
                slot.data = data;
                slot.snapshot_seq = snapshot_seq;
                slot.updated_at = now;
                Ok(())
            })
        }
    }

    /// In-memory pub/sub bus over tokio broadcast channels, one per
    /// channel name. Subscribers receive messages published after they
    /// subscribed; nothing is replayed.
    #[derive(Clone, Default)]
    pub struct InMemoryEventBus {
        channels: Arc<Mutex<HashMap<String, broadcast::Sender<BusEnvelope>>>>,
    }

    impl InMemoryEventBus {
        /// Create an empty bus.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn sender(&self, channel: &str) -> broadcast::Sender<BusEnvelope> {
            #[allow(clippy::unwrap_used)] // Lock poisoning propagates the original panic
            let mut channels = self.channels.lock().unwrap();
            channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(1024).0)
                .clone()
        }
    }

    impl EventBus for InMemoryEventBus {
        fn publish(&self, channel: &str, envelope: &BusEnvelope) -> BusFuture<'_, ()> {
            let sender = self.sender(channel);
            let envelope = envelope.clone();
            Box::pin(async move {
                // No receivers is fine: publish is fire-and-forget.
                let _ = sender.send(envelope);
                Ok(())
            })
        }

        fn subscribe(&self, channels: &[&str]) -> BusFuture<'_, EnvelopeStream> {
            let receivers: Vec<broadcast::Receiver<BusEnvelope>> =
                channels.iter().map(|c| self.sender(c).subscribe()).collect();

            Box::pin(async move {
                let (tx, rx) = mpsc::channel::<Result<BusEnvelope, BusError>>(256);

                for mut receiver in receivers {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        loop {
                            match receiver.recv().await {
                                Ok(envelope) => {
                                    if tx.send(Ok(envelope)).await.is_err() {
                                        break; // Subscriber dropped
                                    }
                                }
                                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                    let err = BusError::Transport(format!(
                                        "subscriber lagged, skipped {skipped}"
                                    ));
                                    if tx.send(Err(err)).await.is_err() {
                                        break;
                                    }
                                }
                                Err(broadcast::error::RecvError::Closed) => break,
                            }
                        }
                    });
                }

                let stream = async_stream::stream! {
                    let mut rx = rx;
                    while let Some(item) = rx.recv().await {
                        yield item;
                    }
                };

                Ok(Box::pin(stream) as EnvelopeStream)
            })
        }
    }

    #[derive(Default)]
    struct CatalogState {
        puzzles: HashMap<String, Puzzle>,
        solves: HashMap<(String, String), SolveRecord>,
        next_puzzle_id: i64,
        next_solve_id: i64,
    }

    /// In-memory puzzle catalog. Pair it with [`InMemorySolveStore`] via
    /// [`InMemoryCatalog::solve_store`] so solve rows and the
    /// `times_solved` counter share one lock, mirroring the real
    /// transaction boundary.
    #[derive(Clone, Default)]
    pub struct InMemoryCatalog {
        state: Arc<Mutex<CatalogState>>,
    }

    impl InMemoryCatalog {
        /// Create an empty catalog.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// A solve store backed by the same state as this catalog.
        #[must_use]
        pub fn solve_store(&self) -> InMemorySolveStore {
            InMemorySolveStore {
                state: Arc::clone(&self.state),
            }
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, CatalogState> {
            #[allow(clippy::unwrap_used)] // Lock poisoning propagates the original panic
            self.state.lock().unwrap()
        }
    }

    impl PuzzleCatalog for InMemoryCatalog {
        fn create(&self, new: NewPuzzle) -> CatalogFuture<'_, Puzzle> {
            Box::pin(async move {
                let mut state = self.lock();
                if state.puzzles.contains_key(&new.pid) {
                    return Err(CatalogError::DuplicatePid(new.pid));
                }
                state.next_puzzle_id += 1;
                let puzzle = Puzzle {
                    id: state.next_puzzle_id,
                    pid_numeric: pid_numeric_prefix(&new.pid),
                    pid: new.pid.clone(),
                    is_public: new.is_public,
                    uploaded_at: new.uploaded_at,
                    times_solved: 0,
                    content: new.content,
                    created_by: new.created_by,
                };
                state.puzzles.insert(new.pid, puzzle.clone());
                Ok(puzzle)
            })
        }

        fn find_by_pid(&self, pid: &str) -> CatalogFuture<'_, Option<Puzzle>> {
            let pid = pid.to_string();
            Box::pin(async move { Ok(self.lock().puzzles.get(&pid).cloned()) })
        }

        fn list_public(
            &self,
            filter: ListFilter,
            limit: i64,
            offset: i64,
        ) -> CatalogFuture<'_, Vec<PuzzleListing>> {
            Box::pin(async move {
                let state = self.lock();
                let mut matching: Vec<&Puzzle> = state
                    .puzzles
                    .values()
                    .filter(|p| p.is_public)
                    .filter(|p| {
                        filter.matches(
                            &p.content.info.title,
                            &p.content.info.author,
                            &p.content.info.kind,
                        )
                    })
                    .collect();

                // pid_numeric DESC NULLS LAST, ties broken by pid for
                // deterministic paging.
                matching.sort_by(|a, b| match (a.pid_numeric, b.pid_numeric) {
                    (Some(x), Some(y)) => y.cmp(&x).then_with(|| a.pid.cmp(&b.pid)),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => a.pid.cmp(&b.pid),
                });

                let listings = matching
                    .into_iter()
                    .skip(usize::try_from(offset).unwrap_or(0))
                    .take(usize::try_from(limit).unwrap_or(0))
                    .map(|p| PuzzleListing {
                        pid: p.pid.clone(),
                        info: p.content.info.clone(),
                        times_solved: p.times_solved,
                        uploaded_at: p.uploaded_at,
                    })
                    .collect();
                Ok(listings)
            })
        }

        fn set_visibility(&self, pid: &str, is_public: bool) -> CatalogFuture<'_, bool> {
            let pid = pid.to_string();
            Box::pin(async move {
                let mut state = self.lock();
                match state.puzzles.get_mut(&pid) {
                    Some(puzzle) => {
                        puzzle.is_public = is_public;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            })
        }

        fn delete(&self, pid: &str) -> CatalogFuture<'_, bool> {
            let pid = pid.to_string();
            Box::pin(async move { Ok(self.lock().puzzles.remove(&pid).is_some()) })
        }
    }

    /// In-memory solve store sharing state with an [`InMemoryCatalog`].
    #[derive(Clone)]
    pub struct InMemorySolveStore {
        state: Arc<Mutex<CatalogState>>,
    }

    impl InMemorySolveStore {
        fn lock(&self) -> std::sync::MutexGuard<'_, CatalogState> {
            #[allow(clippy::unwrap_used)] // Lock poisoning propagates the original panic
            self.state.lock().unwrap()
        }
    }

    impl SolveStore for InMemorySolveStore {
        fn record_solve(
            &self,
            pid: String,
            gid: String,
            solved_at: i64,
            time_taken_seconds: i64,
            stats: SolveStats,
        ) -> SolveFuture<'_, SolveOutcome> {
            Box::pin(async move {
                let mut state = self.lock();
                let key = (pid.clone(), gid.clone());
                if let Some(existing) = state.solves.get(&key) {
                    return Ok(SolveOutcome::AlreadyRecorded(existing.clone()));
                }

                state.next_solve_id += 1;
                let record = SolveRecord {
                    id: state.next_solve_id,
                    pid: pid.clone(),
                    gid,
                    solved_at,
                    time_taken_seconds,
                    revealed_squares_count: stats.revealed_squares,
                    checked_squares_count: stats.checked_squares,
                };
                state.solves.insert(key, record.clone());

                // Counter bump rides the same critical section as the
                // insert. A missing puzzle is tolerated here; referential
                // integrity is the real store's concern.
                if let Some(puzzle) = state.puzzles.get_mut(&pid) {
                    puzzle.times_solved += 1;
                }

                Ok(SolveOutcome::Recorded(record))
            })
        }

        fn find(&self, pid: &str, gid: &str) -> SolveFuture<'_, Option<SolveRecord>> {
            let key = (pid.to_string(), gid.to_string());
            Box::pin(async move { Ok(self.lock().solves.get(&key).cloned()) })
        }
    }
}

/// Puzzle fixtures shared by scenario tests.
pub mod fixtures {
    use gridcast_core::puzzle::{Clues, PuzzleContent, PuzzleInfo};

    /// A 3×3 puzzle with solution `ABC / DEF / GHI` and no black squares.
    #[must_use]
    pub fn puzzle_3x3() -> PuzzleContent {
        PuzzleContent {
            info: PuzzleInfo {
                title: "Three by Three".to_string(),
                author: "Fixture".to_string(),
                kind: "Mini Puzzle".to_string(),
                copyright: None,
                description: None,
            },
            grid: vec![vec![String::new(); 3]; 3],
            solution: vec![
                vec!["A".to_string(), "B".to_string(), "C".to_string()],
                vec!["D".to_string(), "E".to_string(), "F".to_string()],
                vec!["G".to_string(), "H".to_string(), "I".to_string()],
            ],
            clues: Clues::default(),
            circles: vec![],
            shades: vec![],
        }
    }
}

pub use mocks::{test_clock, FixedClock, InMemoryCatalog, InMemoryEventBus, InMemoryEventStore};

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)] // Test code
mod tests {
    use super::mocks::*;
    use gridcast_core::catalog::{ListFilter, NewPuzzle, PuzzleCatalog};
    use gridcast_core::clock::Clock;
    use gridcast_core::event::{EventBody, GameEventBody};
    use gridcast_core::solve::{SolveOutcome, SolveStats, SolveStore};
    use gridcast_core::store::EventStore;
    use gridcast_core::stream::{Seq, StreamId, StreamKind};

    fn fill_body(row: usize, col: usize, value: &str) -> EventBody {
        EventBody::Game(GameEventBody::CellFill {
            row,
            col,
            value: value.to_string(),
            pencil: None,
            solved_by: None,
        })
    }

    #[test]
    fn fixed_clock_is_fixed() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[tokio::test]
    async fn store_assigns_contiguous_seqs() {
        let store = InMemoryEventStore::new();
        for i in 0..5 {
            let record = store
                .append(
                    StreamKind::Game,
                    StreamId::new("g-1"),
                    fill_body(0, 0, "A"),
                    None,
                    1000 + i,
                    1,
                )
                .await
                .expect("append");
            assert_eq!(record.seq, Seq::new(i + 1));
        }

        let events = store
            .read(StreamKind::Game, StreamId::new("g-1"), None, None)
            .await
            .expect("read");
        let seqs: Vec<i64> = events.iter().map(|e| e.seq.value()).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn read_respects_bounds() {
        let store = InMemoryEventStore::new();
        for i in 0..5 {
            store
                .append(
                    StreamKind::Game,
                    StreamId::new("g-1"),
                    fill_body(0, 0, "A"),
                    None,
                    1000 + i,
                    1,
                )
                .await
                .expect("append");
        }
        let window = store
            .read(
                StreamKind::Game,
                StreamId::new("g-1"),
                Some(Seq::new(2)),
                Some(Seq::new(4)),
            )
            .await
            .expect("read");
        let seqs: Vec<i64> = window.iter().map(|e| e.seq.value()).collect();
        assert_eq!(seqs, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn solve_store_is_idempotent_and_bumps_counter() {
        let catalog = InMemoryCatalog::new();
        let solves = catalog.solve_store();
        catalog
            .create(NewPuzzle {
                pid: "p-1".to_string(),
                is_public: true,
                uploaded_at: 0,
                content: crate::fixtures::puzzle_3x3(),
                created_by: None,
            })
            .await
            .expect("create puzzle");

        let first = solves
            .record_solve("p-1".to_string(), "g-1".to_string(), 99, 42, SolveStats::default())
            .await
            .expect("record");
        assert!(matches!(first, SolveOutcome::Recorded(_)));

        let second = solves
            .record_solve("p-1".to_string(), "g-1".to_string(), 99, 42, SolveStats::default())
            .await
            .expect("record again");
        assert!(matches!(second, SolveOutcome::AlreadyRecorded(_)));

        let puzzle = catalog
            .find_by_pid("p-1")
            .await
            .expect("find")
            .expect("puzzle exists");
        assert_eq!(puzzle.times_solved, 1);
    }

    #[tokio::test]
    async fn list_public_orders_by_pid_numeric_desc_nulls_last() {
        let catalog = InMemoryCatalog::new();
        for pid in ["10-a", "2-b", "zzz", "30-c"] {
            catalog
                .create(NewPuzzle {
                    pid: pid.to_string(),
                    is_public: true,
                    uploaded_at: 0,
                    content: crate::fixtures::puzzle_3x3(),
                    created_by: None,
                })
                .await
                .expect("create");
        }

        let listings = catalog
            .list_public(ListFilter::default(), 10, 0)
            .await
            .expect("list");
        let pids: Vec<&str> = listings.iter().map(|l| l.pid.as_str()).collect();
        assert_eq!(pids, vec!["30-c", "10-a", "2-b", "zzz"]);
    }
}
