//! Solve recording: detect completion stats from the event stream and
//! record each `(pid, gid)` solve exactly once.
//!
//! The service half lives here: it validates inputs, derives
//! reveal/check counters from the game's event tail, and delegates the
//! atomic insert-plus-counter-bump to a [`SolveStore`] implementation. The
//! store half owns the transaction: insert the solve row and increment the
//! puzzle's `times_solved` together, with the unique `(pid, gid)` index as
//! the idempotency backstop.

use crate::clock::Clock;
use crate::event::{Cell, EventBody, EventRecord, GameEventBody};
use crate::store::{EventStore, StoreError};
use crate::stream::{StreamId, StreamKind};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Boxed future alias used by the solve store trait methods.
pub type SolveFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SolveError>> + Send + 'a>>;

/// Errors from solve recording.
#[derive(Error, Debug)]
pub enum SolveError {
    /// `time_taken_seconds` must be positive.
    #[error("Invalid time taken: {0} (must be > 0)")]
    InvalidTimeTaken(i64),

    /// Reading the game stream failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The solve store is unreachable or rejected the operation.
    #[error("Solve backend error: {0}")]
    Backend(String),

    /// A concurrent writer raced the insert and no row was found on
    /// re-read.
    #[error("Solve record conflict for pid {pid}, gid {gid}")]
    Conflict {
        /// Puzzle identifier.
        pid: String,
        /// Game identifier.
        gid: String,
    },
}

/// A recorded solve: one row per completed `(pid, gid)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SolveRecord {
    /// Surrogate primary key.
    pub id: i64,
    /// Puzzle identifier.
    pub pid: String,
    /// Game identifier.
    pub gid: String,
    /// Recording timestamp, ms since epoch.
    pub solved_at: i64,
    /// Reported solve duration, seconds.
    pub time_taken_seconds: i64,
    /// Distinct cells touched by reveals during the game.
    pub revealed_squares_count: i64,
    /// Distinct cells touched by checks during the game.
    pub checked_squares_count: i64,
}

/// Outcome of a solve recording attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SolveOutcome {
    /// This call inserted the row (and bumped the puzzle counter).
    Recorded(SolveRecord),
    /// A row already existed; nothing changed.
    AlreadyRecorded(SolveRecord),
}

impl SolveOutcome {
    /// The solve row regardless of which writer inserted it.
    #[must_use]
    pub const fn record(&self) -> &SolveRecord {
        match self {
            Self::Recorded(record) | Self::AlreadyRecorded(record) => record,
        }
    }
}

/// Reveal/check counters derived from a game's event stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SolveStats {
    /// Distinct `(row, col)` cells touched by `cell_reveal` events.
    pub revealed_squares: i64,
    /// Distinct `(row, col)` cells touched by `cell_check` events.
    pub checked_squares: i64,
}

/// Derive [`SolveStats`] from an ordered game stream.
///
/// Each `cell_reveal`/`cell_check` contributes its `scope` when present,
/// else its single `(row, col)`; cells are counted once no matter how many
/// events touch them.
#[must_use]
pub fn solve_stats(events: &[EventRecord]) -> SolveStats {
    let mut revealed: HashSet<Cell> = HashSet::new();
    let mut checked: HashSet<Cell> = HashSet::new();

    for event in events {
        let EventBody::Game(body) = &event.body else {
            continue;
        };
        match body {
            GameEventBody::CellReveal { row, col, scope } => {
                collect_cells(&mut revealed, *row, *col, scope.as_deref());
            }
            GameEventBody::CellCheck { row, col, scope } => {
                collect_cells(&mut checked, *row, *col, scope.as_deref());
            }
            _ => {}
        }
    }

    SolveStats {
        revealed_squares: revealed.len() as i64,
        checked_squares: checked.len() as i64,
    }
}

fn collect_cells(into: &mut HashSet<Cell>, row: usize, col: usize, scope: Option<&[Cell]>) {
    match scope {
        Some(cells) => into.extend(cells.iter().copied()),
        None => {
            into.insert(Cell::new(row, col));
        }
    }
}

/// Transactional storage for solve records.
///
/// `record_solve` must be atomic with the puzzle counter increment: when
/// the insert succeeds the increment has happened in the same transaction,
/// and a lost race against a concurrent writer resolves to
/// [`SolveOutcome::AlreadyRecorded`].
pub trait SolveStore: Send + Sync {
    /// Insert a solve row and bump the puzzle's `times_solved`, or return
    /// the existing row (idempotent per `(pid, gid)`).
    ///
    /// # Errors
    ///
    /// - [`SolveError::Backend`] for store failures
    /// - [`SolveError::Conflict`] when a unique-index race leaves no row to
    ///   re-read (pathological; surfaced for the caller to retry)
    fn record_solve(
        &self,
        pid: String,
        gid: String,
        solved_at: i64,
        time_taken_seconds: i64,
        stats: SolveStats,
    ) -> SolveFuture<'_, SolveOutcome>;

    /// Look up a solve row by `(pid, gid)`.
    ///
    /// # Errors
    ///
    /// [`SolveError::Backend`] for store failures.
    fn find(&self, pid: &str, gid: &str) -> SolveFuture<'_, Option<SolveRecord>>;
}

/// Completion recorder: derives stats from the event stream, then records
/// the solve exactly once.
pub struct SolveService {
    events: Arc<dyn EventStore>,
    solves: Arc<dyn SolveStore>,
    clock: Arc<dyn Clock>,
}

impl SolveService {
    /// Create a solve service over the given stores.
    #[must_use]
    pub fn new(
        events: Arc<dyn EventStore>,
        solves: Arc<dyn SolveStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            events,
            solves,
            clock,
        }
    }

    /// Record that game `gid` completed puzzle `pid`.
    ///
    /// Reads the game stream, derives distinct reveal/check counters, and
    /// delegates the atomic insert to the solve store. Calling this any
    /// number of times yields exactly one row and exactly one counter
    /// increment.
    ///
    /// # Errors
    ///
    /// - [`SolveError::InvalidTimeTaken`] for a non-positive duration
    /// - [`SolveError::Store`] when the event stream cannot be read
    /// - [`SolveError::Backend`] / [`SolveError::Conflict`] from the store
    pub async fn record_solve(
        &self,
        pid: &str,
        gid: &str,
        time_taken_seconds: i64,
    ) -> Result<SolveOutcome, SolveError> {
        if time_taken_seconds <= 0 {
            return Err(SolveError::InvalidTimeTaken(time_taken_seconds));
        }

        let events = self
            .events
            .read(StreamKind::Game, StreamId::new(gid), None, None)
            .await?;
        let stats = solve_stats(&events);

        tracing::debug!(
            pid = %pid,
            gid = %gid,
            revealed = stats.revealed_squares,
            checked = stats.checked_squares,
            "Recording solve"
        );

        let outcome = self
            .solves
            .record_solve(
                pid.to_string(),
                gid.to_string(),
                self.clock.now_ms(),
                time_taken_seconds,
                stats,
            )
            .await?;

        if matches!(outcome, SolveOutcome::AlreadyRecorded(_)) {
            tracing::debug!(pid = %pid, gid = %gid, "Solve already recorded");
        }
        Ok(outcome)
    }
}
