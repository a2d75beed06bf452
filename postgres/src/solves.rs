//! `PostgreSQL` solve store: exactly-once solve recording.
//!
//! The solve row insert and the puzzle's `times_solved` increment commit in
//! one READ COMMITTED transaction, so a solve record existing implies the
//! counter was bumped exactly once for it. The unique `(pid, gid)` index is
//! the idempotency backstop: a writer that loses the race re-reads and
//! reports the winner's row.

use gridcast_core::solve::{
    SolveError, SolveFuture, SolveOutcome, SolveRecord, SolveStats, SolveStore,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// `PostgreSQL` unique-constraint violation.
const UNIQUE_VIOLATION: &str = "23505";

/// `PostgreSQL`-backed solve store.
#[derive(Clone)]
pub struct PostgresSolveStore {
    pool: PgPool,
}

impl PostgresSolveStore {
    /// Create a solve store over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn record_from_row(row: &PgRow) -> SolveRecord {
        SolveRecord {
            id: row.get("id"),
            pid: row.get("pid"),
            gid: row.get("gid"),
            solved_at: row.get("solved_at"),
            time_taken_seconds: row.get("time_taken_seconds"),
            revealed_squares_count: row.get("revealed_squares_count"),
            checked_squares_count: row.get("checked_squares_count"),
        }
    }

    async fn fetch(&self, pid: &str, gid: &str) -> Result<Option<SolveRecord>, SolveError> {
        let row = sqlx::query(
            "SELECT id, pid, gid, solved_at, time_taken_seconds,
                    revealed_squares_count, checked_squares_count
             FROM puzzle_solves WHERE pid = $1 AND gid = $2",
        )
        .bind(pid)
        .bind(gid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SolveError::Backend(e.to_string()))?;
        Ok(row.as_ref().map(Self::record_from_row))
    }
}

impl SolveStore for PostgresSolveStore {
    fn record_solve(
        &self,
        pid: String,
        gid: String,
        solved_at: i64,
        time_taken_seconds: i64,
        stats: SolveStats,
    ) -> SolveFuture<'_, SolveOutcome> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| SolveError::Backend(e.to_string()))?;

            // Idempotency fast path: the row may already exist.
            let existing = sqlx::query(
                "SELECT id, pid, gid, solved_at, time_taken_seconds,
                        revealed_squares_count, checked_squares_count
                 FROM puzzle_solves WHERE pid = $1 AND gid = $2",
            )
            .bind(&pid)
            .bind(&gid)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| SolveError::Backend(e.to_string()))?;

            if let Some(row) = existing {
                tx.commit()
                    .await
                    .map_err(|e| SolveError::Backend(e.to_string()))?;
                return Ok(SolveOutcome::AlreadyRecorded(Self::record_from_row(&row)));
            }

            let inserted = sqlx::query(
                "INSERT INTO puzzle_solves
                     (pid, gid, solved_at, time_taken_seconds,
                      revealed_squares_count, checked_squares_count)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 RETURNING id, pid, gid, solved_at, time_taken_seconds,
                           revealed_squares_count, checked_squares_count",
            )
            .bind(&pid)
            .bind(&gid)
            .bind(solved_at)
            .bind(time_taken_seconds)
            .bind(stats.revealed_squares)
            .bind(stats.checked_squares)
            .fetch_one(&mut *tx)
            .await;

            let row = match inserted {
                Ok(row) => row,
                Err(e) => {
                    let unique_race = e
                        .as_database_error()
                        .and_then(|db| db.code())
                        .as_deref()
                        == Some(UNIQUE_VIOLATION);
                    let _ = tx.rollback().await;

                    if unique_race {
                        // Another writer inserted first; their transaction
                        // also bumped the counter.
                        tracing::debug!(pid = %pid, gid = %gid, "Solve insert lost race");
                        return match self.fetch(&pid, &gid).await? {
                            Some(record) => Ok(SolveOutcome::AlreadyRecorded(record)),
                            None => Err(SolveError::Conflict { pid, gid }),
                        };
                    }
                    return Err(SolveError::Backend(e.to_string()));
                }
            };

            // The counter bump rides the same transaction as the insert:
            // if one commits, both did.
            sqlx::query("UPDATE puzzles SET times_solved = times_solved + 1 WHERE pid = $1")
                .bind(&pid)
                .execute(&mut *tx)
                .await
                .map_err(|e| SolveError::Backend(e.to_string()))?;

            tx.commit()
                .await
                .map_err(|e| SolveError::Backend(e.to_string()))?;

            let record = Self::record_from_row(&row);
            tracing::info!(
                pid = %record.pid,
                gid = %record.gid,
                time_taken_seconds = record.time_taken_seconds,
                "Solve recorded"
            );
            metrics::counter!("solves.recorded").increment(1);
            Ok(SolveOutcome::Recorded(record))
        })
    }

    fn find(&self, pid: &str, gid: &str) -> SolveFuture<'_, Option<SolveRecord>> {
        let pid = pid.to_string();
        let gid = gid.to_string();
        Box::pin(async move { self.fetch(&pid, &gid).await })
    }
}
