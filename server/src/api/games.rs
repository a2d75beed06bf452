//! Game endpoints: creation, projected state, solve recording.
//!
//! Game creation emits the `create` event through the hub as its first
//! act; the stream itself is the only record that the game exists. State
//! fetches fold the stream, resuming from the snapshot slot when it is
//! valid, and opportunistically refresh the snapshot when enough tail has
//! accumulated.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use gridcast_core::catalog::PuzzleCatalog;
use gridcast_core::event::{EventBody, EventDraft, EventRecord, GameEventBody};
use gridcast_core::projection::{self, GameState};
use gridcast_core::solve::SolveRecord;
use gridcast_core::store::EventStore;
use gridcast_core::stream::{StreamId, StreamKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

/// Request body for `POST /api/games`.
#[derive(Debug, Deserialize)]
pub struct CreateGameRequest {
    /// Puzzle to play.
    pub pid: String,
    /// Game id; generated when absent.
    #[serde(default)]
    pub gid: Option<String>,
    /// Creating user.
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Response body for `POST /api/games`.
#[derive(Debug, Serialize)]
pub struct CreateGameResponse {
    /// The new game's id.
    pub gid: String,
    /// The persisted `create` event.
    pub event: EventRecord,
}

/// Create a game on a puzzle: derive the blank board and emit `create`.
pub async fn create_game(
    State(state): State<AppState>,
    Json(req): Json<CreateGameRequest>,
) -> Result<(StatusCode, Json<CreateGameResponse>), ApiError> {
    let puzzle = state
        .catalog
        .find_by_pid(&req.pid)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("puzzle {} not found", req.pid)))?;

    let gid = req
        .gid
        .filter(|gid| !gid.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

    let body = EventBody::Game(GameEventBody::Create {
        game: Box::new(puzzle.content.to_game_view()),
        pid: puzzle.pid.clone(),
    });
    let draft = EventDraft::from_body(&body, req.user_id)?;

    let event = state
        .hub
        .publish(StreamKind::Game, StreamId::new(gid.clone()), draft)
        .await?;

    debug!(gid = %gid, pid = %puzzle.pid, "Game created");
    Ok((
        StatusCode::CREATED,
        Json(CreateGameResponse { gid, event }),
    ))
}

/// Fetch the projected state of a game.
pub async fn get_game_state(
    State(state): State<AppState>,
    Path(gid): Path<String>,
) -> Result<Json<GameState>, ApiError> {
    let game_state = load_game_state(&state, &gid).await?;
    Ok(Json(game_state))
}

/// Load a game's state, snapshot-aware.
///
/// A snapshot is trusted only when the stream confirms it (I2): either
/// events exist past `snapshot_seq`, or the event at `snapshot_seq` itself
/// is present. A stale or undecodable snapshot falls back to a full
/// replay; snapshots are an optimization, never a correctness input.
pub async fn load_game_state(state: &AppState, gid: &str) -> Result<GameState, ApiError> {
    let stream_id = StreamId::new(gid);
    let store: &dyn EventStore = state.store.as_ref();

    if let Some(snapshot) = store
        .get_snapshot(StreamKind::Game, stream_id.clone())
        .await?
    {
        let tail = store
            .read(
                StreamKind::Game,
                stream_id.clone(),
                Some(snapshot.snapshot_seq.next()),
                None,
            )
            .await?;

        let snapshot_confirmed = if tail.is_empty() {
            !store
                .read(
                    StreamKind::Game,
                    stream_id.clone(),
                    Some(snapshot.snapshot_seq),
                    Some(snapshot.snapshot_seq),
                )
                .await?
                .is_empty()
        } else {
            true
        };

        if snapshot_confirmed {
            match serde_json::from_value::<GameState>(snapshot.data) {
                Ok(mut resumed) => {
                    let tail_len = tail.len() as u64;
                    projection::project_game_from(&mut resumed, &tail);
                    maybe_refresh_snapshot(state, &stream_id, &resumed, tail_len).await;
                    return Ok(resumed);
                }
                Err(e) => {
                    warn!(gid = %gid, error = %e, "Snapshot blob undecodable; full replay");
                }
            }
        } else {
            warn!(
                gid = %gid,
                snapshot_seq = %snapshot.snapshot_seq,
                "Snapshot beyond persisted stream; ignoring"
            );
        }
    }

    let events = store
        .read(StreamKind::Game, stream_id.clone(), None, None)
        .await?;
    let projected = projection::project_game(&events)?;
    maybe_refresh_snapshot(state, &stream_id, &projected, events.len() as u64).await;
    Ok(projected)
}

/// Overwrite the snapshot slot when enough tail has been replayed.
/// Failures are logged and swallowed; a stale slot just costs replay time.
async fn maybe_refresh_snapshot(
    state: &AppState,
    stream_id: &StreamId,
    game_state: &GameState,
    replayed: u64,
) {
    if replayed < state.config.hub.snapshot_interval {
        return;
    }
    let data = match serde_json::to_value(game_state) {
        Ok(data) => data,
        Err(e) => {
            warn!(gid = %stream_id, error = %e, "Snapshot serialization failed");
            return;
        }
    };
    if let Err(e) = state
        .store
        .upsert_snapshot(StreamKind::Game, stream_id.clone(), data, game_state.seq)
        .await
    {
        warn!(gid = %stream_id, error = %e, "Snapshot refresh failed");
    } else {
        debug!(gid = %stream_id, seq = %game_state.seq, "Snapshot refreshed");
    }
}

/// Request body for `POST /api/games/:gid/solve`.
#[derive(Debug, Deserialize)]
pub struct RecordSolveRequest {
    /// Puzzle the game solved.
    pub pid: String,
    /// Reported solve duration, seconds.
    pub time_taken_seconds: i64,
}

/// Response body for `POST /api/games/:gid/solve`.
#[derive(Debug, Serialize)]
pub struct RecordSolveResponse {
    /// Whether this call inserted the row.
    pub recorded: bool,
    /// The solve row.
    pub solve: SolveView,
}

/// Serializable view of a solve record.
#[derive(Debug, Serialize)]
pub struct SolveView {
    /// Puzzle identifier.
    pub pid: String,
    /// Game identifier.
    pub gid: String,
    /// Recording timestamp, ms.
    pub solved_at: i64,
    /// Reported duration, seconds.
    pub time_taken_seconds: i64,
    /// Distinct revealed cells.
    pub revealed_squares_count: i64,
    /// Distinct checked cells.
    pub checked_squares_count: i64,
}

impl From<&SolveRecord> for SolveView {
    fn from(record: &SolveRecord) -> Self {
        Self {
            pid: record.pid.clone(),
            gid: record.gid.clone(),
            solved_at: record.solved_at,
            time_taken_seconds: record.time_taken_seconds,
            revealed_squares_count: record.revealed_squares_count,
            checked_squares_count: record.checked_squares_count,
        }
    }
}

/// Record that this game completed its puzzle. Idempotent per `(pid, gid)`.
pub async fn record_solve(
    State(state): State<AppState>,
    Path(gid): Path<String>,
    Json(req): Json<RecordSolveRequest>,
) -> Result<Json<RecordSolveResponse>, ApiError> {
    let outcome = state
        .solves
        .record_solve(&req.pid, &gid, req.time_taken_seconds)
        .await?;

    let recorded = matches!(outcome, gridcast_core::solve::SolveOutcome::Recorded(_));
    Ok(Json(RecordSolveResponse {
        recorded,
        solve: SolveView::from(outcome.record()),
    }))
}
