//! Pure projections: fold an ordered event list into game or room state.
//!
//! Projection never performs I/O and never reads a clock: every timestamp
//! comes from the events themselves, so the same ordered list always yields
//! the same state (and the same serialized bytes, since all maps are
//! ordered). Snapshot replay is the same fold started from a deserialized
//! [`GameState`] instead of the `create` event.
//!
//! Callers pass events in ascending `seq` order (the store reads them that
//! way); events at or below the state's current sequence are skipped, which
//! also makes replay after a snapshot robust against overlapping tails.

use crate::event::{Cell, ClockAction, EventBody, EventRecord, GameEventBody, RoomEventBody};
use crate::puzzle::{Clues, GameView, PuzzleInfo};
use crate::stream::Seq;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors from projecting a stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    /// A game stream must begin with a `create` event.
    #[error("Game stream has no create event")]
    NoCreateEvent,
}

/// Solve clock state machine.
///
/// States are `{paused, running}`, initial `paused` at game creation.
/// `start`/`resume` from paused begin accumulating; `pause` from running
/// adds the elapsed interval to `total_time_ms`. Redundant transitions are
/// idempotent no-ops. `true_total_time_ms` tracks wall-clock since the
/// `create` event regardless of pauses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockState {
    /// Whether the clock is currently paused.
    pub paused: bool,
    /// Timestamp (ms) of the last transition while running.
    pub last_updated: i64,
    /// Accumulated running time, ms.
    pub total_time_ms: i64,
    /// Wall-clock ms since game creation, as of the latest clock-relevant
    /// event.
    pub true_total_time_ms: i64,
}

impl ClockState {
    fn new(created_at: i64) -> Self {
        Self {
            paused: true,
            last_updated: created_at,
            total_time_ms: 0,
            true_total_time_ms: 0,
        }
    }

    fn apply(&mut self, action: ClockAction, ts: i64, created_at: i64) {
        match action {
            ClockAction::Start | ClockAction::Resume => {
                if self.paused {
                    self.paused = false;
                    self.last_updated = ts;
                }
            }
            ClockAction::Pause => {
                if !self.paused {
                    self.total_time_ms += (ts - self.last_updated).max(0);
                    self.paused = true;
                    self.last_updated = ts;
                }
            }
        }
        self.true_total_time_ms = (ts - created_at).max(0);
    }
}

/// A chat message, game or room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Sender's user id, when asserted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Sender's display name.
    pub display_name: String,
    /// Message text.
    pub message: String,
    /// Event timestamp, ms.
    pub ts: i64,
}

/// Per-user presence in a game: last reported cursor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GamePresence {
    /// Last cursor position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cell>,
}

/// Projected state of a game stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    /// Source puzzle identifier.
    pub pid: String,
    /// Puzzle metadata.
    pub info: PuzzleInfo,
    /// Live grid.
    pub grid: Vec<Vec<crate::puzzle::CellState>>,
    /// Solution grid.
    pub solution: Vec<Vec<String>>,
    /// Clue lists.
    pub clues: Clues,
    /// Flat indices of circled cells.
    pub circles: Vec<u32>,
    /// Flat indices of shaded cells.
    pub shades: Vec<u32>,
    /// Presence by user id (ordered for deterministic serialization).
    pub users: BTreeMap<String, GamePresence>,
    /// Chat messages in arrival order.
    pub chat: Vec<ChatMessage>,
    /// Solve clock.
    pub clock: ClockState,
    /// Puzzle completed.
    pub solved: bool,
    /// Creation timestamp, ms (the `create` event's `ts`).
    pub created_at: i64,
    /// Sequence number of the last applied event.
    pub seq: Seq,
}

impl GameState {
    fn from_create(view: GameView, pid: String, ts: i64, seq: Seq) -> Self {
        Self {
            pid,
            info: view.info,
            grid: view.grid,
            solution: view.solution,
            clues: view.clues,
            circles: view.circles,
            shades: view.shades,
            users: BTreeMap::new(),
            chat: Vec::new(),
            clock: ClockState::new(ts),
            solved: false,
            created_at: ts,
            seq,
        }
    }

    fn cell_mut(&mut self, cell: Cell) -> Option<&mut crate::puzzle::CellState> {
        self.grid.get_mut(cell.row).and_then(|row| row.get_mut(cell.col))
    }

    fn solution_at(&self, cell: Cell) -> Option<&str> {
        self.solution
            .get(cell.row)
            .and_then(|row| row.get(cell.col))
            .map(String::as_str)
    }
}

/// Per-user membership in a room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMember {
    /// Display name at join time.
    pub display_name: String,
    /// Join timestamp, ms.
    pub joined_at: i64,
}

/// Projected state of a room stream.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomState {
    /// Members by user id (ordered for deterministic serialization).
    pub users: BTreeMap<String, RoomMember>,
    /// Merged room settings.
    pub settings: serde_json::Map<String, Value>,
    /// Chat messages in arrival order.
    pub chat: Vec<ChatMessage>,
    /// Sequence number of the last applied event.
    pub seq: Seq,
}

/// The cells a bulk cell event applies to: its `scope` when present,
/// otherwise the single `(row, col)`.
fn target_cells(row: usize, col: usize, scope: Option<&Vec<Cell>>) -> Vec<Cell> {
    scope.map_or_else(|| vec![Cell::new(row, col)], Clone::clone)
}

/// Project a full game stream.
///
/// # Errors
///
/// Returns [`ProjectionError::NoCreateEvent`] when the stream does not
/// begin with a `create` event (including the empty stream, which is distinct from
/// a valid stream that merely has no later activity).
pub fn project_game(events: &[EventRecord]) -> Result<GameState, ProjectionError> {
    let first = events.first().ok_or(ProjectionError::NoCreateEvent)?;
    let mut state = match &first.body {
        EventBody::Game(GameEventBody::Create { game, pid }) => {
            GameState::from_create((**game).clone(), pid.clone(), first.ts, first.seq)
        }
        _ => return Err(ProjectionError::NoCreateEvent),
    };

    project_game_from(&mut state, &events[1..]);
    Ok(state)
}

/// Apply a tail of events onto existing game state (snapshot replay).
///
/// Events at or below `state.seq` are skipped; later `create` events are
/// ignored (a stream has exactly one).
pub fn project_game_from(state: &mut GameState, events: &[EventRecord]) {
    for event in events {
        if event.seq <= state.seq {
            continue;
        }
        apply_game_event(state, event);
        state.seq = event.seq;
    }
}

/// Apply a single game event to state.
///
/// Cells outside the grid bounds are skipped; the fold never panics on
/// hostile coordinates.
#[allow(clippy::too_many_lines)] // One arm per event tag
pub fn apply_game_event(state: &mut GameState, event: &EventRecord) {
    let EventBody::Game(body) = &event.body else {
        return;
    };

    match body {
        // A stream has exactly one create; repeats are ignored.
        GameEventBody::Create { .. } => {}
        GameEventBody::CellFill {
            row,
            col,
            value,
            pencil,
            solved_by,
        } => {
            if let Some(cell) = state.cell_mut(Cell::new(*row, *col)) {
                cell.value = value.clone();
                cell.bad = false;
                cell.pencil = pencil.unwrap_or(false);
                if let Some(user) = solved_by {
                    cell.solved_by = Some(user.clone());
                }
            }
        }
        GameEventBody::CellClear { row, col, scope } => {
            for target in target_cells(*row, *col, scope.as_ref()) {
                if let Some(cell) = state.cell_mut(target) {
                    cell.value.clear();
                    cell.pencil = false;
                    cell.good = false;
                    cell.bad = false;
                }
            }
        }
        GameEventBody::CellCheck { row, col, scope } => {
            for target in target_cells(*row, *col, scope.as_ref()) {
                let Some(answer) = state.solution_at(target).map(ToOwned::to_owned) else {
                    continue;
                };
                if let Some(cell) = state.cell_mut(target) {
                    let correct = cell.value == answer;
                    cell.good = correct;
                    cell.bad = !correct;
                }
            }
        }
        GameEventBody::CellReveal { row, col, scope } => {
            for target in target_cells(*row, *col, scope.as_ref()) {
                let Some(answer) = state.solution_at(target).map(ToOwned::to_owned) else {
                    continue;
                };
                if let Some(cell) = state.cell_mut(target) {
                    cell.value = answer;
                    cell.revealed = true;
                }
            }
        }
        GameEventBody::CursorMove { row, col } => {
            if let Some(user_id) = &event.user_id {
                state
                    .users
                    .entry(user_id.clone())
                    .or_default()
                    .cursor = Some(Cell::new(*row, *col));
            }
        }
        GameEventBody::ChatMessage {
            display_name,
            message,
        } => {
            state.chat.push(ChatMessage {
                user_id: event.user_id.clone(),
                display_name: display_name.clone(),
                message: message.clone(),
                ts: event.ts,
            });
        }
        GameEventBody::ClockUpdate { action, .. } => {
            let created_at = state.created_at;
            state.clock.apply(*action, event.ts, created_at);
        }
        GameEventBody::PuzzleSolved { total_time_ms } => {
            state.solved = true;
            if let Some(total) = total_time_ms {
                state.clock.total_time_ms = *total;
            }
            state.clock.true_total_time_ms = (event.ts - state.created_at).max(0);
        }
    }
}

/// Project a full room stream. An empty stream is a valid, empty room.
#[must_use]
pub fn project_room(events: &[EventRecord]) -> RoomState {
    let mut state = RoomState::default();
    project_room_from(&mut state, events);
    state
}

/// Apply a tail of events onto existing room state (snapshot replay).
pub fn project_room_from(state: &mut RoomState, events: &[EventRecord]) {
    for event in events {
        if event.seq <= state.seq {
            continue;
        }
        apply_room_event(state, event);
        state.seq = event.seq;
    }
}

/// Apply a single room event to state.
pub fn apply_room_event(state: &mut RoomState, event: &EventRecord) {
    let EventBody::Room(body) = &event.body else {
        return;
    };

    match body {
        RoomEventBody::UserJoin { display_name } => {
            if let Some(user_id) = &event.user_id {
                state.users.insert(
                    user_id.clone(),
                    RoomMember {
                        display_name: display_name.clone(),
                        joined_at: event.ts,
                    },
                );
            }
        }
        RoomEventBody::UserLeave {} => {
            if let Some(user_id) = &event.user_id {
                state.users.remove(user_id);
            }
        }
        RoomEventBody::ChatMessage {
            display_name,
            message,
        } => {
            state.chat.push(ChatMessage {
                user_id: event.user_id.clone(),
                display_name: display_name.clone(),
                message: message.clone(),
                ts: event.ts,
            });
        }
        RoomEventBody::RoomSettingsUpdate { settings } => {
            if let Value::Object(updates) = settings {
                for (key, value) in updates {
                    state.settings.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use crate::puzzle::{PuzzleContent, PuzzleInfo};
    use crate::stream::{StreamId, StreamKind};

    fn content_3x3() -> PuzzleContent {
        PuzzleContent {
            info: PuzzleInfo {
                title: "Tiny".to_string(),
                author: "Setter".to_string(),
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

    fn game_event(seq: i64, ts: i64, body: GameEventBody) -> EventRecord {
        EventRecord {
            stream_kind: StreamKind::Game,
            stream_id: StreamId::new("g-1"),
            seq: Seq::new(seq),
            body: EventBody::Game(body),
            user_id: Some("u-1".to_string()),
            ts,
            schema_version: 1,
        }
    }

    fn room_event(seq: i64, ts: i64, user: &str, body: RoomEventBody) -> EventRecord {
        EventRecord {
            stream_kind: StreamKind::Room,
            stream_id: StreamId::new("r-1"),
            seq: Seq::new(seq),
            body: EventBody::Room(body),
            user_id: Some(user.to_string()),
            ts,
            schema_version: 1,
        }
    }

    fn create_event(seq: i64, ts: i64) -> EventRecord {
        game_event(
            seq,
            ts,
            GameEventBody::Create {
                game: Box::new(content_3x3().to_game_view()),
                pid: "p-1".to_string(),
            },
        )
    }

    #[test]
    fn empty_stream_has_no_create_event() {
        assert_eq!(project_game(&[]), Err(ProjectionError::NoCreateEvent));
    }

    #[test]
    fn stream_not_starting_with_create_is_rejected() {
        let events = vec![game_event(
            1,
            1000,
            GameEventBody::CursorMove { row: 0, col: 0 },
        )];
        assert_eq!(project_game(&events), Err(ProjectionError::NoCreateEvent));
    }

    #[test]
    fn fill_sets_value_and_clears_bad() {
        let events = vec![
            create_event(1, 1000),
            game_event(
                2,
                1100,
                GameEventBody::CellCheck {
                    row: 0,
                    col: 0,
                    scope: None,
                },
            ),
            game_event(
                3,
                1200,
                GameEventBody::CellFill {
                    row: 0,
                    col: 0,
                    value: "A".to_string(),
                    pencil: None,
                    solved_by: Some("u-1".to_string()),
                },
            ),
        ];
        let state = project_game(&events).expect("project");
        let cell = &state.grid[0][0];
        assert_eq!(cell.value, "A");
        assert!(!cell.bad); // check marked the empty cell bad; fill cleared it
        assert_eq!(cell.solved_by.as_deref(), Some("u-1"));
    }

    #[test]
    fn check_marks_good_and_bad_by_solution() {
        let events = vec![
            create_event(1, 1000),
            game_event(
                2,
                1100,
                GameEventBody::CellFill {
                    row: 0,
                    col: 0,
                    value: "A".to_string(),
                    pencil: None,
                    solved_by: None,
                },
            ),
            game_event(
                3,
                1200,
                GameEventBody::CellFill {
                    row: 0,
                    col: 1,
                    value: "X".to_string(),
                    pencil: None,
                    solved_by: None,
                },
            ),
            game_event(
                4,
                1300,
                GameEventBody::CellCheck {
                    row: 0,
                    col: 0,
                    scope: Some(vec![Cell::new(0, 0), Cell::new(0, 1)]),
                },
            ),
        ];
        let state = project_game(&events).expect("project");
        assert!(state.grid[0][0].good);
        assert!(!state.grid[0][0].bad);
        assert!(state.grid[0][1].bad);
        assert!(!state.grid[0][1].good);
    }

    #[test]
    fn reveal_scope_fills_from_solution() {
        let events = vec![
            create_event(1, 1000),
            game_event(
                2,
                1100,
                GameEventBody::CellReveal {
                    row: 0,
                    col: 0,
                    scope: Some(vec![Cell::new(0, 0), Cell::new(0, 1), Cell::new(0, 2)]),
                },
            ),
        ];
        let state = project_game(&events).expect("project");
        assert_eq!(state.grid[0][0].value, "A");
        assert_eq!(state.grid[0][1].value, "B");
        assert_eq!(state.grid[0][2].value, "C");
        assert!(state.grid[0][1].revealed);
        assert_eq!(state.grid[1][0].value, "");
    }

    #[test]
    fn out_of_bounds_cells_are_skipped() {
        let events = vec![
            create_event(1, 1000),
            game_event(
                2,
                1100,
                GameEventBody::CellFill {
                    row: 9,
                    col: 9,
                    value: "Z".to_string(),
                    pencil: None,
                    solved_by: None,
                },
            ),
        ];
        let state = project_game(&events).expect("project");
        assert_eq!(state.seq, Seq::new(2));
    }

    #[test]
    fn cursor_move_upserts_presence() {
        let mut e1 = game_event(2, 1100, GameEventBody::CursorMove { row: 1, col: 1 });
        e1.user_id = Some("u-a".to_string());
        let mut e2 = game_event(3, 1200, GameEventBody::CursorMove { row: 2, col: 0 });
        e2.user_id = Some("u-a".to_string());
        let events = vec![create_event(1, 1000), e1, e2];
        let state = project_game(&events).expect("project");
        assert_eq!(state.users.len(), 1);
        assert_eq!(state.users["u-a"].cursor, Some(Cell::new(2, 0)));
    }

    #[test]
    fn clock_scenario_start_pause_resume() {
        // create@1000, start@1500, pause@2200, resume@3000
        let events = vec![
            create_event(1, 1000),
            game_event(
                2,
                1500,
                GameEventBody::ClockUpdate {
                    action: ClockAction::Start,
                    total_time_ms: None,
                },
            ),
            game_event(
                3,
                2200,
                GameEventBody::ClockUpdate {
                    action: ClockAction::Pause,
                    total_time_ms: Some(700),
                },
            ),
            game_event(
                4,
                3000,
                GameEventBody::ClockUpdate {
                    action: ClockAction::Resume,
                    total_time_ms: None,
                },
            ),
        ];
        let state = project_game(&events).expect("project");
        assert!(!state.clock.paused);
        assert_eq!(state.clock.total_time_ms, 700);
        assert_eq!(state.clock.true_total_time_ms, 2000);
    }

    #[test]
    fn redundant_clock_transitions_are_noops() {
        let events = vec![
            create_event(1, 1000),
            game_event(
                2,
                1500,
                GameEventBody::ClockUpdate {
                    action: ClockAction::Start,
                    total_time_ms: None,
                },
            ),
            game_event(
                3,
                1800,
                GameEventBody::ClockUpdate {
                    action: ClockAction::Start,
                    total_time_ms: None,
                },
            ),
            game_event(
                4,
                2500,
                GameEventBody::ClockUpdate {
                    action: ClockAction::Pause,
                    total_time_ms: None,
                },
            ),
            game_event(
                5,
                2600,
                GameEventBody::ClockUpdate {
                    action: ClockAction::Pause,
                    total_time_ms: None,
                },
            ),
        ];
        let state = project_game(&events).expect("project");
        assert!(state.clock.paused);
        // Start at 1500 (second start ignored), pause at 2500.
        assert_eq!(state.clock.total_time_ms, 1000);
    }

    #[test]
    fn puzzle_solved_sets_flag_and_total_time() {
        let events = vec![
            create_event(1, 1000),
            game_event(
                2,
                43_000,
                GameEventBody::PuzzleSolved {
                    total_time_ms: Some(42_000),
                },
            ),
        ];
        let state = project_game(&events).expect("project");
        assert!(state.solved);
        assert_eq!(state.clock.total_time_ms, 42_000);
        assert_eq!(state.clock.true_total_time_ms, 42_000);
    }

    #[test]
    fn snapshot_replay_equals_full_projection() {
        let events = vec![
            create_event(1, 1000),
            game_event(
                2,
                1100,
                GameEventBody::CellFill {
                    row: 0,
                    col: 0,
                    value: "A".to_string(),
                    pencil: None,
                    solved_by: None,
                },
            ),
            game_event(
                3,
                1200,
                GameEventBody::ClockUpdate {
                    action: ClockAction::Start,
                    total_time_ms: None,
                },
            ),
            game_event(
                4,
                1300,
                GameEventBody::ChatMessage {
                    display_name: "ada".to_string(),
                    message: "hello".to_string(),
                },
            ),
        ];

        let full = project_game(&events).expect("full projection");

        // Snapshot at every prefix k, replay the tail, compare.
        for k in 1..events.len() {
            let snapshot = project_game(&events[..k]).expect("prefix projection");
            let blob = serde_json::to_value(&snapshot).expect("serialize snapshot");
            let mut resumed: GameState =
                serde_json::from_value(blob).expect("deserialize snapshot");
            project_game_from(&mut resumed, &events[k..]);
            assert_eq!(resumed, full, "prefix {k}");
        }
    }

    #[test]
    fn projection_is_byte_deterministic() {
        let events = vec![
            create_event(1, 1000),
            game_event(
                2,
                1100,
                GameEventBody::CellFill {
                    row: 1,
                    col: 2,
                    value: "F".to_string(),
                    pencil: Some(true),
                    solved_by: None,
                },
            ),
        ];
        let a = serde_json::to_vec(&project_game(&events).expect("a")).expect("bytes a");
        let b = serde_json::to_vec(&project_game(&events).expect("b")).expect("bytes b");
        assert_eq!(a, b);
    }

    #[test]
    fn room_join_leave_and_settings_merge() {
        let events = vec![
            room_event(
                1,
                1000,
                "u-a",
                RoomEventBody::UserJoin {
                    display_name: "ada".to_string(),
                },
            ),
            room_event(
                2,
                1100,
                "u-b",
                RoomEventBody::UserJoin {
                    display_name: "bob".to_string(),
                },
            ),
            room_event(
                3,
                1200,
                "u-a",
                RoomEventBody::RoomSettingsUpdate {
                    settings: serde_json::json!({ "allowChat": true, "name": "lobby" }),
                },
            ),
            room_event(
                4,
                1300,
                "u-a",
                RoomEventBody::RoomSettingsUpdate {
                    settings: serde_json::json!({ "name": "den" }),
                },
            ),
            room_event(5, 1400, "u-b", RoomEventBody::UserLeave {}),
        ];
        let state = project_room(&events);
        assert_eq!(state.users.len(), 1);
        assert_eq!(state.users["u-a"].display_name, "ada");
        assert_eq!(state.settings["allowChat"], true);
        assert_eq!(state.settings["name"], "den");
    }

    #[test]
    fn empty_room_stream_is_valid() {
        let state = project_room(&[]);
        assert!(state.users.is_empty());
        assert_eq!(state.seq, Seq::new(0));
    }
}
