//! Event envelope and the closed set of event payloads.
//!
//! Events are immutable facts: created once, never updated or deleted.
//! Current state is always the fold of a stream's events ([`crate::projection`]).
//!
//! # Wire and storage format
//!
//! A payload is an adjacently-tagged enum serialized as
//! `{"type": "<tag>", "payload": {...}}`; the envelope flattens around it:
//!
//! ```json
//! {
//!   "stream_kind": "game",
//!   "stream_id": "g-1",
//!   "seq": 4,
//!   "type": "cell_fill",
//!   "payload": { "row": 0, "col": 2, "value": "C" },
//!   "user_id": "u-7",
//!   "ts": 1700000000000,
//!   "schema_version": 1
//! }
//! ```
//!
//! The store persists `type` and `payload` in separate columns; decoding is
//! driven by the stream kind plus the tag, and an unknown tag fails loudly;
//! silently dropping events would violate the contiguous-prefix invariant.

use crate::puzzle::GameView;
use crate::stream::{Seq, StreamId, StreamKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors from decoding a stored or client-submitted event.
#[derive(Error, Debug)]
pub enum EventDecodeError {
    /// The tag is not in the closed set for this stream kind.
    #[error("Unknown {kind} event type: {event_type}")]
    UnknownType {
        /// Stream kind the event claimed to belong to.
        kind: StreamKind,
        /// The offending tag.
        event_type: String,
    },

    /// The payload does not match the shape fixed for its tag.
    #[error("Malformed event payload: {0}")]
    Payload(String),
}

/// A cell address used by `scope` arrays on bulk cell events.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    /// Zero-based row.
    pub row: usize,
    /// Zero-based column.
    pub col: usize,
}

impl Cell {
    /// Create a cell address.
    #[must_use]
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

/// Clock control actions carried by `clock_update`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockAction {
    /// Start the clock (from paused).
    Start,
    /// Pause the clock (from running).
    Pause,
    /// Resume the clock; behaves as `Start`.
    Resume,
}

/// Game-stream event payloads, one variant per tag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum GameEventBody {
    /// First event of every game: the initial board plus the source puzzle.
    Create {
        /// Initial game view (blank grid derived from the solution).
        game: Box<GameView>,
        /// Source puzzle identifier.
        pid: String,
    },
    /// A cell was filled with a value.
    CellFill {
        /// Target row.
        row: usize,
        /// Target column.
        col: usize,
        /// The value entered.
        value: String,
        /// Entered as a pencil mark.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pencil: Option<bool>,
        /// User credited with the fill, when the client reports one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        solved_by: Option<String>,
    },
    /// A cell (or scope of cells) was blanked.
    CellClear {
        /// Target row.
        row: usize,
        /// Target column.
        col: usize,
        /// Additional cells cleared by the same action.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope: Option<Vec<Cell>>,
    },
    /// A cell (or scope) was checked against the solution.
    CellCheck {
        /// Target row.
        row: usize,
        /// Target column.
        col: usize,
        /// Additional cells checked by the same action (word/region check).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope: Option<Vec<Cell>>,
    },
    /// A cell (or scope) was revealed from the solution.
    CellReveal {
        /// Target row.
        row: usize,
        /// Target column.
        col: usize,
        /// Additional cells revealed by the same action (word/region reveal).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope: Option<Vec<Cell>>,
    },
    /// A user's cursor moved.
    CursorMove {
        /// Cursor row.
        row: usize,
        /// Cursor column.
        col: usize,
    },
    /// A chat message in the game.
    ChatMessage {
        /// Display name of the sender.
        display_name: String,
        /// Message text.
        message: String,
    },
    /// Clock control.
    ClockUpdate {
        /// The transition requested.
        action: ClockAction,
        /// Accumulated solve time reported by the client, ms.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_time_ms: Option<i64>,
    },
    /// The puzzle was completed.
    PuzzleSolved {
        /// Final solve time, ms, when carried.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_time_ms: Option<i64>,
    },
}

/// Room-stream event payloads, one variant per tag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RoomEventBody {
    /// A user joined the room.
    UserJoin {
        /// Display name of the joining user.
        display_name: String,
    },
    /// A user left the room.
    UserLeave {},
    /// A chat message in the room.
    ChatMessage {
        /// Display name of the sender.
        display_name: String,
        /// Message text.
        message: String,
    },
    /// Room settings changed; `settings` keys merge into the room state.
    RoomSettingsUpdate {
        /// Partial settings object to merge.
        settings: Value,
    },
}

/// An event payload, typed by its stream kind.
#[derive(Clone, Debug, PartialEq)]
pub enum EventBody {
    /// Payload of a game-stream event.
    Game(GameEventBody),
    /// Payload of a room-stream event.
    Room(RoomEventBody),
}

impl EventBody {
    /// The stream kind this payload belongs to.
    #[must_use]
    pub const fn kind(&self) -> StreamKind {
        match self {
            Self::Game(_) => StreamKind::Game,
            Self::Room(_) => StreamKind::Room,
        }
    }

    /// The event tag, e.g. `"cell_fill"`.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Game(body) => match body {
                GameEventBody::Create { .. } => "create",
                GameEventBody::CellFill { .. } => "cell_fill",
                GameEventBody::CellClear { .. } => "cell_clear",
                GameEventBody::CellCheck { .. } => "cell_check",
                GameEventBody::CellReveal { .. } => "cell_reveal",
                GameEventBody::CursorMove { .. } => "cursor_move",
                GameEventBody::ChatMessage { .. } => "chat_message",
                GameEventBody::ClockUpdate { .. } => "clock_update",
                GameEventBody::PuzzleSolved { .. } => "puzzle_solved",
            },
            Self::Room(body) => match body {
                RoomEventBody::UserJoin { .. } => "user_join",
                RoomEventBody::UserLeave {} => "user_leave",
                RoomEventBody::ChatMessage { .. } => "chat_message",
                RoomEventBody::RoomSettingsUpdate { .. } => "room_settings_update",
            },
        }
    }

    /// The payload object alone, as stored in the `payload` column.
    ///
    /// # Errors
    ///
    /// Returns [`EventDecodeError::Payload`] if serialization fails, which
    /// only happens for non-JSON-representable values.
    pub fn payload(&self) -> Result<Value, EventDecodeError> {
        let tagged = match self {
            Self::Game(body) => serde_json::to_value(body),
            Self::Room(body) => serde_json::to_value(body),
        }
        .map_err(|e| EventDecodeError::Payload(e.to_string()))?;

        Ok(tagged.get("payload").cloned().unwrap_or_else(|| Value::Object(serde_json::Map::new())))
    }

    /// Decode a payload from its stored `(event_type, payload)` columns.
    ///
    /// # Errors
    ///
    /// - [`EventDecodeError::UnknownType`] for a tag outside the closed set
    /// - [`EventDecodeError::Payload`] for a payload that does not match the
    ///   tag's shape
    pub fn decode(
        kind: StreamKind,
        event_type: &str,
        payload: Value,
    ) -> Result<Self, EventDecodeError> {
        let tagged = serde_json::json!({ "type": event_type, "payload": payload });
        Self::decode_tagged(kind, tagged)
    }

    /// Decode a payload from a `{"type": ..., "payload": ...}` object, as
    /// submitted by clients.
    ///
    /// # Errors
    ///
    /// Same conditions as [`EventBody::decode`].
    pub fn decode_tagged(kind: StreamKind, tagged: Value) -> Result<Self, EventDecodeError> {
        let event_type = tagged
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match kind {
            StreamKind::Game => serde_json::from_value::<GameEventBody>(tagged)
                .map(Self::Game)
                .map_err(|e| classify(kind, event_type, &e)),
            StreamKind::Room => serde_json::from_value::<RoomEventBody>(tagged)
                .map(Self::Room)
                .map_err(|e| classify(kind, event_type, &e)),
        }
    }
}

/// Distinguish unknown-tag errors from shape errors for the error taxonomy.
fn classify(kind: StreamKind, event_type: String, err: &serde_json::Error) -> EventDecodeError {
    if err.to_string().contains("unknown variant") {
        EventDecodeError::UnknownType { kind, event_type }
    } else {
        EventDecodeError::Payload(err.to_string())
    }
}

const fn default_schema_version() -> i32 {
    1
}

/// Serde representation of the flattened envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct RecordRepr {
    stream_kind: StreamKind,
    stream_id: StreamId,
    seq: Seq,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    ts: i64,
    #[serde(default = "default_schema_version")]
    schema_version: i32,
}

/// A persisted event: the common envelope plus a typed payload.
///
/// `seq` is unique per `(stream_kind, stream_id)`, the one hard invariant
/// of the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RecordRepr", into = "RecordRepr")]
pub struct EventRecord {
    /// Stream kind.
    pub stream_kind: StreamKind,
    /// Stream identifier (`gid` or `rid`).
    pub stream_id: StreamId,
    /// Store-assigned per-stream sequence number.
    pub seq: Seq,
    /// Typed payload.
    pub body: EventBody,
    /// Acting user, when the client asserted one.
    pub user_id: Option<String>,
    /// Event timestamp, ms since epoch.
    pub ts: i64,
    /// Envelope schema version, default 1.
    pub schema_version: i32,
}

impl TryFrom<RecordRepr> for EventRecord {
    type Error = EventDecodeError;

    fn try_from(repr: RecordRepr) -> Result<Self, Self::Error> {
        let body = EventBody::decode(repr.stream_kind, &repr.event_type, repr.payload)?;
        Ok(Self {
            stream_kind: repr.stream_kind,
            stream_id: repr.stream_id,
            seq: repr.seq,
            body,
            user_id: repr.user_id,
            ts: repr.ts,
            schema_version: repr.schema_version,
        })
    }
}

impl From<EventRecord> for RecordRepr {
    fn from(record: EventRecord) -> Self {
        let event_type = record.body.event_type().to_string();
        // Payload serialization of an already-typed body cannot fail.
        let payload = record
            .body
            .payload()
            .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
        Self {
            stream_kind: record.stream_kind,
            stream_id: record.stream_id,
            seq: record.seq,
            event_type,
            payload,
            user_id: record.user_id,
            ts: record.ts,
            schema_version: record.schema_version,
        }
    }
}

/// A client-submitted event before sequencing: the raw tagged body plus the
/// asserted user.
///
/// The body stays raw JSON until the hub has replaced `{".sv":"timestamp"}`
/// sentinels; typed decoding happens after normalization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventDraft {
    /// Raw `{"type": ..., "payload": ...}` object.
    pub body: Value,
    /// Acting user, client-asserted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl EventDraft {
    /// Create a draft from a typed body (server-originated events).
    ///
    /// # Errors
    ///
    /// Returns [`EventDecodeError::Payload`] if the body fails to serialize.
    pub fn from_body(body: &EventBody, user_id: Option<String>) -> Result<Self, EventDecodeError> {
        let tagged = serde_json::json!({
            "type": body.event_type(),
            "payload": body.payload()?,
        });
        Ok(Self {
            body: tagged,
            user_id,
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Test code uses expect for clear failure messages
mod tests {
    use super::*;

    #[test]
    fn cell_fill_roundtrips_through_columns() {
        let body = EventBody::Game(GameEventBody::CellFill {
            row: 0,
            col: 2,
            value: "C".to_string(),
            pencil: Some(true),
            solved_by: Some("u-1".to_string()),
        });

        assert_eq!(body.event_type(), "cell_fill");
        let payload = body.payload().expect("payload");
        assert_eq!(payload["row"], 0);
        assert_eq!(payload["value"], "C");

        let decoded =
            EventBody::decode(StreamKind::Game, "cell_fill", payload).expect("decode");
        assert_eq!(decoded, body);
    }

    #[test]
    fn unknown_tag_fails_loud() {
        let err = EventBody::decode(
            StreamKind::Game,
            "cell_sparkle",
            serde_json::json!({ "row": 0, "col": 0 }),
        )
        .expect_err("unknown tag must not decode");
        assert!(matches!(err, EventDecodeError::UnknownType { .. }));
    }

    #[test]
    fn room_tag_does_not_decode_as_game() {
        let err = EventBody::decode(
            StreamKind::Game,
            "user_join",
            serde_json::json!({ "display_name": "ada" }),
        )
        .expect_err("room tag on game stream must fail");
        assert!(matches!(err, EventDecodeError::UnknownType { .. }));
    }

    #[test]
    fn chat_message_decodes_per_kind() {
        let payload = serde_json::json!({ "display_name": "ada", "message": "hi" });
        let game = EventBody::decode(StreamKind::Game, "chat_message", payload.clone())
            .expect("game chat");
        let room =
            EventBody::decode(StreamKind::Room, "chat_message", payload).expect("room chat");
        assert!(matches!(game, EventBody::Game(GameEventBody::ChatMessage { .. })));
        assert!(matches!(room, EventBody::Room(RoomEventBody::ChatMessage { .. })));
    }

    #[test]
    fn malformed_payload_is_a_payload_error() {
        let err = EventBody::decode(
            StreamKind::Game,
            "cell_fill",
            serde_json::json!({ "row": "zero" }),
        )
        .expect_err("bad shape must fail");
        assert!(matches!(err, EventDecodeError::Payload(_)));
    }

    #[test]
    fn envelope_flattens_type_and_payload() {
        let record = EventRecord {
            stream_kind: StreamKind::Room,
            stream_id: StreamId::new("r-1"),
            seq: Seq::new(3),
            body: EventBody::Room(RoomEventBody::UserJoin {
                display_name: "ada".to_string(),
            }),
            user_id: Some("u-1".to_string()),
            ts: 1_700_000_000_000,
            schema_version: 1,
        };

        let json = serde_json::to_value(&record).expect("serialize");
        assert_eq!(json["type"], "user_join");
        assert_eq!(json["payload"]["display_name"], "ada");
        assert_eq!(json["seq"], 3);

        let back: EventRecord = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, record);
    }

    #[test]
    fn schema_version_defaults_to_one() {
        let json = serde_json::json!({
            "stream_kind": "game",
            "stream_id": "g-1",
            "seq": 1,
            "type": "cursor_move",
            "payload": { "row": 1, "col": 1 },
            "ts": 5,
        });
        let record: EventRecord = serde_json::from_value(json).expect("deserialize");
        assert_eq!(record.schema_version, 1);
    }

    #[test]
    fn clock_action_tags() {
        let body = EventBody::Game(GameEventBody::ClockUpdate {
            action: ClockAction::Pause,
            total_time_ms: Some(700),
        });
        let payload = body.payload().expect("payload");
        assert_eq!(payload["action"], "pause");
        assert_eq!(payload["total_time_ms"], 700);
    }
}
