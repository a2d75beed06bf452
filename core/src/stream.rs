//! Stream identification and sequencing types.
//!
//! Every event in the system belongs to exactly one stream, identified by a
//! [`StreamKind`] (game or room) plus a [`StreamId`]. Within a stream, events
//! carry a [`Seq`] assigned by the event store at append time: a contiguous,
//! monotonically increasing integer starting at 1. Sequence numbers are local
//! to a stream, never global.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for [`StreamId`] parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid stream ID: {0}")]
pub struct ParseStreamIdError(String);

/// The two kinds of event stream.
///
/// Games are solve sessions bound to one puzzle; rooms are free-form
/// lobby/chat contexts. The kind selects the backing table and the bus
/// channel namespace.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// A game stream, keyed by `gid`.
    Game,
    /// A room stream, keyed by `rid`.
    Room,
}

impl StreamKind {
    /// The bus channel name for a stream of this kind: `game:<gid>` or
    /// `room:<rid>`.
    #[must_use]
    pub fn channel(self, stream_id: &StreamId) -> String {
        format!("{}:{}", self.as_str(), stream_id.as_str())
    }

    /// Stable string tag for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Game => "game",
            Self::Room => "room",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier for a single stream within its kind (`gid` or `rid`).
///
/// # Validation
///
/// - `FromStr::from_str()`: validates input (rejects empty strings)
/// - `From::from()` and `new()`: no validation, for application-controlled
///   input
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(String);

impl StreamId {
    /// Create a new `StreamId` from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the stream ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert the `StreamId` into its inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StreamId {
    type Err = ParseStreamIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseStreamIdError("stream ID cannot be empty".to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<String> for StreamId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StreamId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for StreamId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Per-stream sequence number, assigned by the event store at append time.
///
/// Sequence numbers form the contiguous prefix `1..N` for every stream (no
/// gaps, no duplicates); the unique index on `(stream, seq)` is the
/// enforcement. `Seq` is the canonical ordering of a stream: projections
/// apply events in ascending `Seq`, and subscribers observe events in `Seq`
/// order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Seq(i64);

impl Default for Seq {
    /// Zero: the sequence "before" a stream's first event.
    fn default() -> Self {
        Self(0)
    }
}

impl Seq {
    /// The first sequence number of any stream.
    pub const FIRST: Self = Self(1);

    /// Create a new `Seq` with the given value.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Get the raw sequence number.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }

    /// The next sequence number (current + 1).
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Seq {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Seq> for i64 {
    fn from(seq: Seq) -> Self {
        seq.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod stream_id_tests {
        use super::*;

        #[test]
        fn new_creates_stream_id() {
            let id = StreamId::new("g-123");
            assert_eq!(id.as_str(), "g-123");
        }

        #[test]
        #[allow(clippy::expect_used)] // Panics: Test will fail if parse fails
        fn parse_from_str() {
            let id: StreamId = "g-123".parse().expect("parse should succeed");
            assert_eq!(id, StreamId::new("g-123"));
        }

        #[test]
        fn parse_empty_string_fails() {
            let result = "".parse::<StreamId>();
            assert!(result.is_err());
        }

        #[test]
        fn display() {
            let id = StreamId::new("r-42");
            assert_eq!(format!("{id}"), "r-42");
        }
    }

    mod stream_kind_tests {
        use super::*;

        #[test]
        fn channel_names() {
            assert_eq!(StreamKind::Game.channel(&StreamId::new("abc")), "game:abc");
            assert_eq!(StreamKind::Room.channel(&StreamId::new("xyz")), "room:xyz");
        }

        #[test]
        #[allow(clippy::expect_used)] // Panics: Test will fail if serialization fails
        fn serde_tags_are_snake_case() {
            let json = serde_json::to_string(&StreamKind::Game).expect("serialize");
            assert_eq!(json, "\"game\"");
        }
    }

    mod seq_tests {
        use super::*;

        #[test]
        fn first_and_next() {
            assert_eq!(Seq::FIRST, Seq::new(1));
            assert_eq!(Seq::FIRST.next(), Seq::new(2));
        }

        #[test]
        fn ordering() {
            assert!(Seq::new(1) < Seq::new(2));
            assert!(Seq::new(100) > Seq::new(99));
        }

        #[test]
        fn roundtrip_i64() {
            let seq = Seq::from(42_i64);
            assert_eq!(seq.value(), 42);
            let raw: i64 = seq.into();
            assert_eq!(raw, 42);
        }
    }
}
