//! # Gridcast Core
//!
//! Core types and traits for the event-sourced crossword collaboration
//! engine.
//!
//! Everything a client sees is the fold of an append-only event stream:
//! filling a cell, revealing an answer, moving a cursor, chatting, toggling
//! the clock: each is an immutable [`event::EventRecord`] with a
//! store-assigned per-stream sequence number. Current state is always
//! derived by the pure [`projection`] fold, optionally resumed from a
//! snapshot.
//!
//! ## Layout
//!
//! - [`stream`]: stream kinds, identifiers, sequence numbers
//! - [`event`]: the envelope and the closed payload enums
//! - [`store`]: the append-only event store trait with snapshot slots
//! - [`bus`]: the cross-instance pub/sub bus trait
//! - [`projection`]: pure folds from events to game/room state
//! - [`puzzle`]: puzzle model and the derived game view
//! - [`catalog`]: puzzle catalog trait (lookup, listing, CRUD)
//! - [`solve`]: solve stats derivation and the exactly-once solve recorder
//! - [`clock`]: injectable wall-clock
//!
//! Implementations live in sibling crates: `gridcast-postgres` (store,
//! catalog, solves), `gridcast-redis` (bus), `gridcast-hub` (fan-out), and
//! `gridcast-testing` (in-memory fakes).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod catalog;
pub mod clock;
pub mod event;
pub mod projection;
pub mod puzzle;
pub mod solve;
pub mod store;
pub mod stream;

pub use event::{EventBody, EventDraft, EventRecord};
pub use stream::{Seq, StreamId, StreamKind};
