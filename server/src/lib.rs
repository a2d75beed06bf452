//! # Gridcast Server
//!
//! The HTTP/WebSocket boundary of the collaboration engine: puzzle catalog
//! CRUD and listing, game creation (which emits the `create` event through
//! the hub as its first act), projected state fetches, solve recording,
//! and the realtime wire protocol.
//!
//! Handlers receive already-typed inputs and call into `gridcast-core`
//! services through trait objects, so the whole surface runs against the
//! in-memory fakes in tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::ApiError;
pub use routes::build_router;
pub use state::AppState;
