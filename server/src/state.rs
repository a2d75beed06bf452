//! Application state shared across HTTP and WebSocket handlers.
//!
//! The state carries dependencies as trait objects (store, catalog, solve
//! service, hub) so tests can wire in the in-memory fakes; handlers are
//! agnostic to which implementation sits behind them.

use crate::config::Config;
use gridcast_core::catalog::PuzzleCatalog;
use gridcast_core::clock::Clock;
use gridcast_core::solve::SolveService;
use gridcast_core::store::EventStore;
use gridcast_hub::StreamHub;
use std::sync::Arc;

/// Shared application state. Cloned (cheaply, all `Arc`s) per request.
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<Config>,
    /// Event store (streams + snapshots).
    pub store: Arc<dyn EventStore>,
    /// Puzzle catalog.
    pub catalog: Arc<dyn PuzzleCatalog>,
    /// Solve recorder.
    pub solves: Arc<SolveService>,
    /// Real-time fan-out hub.
    pub hub: Arc<StreamHub>,
    /// Wall clock.
    pub clock: Arc<dyn Clock>,
}
