//! Router configuration.

use crate::api::{games, health, puzzles, realtime, rooms};
use crate::state::AppState;
use axum::{
    routing::{delete, get, patch, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Build the complete router: health, puzzle catalog, games, rooms, and
/// the realtime socket.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Puzzle catalog
        .route("/puzzles", post(puzzles::create_puzzle))
        .route("/puzzles", get(puzzles::list_puzzles))
        .route("/puzzles/:pid", get(puzzles::get_puzzle))
        .route("/puzzles/:pid", patch(puzzles::update_puzzle))
        .route("/puzzles/:pid", delete(puzzles::delete_puzzle))
        // Games
        .route("/games", post(games::create_game))
        .route("/games/:gid/state", get(games::get_game_state))
        .route("/games/:gid/solve", post(games::record_solve))
        // Rooms
        .route("/rooms/:rid/state", get(rooms::get_room_state))
        // Realtime
        .route("/ws", get(realtime::realtime));

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
