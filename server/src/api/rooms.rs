//! Room endpoints: projected state.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use gridcast_core::projection::{self, RoomState};
use gridcast_core::store::EventStore;
use gridcast_core::stream::{StreamId, StreamKind};

/// Fetch the projected state of a room. An untouched room is an empty
/// state, not an error.
pub async fn get_room_state(
    State(state): State<AppState>,
    Path(rid): Path<String>,
) -> Result<Json<RoomState>, ApiError> {
    let events = state
        .store
        .read(StreamKind::Room, StreamId::new(rid), None, None)
        .await?;
    Ok(Json(projection::project_room(&events)))
}
