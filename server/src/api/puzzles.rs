//! Puzzle catalog endpoints: create, fetch, list, visibility, delete.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use gridcast_core::catalog::{ListFilter, NewPuzzle, PuzzleCatalog};
use gridcast_core::puzzle::{Puzzle, PuzzleContent, PuzzleListing};
use serde::Deserialize;

/// Listing page size bounds.
const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

/// Request body for `POST /api/puzzles`.
#[derive(Debug, Deserialize)]
pub struct CreatePuzzleRequest {
    /// Public identifier for the new puzzle.
    pub pid: String,
    /// List publicly right away.
    #[serde(default)]
    pub is_public: bool,
    /// The content blob.
    pub content: PuzzleContent,
    /// Uploader, when known.
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Create a puzzle.
pub async fn create_puzzle(
    State(state): State<AppState>,
    Json(req): Json<CreatePuzzleRequest>,
) -> Result<(StatusCode, Json<Puzzle>), ApiError> {
    if req.pid.trim().is_empty() {
        return Err(ApiError::Validation("pid must not be empty".to_string()));
    }
    if req.content.solution.is_empty() {
        return Err(ApiError::Validation(
            "puzzle solution must not be empty".to_string(),
        ));
    }

    let puzzle = state
        .catalog
        .create(NewPuzzle {
            pid: req.pid,
            is_public: req.is_public,
            uploaded_at: state.clock.now_ms(),
            content: req.content,
            created_by: req.created_by,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(puzzle)))
}

/// Fetch a puzzle by pid.
pub async fn get_puzzle(
    State(state): State<AppState>,
    Path(pid): Path<String>,
) -> Result<Json<Puzzle>, ApiError> {
    state
        .catalog
        .find_by_pid(&pid)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("puzzle {pid} not found")))
}

/// Query parameters for `GET /api/puzzles`.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Comma-separated exact-match puzzle kinds.
    #[serde(default)]
    pub types: Option<String>,
    /// Whitespace-tokenized title/author search.
    #[serde(default)]
    pub search: Option<String>,
    /// Page size, capped at 200.
    #[serde(default)]
    pub limit: Option<i64>,
    /// Page offset.
    #[serde(default)]
    pub offset: Option<i64>,
}

/// List public puzzles, newest (by numeric pid) first.
pub async fn list_puzzles(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<PuzzleListing>>, ApiError> {
    let kinds = query.types.as_deref().map(|types| {
        types
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(ToOwned::to_owned)
            .collect::<Vec<_>>()
    });

    let filter = ListFilter {
        kinds,
        search: query.search.filter(|s| !s.trim().is_empty()),
    };
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = query.offset.unwrap_or(0).max(0);

    let listings = state.catalog.list_public(filter, limit, offset).await?;
    Ok(Json(listings))
}

/// Request body for `PATCH /api/puzzles/:pid`.
#[derive(Debug, Deserialize)]
pub struct UpdatePuzzleRequest {
    /// New visibility.
    pub is_public: bool,
}

/// Update puzzle visibility.
pub async fn update_puzzle(
    State(state): State<AppState>,
    Path(pid): Path<String>,
    Json(req): Json<UpdatePuzzleRequest>,
) -> Result<StatusCode, ApiError> {
    if state.catalog.set_visibility(&pid, req.is_public).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("puzzle {pid} not found")))
    }
}

/// Delete a puzzle.
pub async fn delete_puzzle(
    State(state): State<AppState>,
    Path(pid): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.catalog.delete(&pid).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("puzzle {pid} not found")))
    }
}
