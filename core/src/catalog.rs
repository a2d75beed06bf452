//! Puzzle catalog abstraction: lookup, public listing, CRUD.
//!
//! The catalog is the minimal surface the collaboration engine needs from
//! puzzle storage: fetch by public identifier, a filtered public listing,
//! and the solve-count hook (which only the solve store's transaction may
//! exercise, see [`crate::solve`]).

use crate::puzzle::{Puzzle, PuzzleContent, PuzzleListing};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future alias used by the catalog trait methods.
pub type CatalogFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CatalogError>> + Send + 'a>>;

/// Errors from catalog operations.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// A puzzle with this pid already exists.
    #[error("Puzzle already exists: {0}")]
    DuplicatePid(String),

    /// The backing store is unreachable or rejected the operation.
    #[error("Catalog backend error: {0}")]
    Backend(String),

    /// Content blob failed to (de)serialize.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Filter for the public puzzle listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Exact-match set on `content.info.type`; `None` matches all kinds.
    pub kinds: Option<Vec<String>>,
    /// Whitespace-tokenized search; every token must match
    /// case-insensitively as a substring of `title + " " + author`.
    pub search: Option<String>,
}

impl ListFilter {
    /// Whether a puzzle's `(title, author, kind)` passes this filter.
    ///
    /// This is the reference semantics; SQL implementations must agree with
    /// it.
    #[must_use]
    pub fn matches(&self, title: &str, author: &str, kind: &str) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.iter().any(|k| k == kind) {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let haystack = format!("{title} {author}").to_lowercase();
            for token in search.split_whitespace() {
                if !haystack.contains(&token.to_lowercase()) {
                    return false;
                }
            }
        }
        true
    }
}

/// Inputs for creating a catalog entry.
#[derive(Clone, Debug)]
pub struct NewPuzzle {
    /// Public identifier; its numeric prefix becomes `pid_numeric`.
    pub pid: String,
    /// Listed publicly when true.
    pub is_public: bool,
    /// Upload timestamp, ms since epoch.
    pub uploaded_at: i64,
    /// The content blob.
    pub content: PuzzleContent,
    /// Uploader, when known.
    pub created_by: Option<String>,
}

/// Puzzle catalog operations.
///
/// Implementations must be `Send + Sync`. Paging of [`list_public`] is
/// stable across concurrent inserts because ordering is by `pid_numeric`
/// (descending, nulls last), a near-immutable field.
///
/// [`list_public`]: PuzzleCatalog::list_public
pub trait PuzzleCatalog: Send + Sync {
    /// Insert a new puzzle.
    ///
    /// # Errors
    ///
    /// - [`CatalogError::DuplicatePid`] when the pid is taken
    /// - [`CatalogError::Backend`] for store failures
    fn create(&self, new: NewPuzzle) -> CatalogFuture<'_, Puzzle>;

    /// Look up a puzzle by public identifier.
    ///
    /// # Errors
    ///
    /// [`CatalogError::Backend`] for store failures; an unknown pid is
    /// `Ok(None)`, not an error.
    fn find_by_pid(&self, pid: &str) -> CatalogFuture<'_, Option<Puzzle>>;

    /// List public puzzles matching `filter`, ordered by `pid_numeric DESC
    /// NULLS LAST`, paged by `limit`/`offset`.
    ///
    /// # Errors
    ///
    /// [`CatalogError::Backend`] for store failures.
    fn list_public(
        &self,
        filter: ListFilter,
        limit: i64,
        offset: i64,
    ) -> CatalogFuture<'_, Vec<PuzzleListing>>;

    /// Update a puzzle's visibility. Returns `false` when the pid is
    /// unknown.
    ///
    /// # Errors
    ///
    /// [`CatalogError::Backend`] for store failures.
    fn set_visibility(&self, pid: &str, is_public: bool) -> CatalogFuture<'_, bool>;

    /// Delete a puzzle. Returns `false` when the pid is unknown.
    ///
    /// # Errors
    ///
    /// [`CatalogError::Backend`] for store failures.
    fn delete(&self, pid: &str) -> CatalogFuture<'_, bool>;
}
