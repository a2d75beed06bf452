//! `PostgreSQL` puzzle catalog.

use gridcast_core::catalog::{CatalogError, CatalogFuture, ListFilter, NewPuzzle, PuzzleCatalog};
use gridcast_core::puzzle::{pid_numeric_prefix, Puzzle, PuzzleContent, PuzzleListing};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// `PostgreSQL` unique-constraint violation.
const UNIQUE_VIOLATION: &str = "23505";

/// `PostgreSQL`-backed puzzle catalog.
#[derive(Clone)]
pub struct PostgresPuzzleCatalog {
    pool: PgPool,
}

impl PostgresPuzzleCatalog {
    /// Create a catalog over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn puzzle_from_row(row: &PgRow) -> Result<Puzzle, CatalogError> {
        let content: serde_json::Value = row.get("content");
        let content: PuzzleContent = serde_json::from_value(content)
            .map_err(|e| CatalogError::Serialization(format!("puzzle content: {e}")))?;
        Ok(Puzzle {
            id: row.get("id"),
            pid: row.get("pid"),
            pid_numeric: row.get("pid_numeric"),
            is_public: row.get("is_public"),
            uploaded_at: row.get("uploaded_at"),
            times_solved: row.get("times_solved"),
            content,
            created_by: row.get("created_by"),
        })
    }
}

/// Escape LIKE wildcards in a search token so user input matches literally.
fn escape_like(token: &str) -> String {
    token
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

impl PuzzleCatalog for PostgresPuzzleCatalog {
    fn create(&self, new: NewPuzzle) -> CatalogFuture<'_, Puzzle> {
        Box::pin(async move {
            let content = serde_json::to_value(&new.content)
                .map_err(|e| CatalogError::Serialization(format!("puzzle content: {e}")))?;
            let pid_numeric = pid_numeric_prefix(&new.pid);

            let row = sqlx::query(
                "INSERT INTO puzzles (pid, pid_numeric, is_public, uploaded_at, content, created_by)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 RETURNING id, pid, pid_numeric, is_public, uploaded_at, times_solved, content, created_by",
            )
            .bind(&new.pid)
            .bind(pid_numeric)
            .bind(new.is_public)
            .bind(new.uploaded_at)
            .bind(&content)
            .bind(&new.created_by)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if e.as_database_error()
                    .and_then(|db| db.code())
                    .as_deref()
                    == Some(UNIQUE_VIOLATION)
                {
                    CatalogError::DuplicatePid(new.pid.clone())
                } else {
                    CatalogError::Backend(e.to_string())
                }
            })?;

            tracing::info!(pid = %new.pid, "Puzzle created");
            Self::puzzle_from_row(&row)
        })
    }

    fn find_by_pid(&self, pid: &str) -> CatalogFuture<'_, Option<Puzzle>> {
        let pid = pid.to_string();
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT id, pid, pid_numeric, is_public, uploaded_at, times_solved, content, created_by
                 FROM puzzles WHERE pid = $1",
            )
            .bind(&pid)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CatalogError::Backend(e.to_string()))?;

            row.as_ref().map(Self::puzzle_from_row).transpose()
        })
    }

    fn list_public(
        &self,
        filter: ListFilter,
        limit: i64,
        offset: i64,
    ) -> CatalogFuture<'_, Vec<PuzzleListing>> {
        Box::pin(async move {
            let mut builder = sqlx::QueryBuilder::new(
                "SELECT pid, content, times_solved, uploaded_at FROM puzzles WHERE is_public",
            );

            if let Some(kinds) = &filter.kinds {
                builder
                    .push(" AND content->'info'->>'type' = ANY(")
                    .push_bind(kinds.clone())
                    .push(")");
            }
            if let Some(search) = &filter.search {
                for token in search.split_whitespace() {
                    builder
                        .push(" AND (content->'info'->>'title' || ' ' || content->'info'->>'author') ILIKE ")
                        .push_bind(format!("%{}%", escape_like(token)));
                }
            }

            builder.push(" ORDER BY pid_numeric DESC NULLS LAST, pid ASC LIMIT ");
            builder.push_bind(limit);
            builder.push(" OFFSET ");
            builder.push_bind(offset);

            let rows = builder
                .build()
                .fetch_all(&self.pool)
                .await
                .map_err(|e| CatalogError::Backend(e.to_string()))?;

            let mut listings = Vec::with_capacity(rows.len());
            for row in rows {
                let content: serde_json::Value = row.get("content");
                let content: PuzzleContent = serde_json::from_value(content)
                    .map_err(|e| CatalogError::Serialization(format!("puzzle content: {e}")))?;
                listings.push(PuzzleListing {
                    pid: row.get("pid"),
                    info: content.info,
                    times_solved: row.get("times_solved"),
                    uploaded_at: row.get("uploaded_at"),
                });
            }
            Ok(listings)
        })
    }

    fn set_visibility(&self, pid: &str, is_public: bool) -> CatalogFuture<'_, bool> {
        let pid = pid.to_string();
        Box::pin(async move {
            let result = sqlx::query("UPDATE puzzles SET is_public = $2 WHERE pid = $1")
                .bind(&pid)
                .bind(is_public)
                .execute(&self.pool)
                .await
                .map_err(|e| CatalogError::Backend(e.to_string()))?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn delete(&self, pid: &str) -> CatalogFuture<'_, bool> {
        let pid = pid.to_string();
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM puzzles WHERE pid = $1")
                .bind(&pid)
                .execute(&self.pool)
                .await
                .map_err(|e| CatalogError::Backend(e.to_string()))?;
            if result.rows_affected() > 0 {
                tracing::info!(pid = %pid, "Puzzle deleted");
                Ok(true)
            } else {
                Ok(false)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_like_neutralizes_wildcards() {
        assert_eq!(escape_like("50%_off"), "50\\%\\_off");
        assert_eq!(escape_like("back\\slash"), "back\\\\slash");
        assert_eq!(escape_like("plain"), "plain");
    }
}
