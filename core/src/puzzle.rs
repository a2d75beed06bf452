//! Puzzle model and the game view derived from it.
//!
//! A [`Puzzle`] is the catalog entry: public identifier, visibility, solve
//! counter, and the JSON [`PuzzleContent`] blob. `content.solution` is the
//! ground truth: it drives the blank grid handed to a new game and the
//! completion check.

use serde::{Deserialize, Serialize};

/// Grid marker for a black square in solution and grid matrices.
pub const BLACK_SQUARE: &str = ".";

/// Descriptive metadata for a puzzle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PuzzleInfo {
    /// Puzzle title.
    pub title: String,
    /// Puzzle author.
    pub author: String,
    /// Puzzle kind, e.g. `"Daily Puzzle"` or `"Mini Puzzle"`. Filterable in
    /// the public listing.
    #[serde(rename = "type")]
    pub kind: String,
    /// Copyright line, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copyright: Option<String>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Across and down clue lists, indexed by clue number.
///
/// Entries may be empty strings for numbers with no clue in that direction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clues {
    /// Across clues.
    #[serde(default)]
    pub across: Vec<String>,
    /// Down clues.
    #[serde(default)]
    pub down: Vec<String>,
}

/// The full puzzle content blob, stored as JSON in the catalog.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PuzzleContent {
    /// Descriptive metadata.
    pub info: PuzzleInfo,
    /// Display grid: `"."` for black squares, otherwise the blank/initial
    /// cell value (usually empty).
    pub grid: Vec<Vec<String>>,
    /// Solution grid: `"."` for black squares, otherwise the answer letters.
    pub solution: Vec<Vec<String>>,
    /// Clue lists.
    #[serde(default)]
    pub clues: Clues,
    /// Flat indices (row-major) of circled cells.
    #[serde(default)]
    pub circles: Vec<u32>,
    /// Flat indices (row-major) of shaded cells.
    #[serde(default)]
    pub shades: Vec<u32>,
}

impl PuzzleContent {
    /// Derive the initial [`GameView`] for a new game on this puzzle.
    ///
    /// The playable grid starts blank; black squares come from the
    /// solution's `"."` cells.
    #[must_use]
    pub fn to_game_view(&self) -> GameView {
        let grid = self
            .solution
            .iter()
            .map(|row| {
                row.iter()
                    .map(|answer| CellState::blank(answer == BLACK_SQUARE))
                    .collect()
            })
            .collect();

        GameView {
            info: self.info.clone(),
            grid,
            solution: self.solution.clone(),
            clues: self.clues.clone(),
            circles: self.circles.clone(),
            shades: self.shades.clone(),
        }
    }
}

/// State of one cell in a live game grid.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellState {
    /// Black square (not playable).
    #[serde(default)]
    pub black: bool,
    /// Current fill value (empty when blank).
    #[serde(default)]
    pub value: String,
    /// Pencil mark flag on the current value.
    #[serde(default)]
    pub pencil: bool,
    /// Verified correct by a check.
    #[serde(default)]
    pub good: bool,
    /// Verified incorrect by a check.
    #[serde(default)]
    pub bad: bool,
    /// Value was revealed rather than solved.
    #[serde(default)]
    pub revealed: bool,
    /// User who last filled this cell, when reported by the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solved_by: Option<String>,
}

impl CellState {
    /// A blank cell, playable unless `black`.
    #[must_use]
    pub fn blank(black: bool) -> Self {
        Self {
            black,
            ..Self::default()
        }
    }
}

/// The game board as carried by a `create` event: puzzle metadata plus the
/// blank playable grid and the solution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameView {
    /// Puzzle metadata.
    pub info: PuzzleInfo,
    /// Playable grid, blank at creation.
    pub grid: Vec<Vec<CellState>>,
    /// Solution grid (`"."` for black squares).
    pub solution: Vec<Vec<String>>,
    /// Clue lists.
    pub clues: Clues,
    /// Flat indices of circled cells.
    #[serde(default)]
    pub circles: Vec<u32>,
    /// Flat indices of shaded cells.
    #[serde(default)]
    pub shades: Vec<u32>,
}

impl GameView {
    /// Grid dimensions as `(rows, cols)`.
    #[must_use]
    pub fn dimensions(&self) -> (usize, usize) {
        let rows = self.grid.len();
        let cols = self.grid.first().map_or(0, Vec::len);
        (rows, cols)
    }
}

/// A catalog puzzle row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Puzzle {
    /// Surrogate primary key.
    pub id: i64,
    /// Public string identifier, unique.
    pub pid: String,
    /// Numeric prefix of `pid`, used for listing order. `None` when the pid
    /// has no numeric prefix.
    pub pid_numeric: Option<i64>,
    /// Whether the puzzle appears in the public listing.
    pub is_public: bool,
    /// Upload timestamp, ms since epoch.
    pub uploaded_at: i64,
    /// Number of recorded solves. Incremented only inside the solve
    /// transaction.
    pub times_solved: i64,
    /// The content blob.
    pub content: PuzzleContent,
    /// Uploader, when known.
    pub created_by: Option<String>,
}

/// Compact listing entry for the public puzzle index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PuzzleListing {
    /// Public identifier.
    pub pid: String,
    /// Puzzle metadata.
    pub info: PuzzleInfo,
    /// Solve counter at listing time.
    pub times_solved: i64,
    /// Upload timestamp, ms since epoch.
    pub uploaded_at: i64,
}

/// Parse the numeric prefix of a pid, e.g. `"4823-across"` → `Some(4823)`.
///
/// A pid with no leading digits has no numeric component.
#[must_use]
pub fn pid_numeric_prefix(pid: &str) -> Option<i64> {
    let digits: String = pid.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content_3x3() -> PuzzleContent {
        PuzzleContent {
            info: PuzzleInfo {
                title: "Tiny".to_string(),
                author: "Setter".to_string(),
                kind: "Mini Puzzle".to_string(),
                copyright: None,
                description: None,
            },
            grid: vec![
                vec![String::new(), String::new(), String::new()],
                vec![String::new(), BLACK_SQUARE.to_string(), String::new()],
                vec![String::new(), String::new(), String::new()],
            ],
            solution: vec![
                vec!["A".to_string(), "B".to_string(), "C".to_string()],
                vec!["D".to_string(), BLACK_SQUARE.to_string(), "F".to_string()],
                vec!["G".to_string(), "H".to_string(), "I".to_string()],
            ],
            clues: Clues::default(),
            circles: vec![],
            shades: vec![],
        }
    }

    #[test]
    fn game_view_blank_grid_follows_black_squares() {
        let view = content_3x3().to_game_view();
        assert_eq!(view.dimensions(), (3, 3));
        assert!(!view.grid[0][0].black);
        assert!(view.grid[1][1].black);
        assert!(view.grid[0][0].value.is_empty());
        assert_eq!(view.solution[2][2], "I");
    }

    #[test]
    fn pid_numeric_prefix_parses_leading_digits() {
        assert_eq!(pid_numeric_prefix("4823"), Some(4823));
        assert_eq!(pid_numeric_prefix("4823-mini"), Some(4823));
        assert_eq!(pid_numeric_prefix("mini-4823"), None);
        assert_eq!(pid_numeric_prefix(""), None);
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if serialization fails
    fn puzzle_info_type_field_roundtrip() {
        let info = PuzzleInfo {
            title: "T".to_string(),
            author: "A".to_string(),
            kind: "Daily Puzzle".to_string(),
            copyright: None,
            description: None,
        };
        let json = serde_json::to_value(&info).expect("serialize");
        assert_eq!(json["type"], "Daily Puzzle");
        let back: PuzzleInfo = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, info);
    }
}
