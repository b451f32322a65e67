use std::collections::BTreeSet;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::{
    config::ConfigError,
    symbols::{SymbolKey, SymbolTable},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cell {
    pub row: usize,
    pub col: usize,
}

impl Cell {
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

/// Symbols in row-major order; `cells[row][col]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Grid {
    cells: Vec<Vec<SymbolKey>>,
}

impl Grid {
    /// Fill a `rows x cols` window with independent draws.
    pub fn build<R: RngCore + ?Sized>(
        table: &SymbolTable,
        rows: usize,
        cols: usize,
        rng: &mut R,
    ) -> Self {
        let cells = (0..rows)
            .map(|_| (0..cols).map(|_| table.draw(rng).key).collect())
            .collect();
        Self { cells }
    }

    /// Build from explicit rows. Returns `None` for ragged or empty input.
    pub fn from_rows(cells: Vec<Vec<SymbolKey>>) -> Option<Self> {
        let cols = cells.first()?.len();
        if cols == 0 || cells.iter().any(|row| row.len() != cols) {
            return None;
        }
        Some(Self { cells })
    }

    pub fn rows(&self) -> usize {
        self.cells.len()
    }

    pub fn cols(&self) -> usize {
        self.cells.first().map_or(0, Vec::len)
    }

    pub fn get(&self, cell: Cell) -> Option<SymbolKey> {
        self.cells.get(cell.row)?.get(cell.col).copied()
    }

    pub fn as_rows(&self) -> &[Vec<SymbolKey>] {
        &self.cells
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    Horizontal,
    Vertical,
    Diagonal,
    AntiDiagonal,
}

impl LineKind {
    pub fn name(self) -> &'static str {
        match self {
            LineKind::Horizontal => "horizontal",
            LineKind::Vertical => "vertical",
            LineKind::Diagonal => "diagonal",
            LineKind::AntiDiagonal => "anti_diagonal",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Line {
    pub kind: LineKind,
    pub index: usize,
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct LineSet(Vec<Line>);

impl LineSet {
    pub fn new(lines: Vec<Line>) -> Self {
        Self(lines)
    }

    /// Every full row and column, plus both diagonals when the grid is square.
    pub fn standard(rows: usize, cols: usize) -> Self {
        let mut lines = Vec::new();
        for r in 0..rows {
            lines.push(Line {
                kind: LineKind::Horizontal,
                index: r,
                cells: (0..cols).map(|c| Cell::new(r, c)).collect(),
            });
        }
        for c in 0..cols {
            lines.push(Line {
                kind: LineKind::Vertical,
                index: c,
                cells: (0..rows).map(|r| Cell::new(r, c)).collect(),
            });
        }
        if rows == cols && rows > 1 {
            lines.push(Line {
                kind: LineKind::Diagonal,
                index: 0,
                cells: (0..rows).map(|i| Cell::new(i, i)).collect(),
            });
            lines.push(Line {
                kind: LineKind::AntiDiagonal,
                index: 0,
                cells: (0..rows).map(|i| Cell::new(i, cols - 1 - i)).collect(),
            });
        }
        Self(lines)
    }

    pub fn lines(&self) -> &[Line] {
        &self.0
    }

    pub fn validate(&self, rows: usize, cols: usize) -> Result<(), ConfigError> {
        if self.0.is_empty() {
            return Err(ConfigError::NoLines);
        }
        for (idx, line) in self.0.iter().enumerate() {
            if line.cells.len() < 2 {
                return Err(ConfigError::ShortLine(idx));
            }
            if let Some(cell) = line.cells.iter().find(|c| c.row >= rows || c.col >= cols) {
                return Err(ConfigError::LineOutOfBounds {
                    line: idx,
                    row: cell.row,
                    col: cell.col,
                });
            }
        }
        Ok(())
    }
}

/// A line whose cells all hold `symbol`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineWin {
    pub line: Line,
    pub symbol: SymbolKey,
}

/// Check every line in set order. Line sets are validated against the grid
/// size at configuration time; a line that still falls outside is not a win.
pub fn evaluate(grid: &Grid, lines: &LineSet) -> Vec<LineWin> {
    lines
        .lines()
        .iter()
        .filter_map(|line| {
            let mut keys = line.cells.iter().map(|&cell| grid.get(cell));
            let first = keys.next()??;
            keys.all(|k| k == Some(first)).then(|| LineWin {
                line: line.clone(),
                symbol: first,
            })
        })
        .collect()
}

/// Cells covered by at least one win, each reported once.
pub fn winning_cells(wins: &[LineWin]) -> BTreeSet<Cell> {
    wins.iter()
        .flat_map(|w| w.line.cells.iter().copied())
        .collect()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PickOutcome {
    Safe,
    Trap,
}

/// Tower rows hide one trap column; any other column is safe.
pub fn check_pick(trap_column: usize, pick: usize) -> PickOutcome {
    if pick == trap_column {
        PickOutcome::Trap
    } else {
        PickOutcome::Safe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::ProvablyFairRng;
    use SymbolKey::*;

    #[test]
    fn test_standard_lines_for_3x3() {
        let lines = LineSet::standard(3, 3);
        assert_eq!(lines.lines().len(), 8);
        assert!(lines.validate(3, 3).is_ok());
        let anti = &lines.lines()[7];
        assert_eq!(anti.kind, LineKind::AntiDiagonal);
        assert_eq!(anti.cells, vec![Cell::new(0, 2), Cell::new(1, 1), Cell::new(2, 0)]);
    }

    #[test]
    fn test_rectangular_grid_has_no_diagonals() {
        let lines = LineSet::standard(3, 5);
        assert_eq!(lines.lines().len(), 8);
        assert!(lines.lines().iter().all(|l| matches!(
            l.kind,
            LineKind::Horizontal | LineKind::Vertical
        )));
    }

    #[test]
    fn test_out_of_bounds_line_is_config_error() {
        let lines = LineSet::new(vec![Line {
            kind: LineKind::Horizontal,
            index: 0,
            cells: vec![Cell::new(0, 0), Cell::new(0, 3)],
        }]);
        assert_eq!(
            lines.validate(3, 3),
            Err(ConfigError::LineOutOfBounds {
                line: 0,
                row: 0,
                col: 3
            })
        );
    }

    #[test]
    fn test_single_row_win() {
        let grid = Grid::from_rows(vec![
            vec![Cherry, Cherry, Cherry],
            vec![Lemon, Grape, Star],
            vec![Diamond, Seven, Dice],
        ])
        .unwrap();
        let wins = evaluate(&grid, &LineSet::standard(3, 3));
        assert_eq!(wins.len(), 1);
        assert_eq!(wins[0].symbol, Cherry);
        assert_eq!(wins[0].line.kind, LineKind::Horizontal);
        assert_eq!(wins[0].line.index, 0);
    }

    #[test]
    fn test_shared_cells_counted_per_line_highlighted_once() {
        let grid = Grid::from_rows(vec![
            vec![Star, Star, Star],
            vec![Lemon, Star, Grape],
            vec![Star, Cherry, Star],
        ])
        .unwrap();
        let wins = evaluate(&grid, &LineSet::standard(3, 3));
        let kinds: Vec<LineKind> = wins.iter().map(|w| w.line.kind).collect();
        assert_eq!(
            kinds,
            vec![LineKind::Horizontal, LineKind::Diagonal, LineKind::AntiDiagonal]
        );
        assert_eq!(winning_cells(&wins).len(), 6);
    }

    #[test]
    fn test_uniform_grid_wins_every_line() {
        let grid = Grid::from_rows(vec![vec![Seven; 3]; 3]).unwrap();
        assert_eq!(evaluate(&grid, &LineSet::standard(3, 3)).len(), 8);
    }

    #[test]
    fn test_reported_lines_are_uniform() {
        let table = SymbolTable::classic();
        let lines = LineSet::standard(3, 3);
        for nonce in 0..2_000u64 {
            let mut rng = ProvablyFairRng::new("server", "client", nonce);
            let grid = Grid::build(&table, 3, 3, &mut rng);
            for win in evaluate(&grid, &lines) {
                assert!(win.line.cells.iter().all(|&c| grid.get(c) == Some(win.symbol)));
            }
        }
    }

    #[test]
    fn test_ragged_rows_rejected() {
        assert!(Grid::from_rows(vec![vec![Cherry, Lemon], vec![Cherry]]).is_none());
        assert!(Grid::from_rows(vec![]).is_none());
    }

    #[test]
    fn test_check_pick() {
        assert_eq!(check_pick(2, 0), PickOutcome::Safe);
        assert_eq!(check_pick(2, 2), PickOutcome::Trap);
    }
}
