//! Go board state: stone placement, captures, suicide and positional superko.
//!
//! The board is a row-major grid of [`Color`] with independent row and column
//! counts. Every placement is recorded on a history stack together with the
//! stones it captured, so any move can be reversed exactly with [`Board::undo`].
//!
//! Repetition is detected with an incremental Zobrist hash: each (point, color)
//! pair owns a random 64-bit key and the position hash is the XOR of the keys of
//! all stones on the board. The set of hashes of every position along the
//! currently applied move sequence is kept, and a move that would recreate one
//! of them is rejected.

use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

use crate::constants::{COLUMN_LETTERS, MAX_BOARD_SIZE, PASS, PASS_LITERAL, ZOBRIST_SEED};

/// Content of a board point, or the side a move belongs to.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Color {
    #[default]
    Empty,
    Black,
    White,
}

impl Color {
    /// The other player. `Empty` has no opponent and maps to itself.
    pub fn opponent(self) -> Color {
        match self {
            Color::Black => Color::White,
            Color::White => Color::Black,
            Color::Empty => Color::Empty,
        }
    }

    /// One-letter form used by the analysis protocol (`"B"` / `"W"`).
    pub fn short_str(self) -> &'static str {
        match self {
            Color::Black => "B",
            Color::White => "W",
            Color::Empty => "",
        }
    }

    /// Parse the one-letter protocol form, case-insensitively.
    pub fn from_short(s: &str) -> Option<Color> {
        match s {
            "B" | "b" => Some(Color::Black),
            "W" | "w" => Some(Color::White),
            _ => None,
        }
    }

    fn key_index(self) -> usize {
        match self {
            Color::White => 1,
            _ => 0,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::Black => write!(f, "Black"),
            Color::White => write!(f, "White"),
            Color::Empty => write!(f, "Empty"),
        }
    }
}

/// A board point as `(row, col)`, row 0 being the top edge. See [`PASS`].
pub type Point = (usize, usize);

/// A move: who plays, and where.
pub type Move = (Color, Point);

/// An ordered list of moves.
pub type MoveList = Vec<Move>;

/// Whether `pt` is the pass sentinel.
#[inline]
pub fn is_pass(pt: Point) -> bool {
    pt == PASS
}

/// Why a placement was rejected. The board is unchanged in every case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IllegalMove {
    #[error("illegal move: point is off the board")]
    OutOfBounds,
    #[error("illegal move: point not empty")]
    Occupied,
    #[error("illegal move: suicide")]
    Suicide,
    #[error("illegal move: repeats an earlier position")]
    Superko,
    #[error("illegal move: no stone color given")]
    EmptyColor,
}

/// One entry of the undo stack.
#[derive(Clone, Debug)]
struct Placement {
    mv: Move,
    removed: Vec<Point>,
    prev_hash: u64,
}

/// A Go board with capture resolution, superko detection and full undo.
#[derive(Clone)]
pub struct Board {
    rows: usize,
    cols: usize,
    cells: Vec<Color>,
    /// Flood-fill marks: a point is visited iff its entry equals `traversal`.
    generation: Vec<u64>,
    traversal: u64,
    /// Zobrist keys per point, indexed by `Color::key_index`.
    keys: Vec<[u64; 2]>,
    hash: u64,
    seen: HashSet<u64>,
    history: Vec<Placement>,
}

impl Board {
    /// Create an empty `rows` x `cols` board.
    ///
    /// # Panics
    /// If either side is zero or larger than [`MAX_BOARD_SIZE`].
    pub fn new(rows: usize, cols: usize) -> Self {
        assert!(
            (1..=MAX_BOARD_SIZE).contains(&rows) && (1..=MAX_BOARD_SIZE).contains(&cols),
            "unsupported board size {rows}x{cols}"
        );
        let mut rng = fastrand::Rng::with_seed(ZOBRIST_SEED);
        let keys = (0..rows * cols)
            .map(|_| [rng.u64(..), rng.u64(..)])
            .collect();
        let mut seen = HashSet::new();
        seen.insert(0);
        Self {
            rows,
            cols,
            cells: vec![Color::Empty; rows * cols],
            generation: vec![0; rows * cols],
            traversal: 0,
            keys,
            hash: 0,
            seen,
            history: Vec::new(),
        }
    }

    /// Create a board holding the given setup stones as its starting position.
    ///
    /// The stones are not part of the move history: they cannot be undone, and
    /// the resulting position is the only one marked as seen.
    pub fn with_setup(rows: usize, cols: usize, stones: &[Move]) -> Result<Self, IllegalMove> {
        let mut board = Self::new(rows, cols);
        for &(color, pt) in stones {
            board.place(color, pt)?;
        }
        board.history.clear();
        board.seen.clear();
        board.seen.insert(board.hash);
        Ok(board)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Current position hash.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Number of distinct positions along the applied move sequence,
    /// the starting position included.
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Number of placements that can be undone.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    #[inline]
    pub fn inside(&self, (r, c): Point) -> bool {
        r < self.rows && c < self.cols
    }

    #[inline]
    fn idx(&self, (r, c): Point) -> usize {
        r * self.cols + c
    }

    /// Color at `pt`. Points off the board read as empty.
    pub fn at(&self, pt: Point) -> Color {
        if !self.inside(pt) {
            return Color::Empty;
        }
        self.cells[self.idx(pt)]
    }

    /// The most recent placement still applied.
    pub fn last_move(&self) -> Option<Move> {
        self.history.last().map(|p| p.mv)
    }

    /// Number of stones of `color` on the board.
    pub fn count(&self, color: Color) -> usize {
        self.cells.iter().filter(|&&c| c == color).count()
    }

    /// Place a stone, resolving captures.
    ///
    /// Returns the points of every opponent stone removed by the move.
    ///
    /// # Errors
    /// - [`IllegalMove::EmptyColor`] if `color` is `Empty`
    /// - [`IllegalMove::OutOfBounds`] if `pt` is not on the board
    /// - [`IllegalMove::Occupied`] if `pt` already holds a stone
    /// - [`IllegalMove::Suicide`] if the stone's group would have no liberties
    /// - [`IllegalMove::Superko`] if the resulting position was already seen
    pub fn place(&mut self, color: Color, pt: Point) -> Result<Vec<Point>, IllegalMove> {
        if color == Color::Empty {
            return Err(IllegalMove::EmptyColor);
        }
        if !self.inside(pt) {
            return Err(IllegalMove::OutOfBounds);
        }
        if self.at(pt) != Color::Empty {
            return Err(IllegalMove::Occupied);
        }

        let prev_hash = self.hash;
        self.set_stone(pt, color);

        let opp = color.opponent();
        let mut removed = Vec::new();
        for n in neighbors(self.rows, self.cols, pt) {
            if self.at(n) == opp && !self.has_liberties(n) {
                self.remove_group(n, &mut removed);
            }
        }

        if !self.has_liberties(pt) {
            self.rollback(pt, opp, &removed, prev_hash);
            return Err(IllegalMove::Suicide);
        }
        if self.seen.contains(&self.hash) {
            self.rollback(pt, opp, &removed, prev_hash);
            return Err(IllegalMove::Superko);
        }

        self.seen.insert(self.hash);
        self.history.push(Placement {
            mv: (color, pt),
            removed: removed.clone(),
            prev_hash,
        });
        Ok(removed)
    }

    /// Reverse the last placement.
    ///
    /// Returns the point that was played and the stones given back to the
    /// opponent, or `None` when there is nothing to undo.
    pub fn undo(&mut self) -> Option<(Point, Vec<Point>)> {
        let Placement {
            mv: (color, pt),
            removed,
            prev_hash,
        } = self.history.pop()?;

        // `place` never inserts a hash twice, so this entry belongs to the move
        // being unwound alone.
        self.seen.remove(&self.hash);

        self.set_stone(pt, Color::Empty);
        let opp = color.opponent();
        for &p in &removed {
            self.set_stone(p, opp);
        }
        debug_assert_eq!(self.hash, prev_hash);
        self.hash = prev_hash;
        Some((pt, removed))
    }

    /// Set a point, keeping the hash in step with the grid.
    fn set_stone(&mut self, pt: Point, color: Color) {
        let i = self.idx(pt);
        let old = self.cells[i];
        if old != Color::Empty {
            self.hash ^= self.keys[i][old.key_index()];
        }
        if color != Color::Empty {
            self.hash ^= self.keys[i][color.key_index()];
        }
        self.cells[i] = color;
    }

    fn rollback(&mut self, pt: Point, opp: Color, removed: &[Point], prev_hash: u64) {
        self.set_stone(pt, Color::Empty);
        for &p in removed {
            self.set_stone(p, opp);
        }
        debug_assert_eq!(self.hash, prev_hash);
    }

    /// Whether the group containing `start` touches at least one empty point.
    fn has_liberties(&mut self, start: Point) -> bool {
        let color = self.at(start);
        self.traversal += 1;
        let tag = self.traversal;

        let si = self.idx(start);
        self.generation[si] = tag;
        let mut stack = vec![start];

        while let Some(pt) = stack.pop() {
            for n in neighbors(self.rows, self.cols, pt) {
                let ni = self.idx(n);
                match self.cells[ni] {
                    Color::Empty => return true,
                    c if c == color && self.generation[ni] != tag => {
                        self.generation[ni] = tag;
                        stack.push(n);
                    }
                    _ => {}
                }
            }
        }
        false
    }

    /// Remove the whole group containing `start`, appending its points to `out`.
    fn remove_group(&mut self, start: Point, out: &mut Vec<Point>) {
        let color = self.at(start);
        self.set_stone(start, Color::Empty);
        out.push(start);
        let mut stack = vec![start];

        while let Some(pt) = stack.pop() {
            for n in neighbors(self.rows, self.cols, pt) {
                if self.at(n) == color {
                    self.set_stone(n, Color::Empty);
                    out.push(n);
                    stack.push(n);
                }
            }
        }
    }
}

/// The orthogonal neighbors of an on-board point.
pub fn neighbors(rows: usize, cols: usize, (r, c): Point) -> impl Iterator<Item = Point> {
    let up = r.checked_sub(1).map(|r| (r, c));
    let down = (r + 1 < rows).then_some((r + 1, c));
    let left = c.checked_sub(1).map(|c| (r, c));
    let right = (c + 1 < cols).then_some((r, c + 1));
    [up, down, left, right].into_iter().flatten()
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for r in 0..self.rows {
            write!(f, "{:>2} ", self.rows - r)?;
            for c in 0..self.cols {
                let ch = match self.at((r, c)) {
                    Color::Black => 'X',
                    Color::White => 'O',
                    Color::Empty => '.',
                };
                write!(f, "{ch} ")?;
            }
            writeln!(f)?;
        }
        write!(f, "   ")?;
        for &letter in COLUMN_LETTERS.iter().take(self.cols) {
            write!(f, "{} ", letter as char)?;
        }
        writeln!(f)
    }
}

/// Traditional star points (hoshi) of a square board, empty for other sizes.
pub fn star_points(size: usize) -> Vec<Point> {
    let lines: &[usize] = match size {
        19 => &[3, 9, 15],
        13 => &[3, 6, 9],
        9 => &[2, 4, 6],
        _ => return Vec::new(),
    };
    let mut points = Vec::new();
    for &r in lines {
        for &c in lines {
            // 13x13 and 9x9 only mark the corners and the center.
            let edge_middle = size != 19 && (r == size / 2) != (c == size / 2);
            if !edge_middle {
                points.push((r, c));
            }
        }
    }
    points
}

/// Convert a point to engine coordinates (e.g. `"D4"`), rows counted from the bottom.
///
/// Returns `"pass"` for [`PASS`].
pub fn str_coord(pt: Point, rows: usize) -> String {
    if is_pass(pt) {
        return PASS_LITERAL.into();
    }
    let (r, c) = pt;
    let letter = COLUMN_LETTERS.get(c).map_or('?', |&b| b as char);
    format!("{letter}{}", rows.saturating_sub(r))
}

/// Parse engine coordinates (e.g. `"D4"`, `"pass"`) on a `rows` x `cols` board.
///
/// Column letters skip `I`. Returns `None` for malformed or off-board input.
pub fn parse_coord(s: &str, rows: usize, cols: usize) -> Option<Point> {
    if s.eq_ignore_ascii_case(PASS_LITERAL) {
        return Some(PASS);
    }
    let mut chars = s.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    let c = COLUMN_LETTERS.iter().position(|&b| b as char == letter)?;
    let digits = chars.as_str();
    if digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let number: usize = digits.parse().ok()?;
    if number == 0 || number > rows || c >= cols {
        return None;
    }
    Some((rows - number, c))
}
