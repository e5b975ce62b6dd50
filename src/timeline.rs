//! Move timeline: a game record with a cursor and an uncommitted variation.
//!
//! The timeline owns a [`Board`] and keeps it in step with the moves it
//! records. Moves up to `cursor` on the mainline, followed by every move on the
//! branch, are exactly the moves applied to the board. That sequence is what
//! [`Timeline::current_moves`] returns and what gets sent to the analysis
//! engine.

use crate::board::{Board, Color, IllegalMove, Move, MoveList, Point, is_pass};
use crate::constants::PASS;

/// How a new move relates to the existing record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PlayMode {
    /// Explore: a move played before the end of the mainline starts or
    /// extends the branch and leaves the mainline intact.
    Variation,
    /// Edit: the record is cut at the current position and the move becomes
    /// the new continuation of the mainline.
    Mainline,
}

/// A game record navigated move by move.
#[derive(Clone)]
pub struct Timeline {
    board: Board,
    initial_stones: MoveList,
    first_to_play: Color,
    mainline: MoveList,
    cursor: usize,
    branch: MoveList,
    to_play: Color,
}

impl Timeline {
    /// An empty record on an empty `rows` x `cols` board, Black to play.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            board: Board::new(rows, cols),
            initial_stones: Vec::new(),
            first_to_play: Color::Black,
            mainline: Vec::new(),
            cursor: 0,
            branch: Vec::new(),
            to_play: Color::Black,
        }
    }

    /// An empty record starting from setup stones (handicap or a problem).
    pub fn with_setup(
        rows: usize,
        cols: usize,
        stones: MoveList,
        first_to_play: Color,
    ) -> Result<Self, IllegalMove> {
        let board = Board::with_setup(rows, cols, &stones)?;
        Ok(Self {
            board,
            initial_stones: stones,
            first_to_play,
            mainline: Vec::new(),
            cursor: 0,
            branch: Vec::new(),
            to_play: first_to_play,
        })
    }

    /// Discard everything and start over on a fresh board of the given size.
    pub fn reset(&mut self, rows: usize, cols: usize) {
        *self = Self::new(rows, cols);
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn mainline(&self) -> &[Move] {
        &self.mainline
    }

    pub fn branch(&self) -> &[Move] {
        &self.branch
    }

    /// Number of mainline moves currently applied.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn initial_stones(&self) -> &[Move] {
        &self.initial_stones
    }

    pub fn first_to_play(&self) -> Color {
        self.first_to_play
    }

    pub fn to_play(&self) -> Color {
        self.to_play
    }

    /// Override the side to move, e.g. to let one side play twice while editing.
    pub fn set_to_play(&mut self, color: Color) {
        self.to_play = color;
    }

    pub fn in_variation(&self) -> bool {
        !self.branch.is_empty()
    }

    /// Number of moves applied, passes included.
    pub fn move_number(&self) -> usize {
        self.cursor + self.branch.len()
    }

    /// The last applied move, pass included.
    pub fn last_move(&self) -> Option<Move> {
        match self.branch.last() {
            Some(&mv) => Some(mv),
            None => self.cursor.checked_sub(1).map(|i| self.mainline[i]),
        }
    }

    /// The moves behind the displayed position: applied mainline, then branch.
    pub fn current_moves(&self) -> MoveList {
        let mut moves = self.mainline[..self.cursor].to_vec();
        moves.extend_from_slice(&self.branch);
        moves
    }

    /// Play a stone for the side to move.
    ///
    /// Returns the captured points. A rejected move changes nothing.
    pub fn play(&mut self, pt: Point, mode: PlayMode) -> Result<Vec<Point>, IllegalMove> {
        if is_pass(pt) {
            self.pass(mode);
            return Ok(Vec::new());
        }
        let color = self.to_play;
        let removed = self.board.place(color, pt)?;
        self.record((color, pt), mode);
        Ok(removed)
    }

    /// Pass for the side to move. The board is untouched.
    pub fn pass(&mut self, mode: PlayMode) {
        self.record((self.to_play, PASS), mode);
    }

    fn record(&mut self, mv: Move, mode: PlayMode) {
        match mode {
            PlayMode::Mainline => {
                if !self.branch.is_empty() {
                    // The board already shows the branch: commit it first.
                    self.mainline.truncate(self.cursor);
                    self.cursor += self.branch.len();
                    self.mainline.append(&mut self.branch);
                }
                self.mainline.truncate(self.cursor);
                self.mainline.push(mv);
                self.cursor += 1;
            }
            PlayMode::Variation => {
                if self.branch.is_empty() && self.cursor == self.mainline.len() {
                    self.mainline.push(mv);
                    self.cursor += 1;
                } else {
                    self.branch.push(mv);
                }
            }
        }
        self.to_play = mv.0.opponent();
    }

    /// Step back one move: the last branch move if any, else the mainline.
    pub fn undo_one(&mut self) -> bool {
        let (color, pt) = if let Some(mv) = self.branch.pop() {
            mv
        } else if self.cursor > 0 {
            self.cursor -= 1;
            self.mainline[self.cursor]
        } else {
            return false;
        };

        if !is_pass(pt) {
            match self.board.undo() {
                Some((undone, _)) if undone == pt => {}
                Some((undone, _)) => {
                    log::error!("timeline out of sync: expected to undo {pt:?}, board undid {undone:?}");
                }
                None => log::error!("timeline out of sync: board has nothing to undo for {pt:?}"),
            }
        }
        self.to_play = color;
        true
    }

    /// Step forward one mainline move. Only possible outside a variation.
    pub fn redo_one(&mut self) -> bool {
        if !self.branch.is_empty() || self.cursor >= self.mainline.len() {
            return false;
        }
        let (color, pt) = self.mainline[self.cursor];
        if !is_pass(pt) {
            if let Err(e) = self.board.place(color, pt) {
                log::error!("mainline move {} at {pt:?} no longer applies: {e}", self.cursor + 1);
                return false;
            }
        }
        self.cursor += 1;
        self.to_play = color.opponent();
        true
    }

    /// Leave the variation, returning to the mainline position it started from.
    pub fn goto_mainline(&mut self) -> bool {
        let mut changed = false;
        while !self.branch.is_empty() {
            changed |= self.undo_one();
        }
        changed
    }

    /// Go to the position after `n` mainline moves (clamped to the record).
    pub fn goto_move(&mut self, n: usize) -> bool {
        let mut changed = self.goto_mainline();
        while self.cursor < n && self.redo_one() {
            changed = true;
        }
        while self.cursor > n && self.undo_one() {
            changed = true;
        }
        changed
    }

    pub fn goto_start(&mut self) -> bool {
        self.goto_move(0)
    }

    pub fn goto_end(&mut self) -> bool {
        self.goto_move(self.mainline.len())
    }
}
