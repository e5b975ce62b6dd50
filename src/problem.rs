//! Go problems and solving sessions.
//!
//! A problem is a setup position plus a tree of known variations. The solver
//! plays moves for the side to move; every reply of the opponent is chosen at
//! random among the continuations in the tree. Reaching a node marked with an
//! answer ends the attempt, and so does any move the tree does not know, which
//! counts as wrong.
//!
//! Some problems instead ask to pick a set of points (e.g. "which stones are
//! dead"). They carry answer points and no moves are played.
//!
//! ## JSON form
//!
//! ```text
//! {"rows":9,"cols":9,"first_to_play":"B","black":["cc"],"white":["dc"],
//!  "answer_points":[],
//!  "vtree":{"n":{"dd":{"a":0,"c":"Correct!"},"ed":{"n":{"dd":{"a":2}}}}}}
//! ```
//!
//! Points are two letters, column then row, each counted from `a`. In a
//! variation node, `c` is a comment, `a` an answer (0 correct, 1 variation,
//! 2 wrong) and `n` the children keyed by move. The optional `rank` ("5k",
//! "2D") and `description` fields describe the problem.
//!
//! A [`SolvePreset`] bounds a session: seconds per problem, problems per
//! session, and how many of them may be failed.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use thiserror::Error;

use crate::board::{Color, IllegalMove, MoveList, Point};
use crate::constants::MAX_BOARD_SIZE;
use crate::review::Rank;
use crate::timeline::{PlayMode, Timeline};

/// Errors loading or solving a problem.
#[derive(Debug, Error, PartialEq)]
pub enum ProblemError {
    #[error("malformed problem: {0}")]
    Json(String),
    #[error("bad board size {0}x{1}")]
    Size(usize, usize),
    #[error("bad point {0:?}")]
    Point(String),
    #[error("bad color {0:?}")]
    Color(String),
    #[error("bad answer type {0}")]
    Answer(u8),
    #[error("bad rank {0:?}")]
    Rank(String),
    #[error(transparent)]
    Illegal(#[from] IllegalMove),
    #[error("not the solver's turn")]
    NotYourTurn,
    #[error("attempt already finished")]
    Finished,
    #[error("no known reply in this position")]
    NoResponse,
    #[error("this problem is solved by picking points")]
    PickProblem,
    #[error("this problem has no answer points")]
    NotPickProblem,
}

impl From<serde_json::Error> for ProblemError {
    fn from(e: serde_json::Error) -> Self {
        ProblemError::Json(e.to_string())
    }
}

/// Verdict attached to a variation node.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AnswerType {
    Correct,
    /// An acceptable alternative to the main answer.
    Variation,
    Wrong,
}

impl AnswerType {
    fn from_code(code: u8) -> Result<Self, ProblemError> {
        match code {
            0 => Ok(AnswerType::Correct),
            1 => Ok(AnswerType::Variation),
            2 => Ok(AnswerType::Wrong),
            n => Err(ProblemError::Answer(n)),
        }
    }

    pub fn is_success(self) -> bool {
        self != AnswerType::Wrong
    }
}

/// One position of the variation tree.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VariationNode {
    pub children: BTreeMap<Point, VariationNode>,
    pub comment: String,
    pub answer: Option<AnswerType>,
}

impl VariationNode {
    /// The node reached by following `path` from here.
    pub fn descend(&self, path: &[Point]) -> Option<&VariationNode> {
        path.iter()
            .try_fold(self, |node, pt| node.children.get(pt))
    }

    /// Number of nodes in this subtree, this one included.
    pub fn size(&self) -> usize {
        1 + self.children.values().map(VariationNode::size).sum::<usize>()
    }
}

#[derive(Deserialize)]
struct NodeMessage {
    #[serde(default)]
    c: String,
    #[serde(default)]
    a: Option<u8>,
    #[serde(default)]
    n: BTreeMap<String, NodeMessage>,
}

#[derive(Deserialize)]
struct ProblemMessage {
    rows: usize,
    cols: usize,
    first_to_play: String,
    #[serde(default)]
    black: Vec<String>,
    #[serde(default)]
    white: Vec<String>,
    #[serde(default)]
    answer_points: Vec<String>,
    #[serde(default)]
    vtree: Option<NodeMessage>,
    #[serde(default)]
    rank: Option<String>,
    #[serde(default)]
    description: String,
}

/// Decode a two-letter point (column, then row) on a `rows` x `cols` board.
pub fn parse_sgf_point(s: &str, rows: usize, cols: usize) -> Option<Point> {
    let &[c, r] = s.as_bytes() else {
        return None;
    };
    let (r, c) = (r.checked_sub(b'a')? as usize, c.checked_sub(b'a')? as usize);
    (r < rows && c < cols).then_some((r, c))
}

/// Encode a point in the two-letter form.
pub fn sgf_point((r, c): Point) -> String {
    [(b'a' + c as u8) as char, (b'a' + r as u8) as char]
        .iter()
        .collect()
}

fn decode_points(points: &[String], rows: usize, cols: usize) -> Result<Vec<Point>, ProblemError> {
    points
        .iter()
        .map(|p| parse_sgf_point(p, rows, cols).ok_or_else(|| ProblemError::Point(p.clone())))
        .collect()
}

fn decode_node(msg: NodeMessage, rows: usize, cols: usize) -> Result<VariationNode, ProblemError> {
    let answer = msg.a.map(AnswerType::from_code).transpose()?;
    let mut children = BTreeMap::new();
    for (key, child) in msg.n {
        let pt = parse_sgf_point(&key, rows, cols).ok_or(ProblemError::Point(key))?;
        children.insert(pt, decode_node(child, rows, cols)?);
    }
    Ok(VariationNode {
        children,
        comment: msg.c,
        answer,
    })
}

/// Decode a variation tree in its JSON form.
pub fn parse_vtree(json: &str, rows: usize, cols: usize) -> Result<VariationNode, ProblemError> {
    let msg: NodeMessage = serde_json::from_str(json)?;
    decode_node(msg, rows, cols)
}

/// A problem: setup position, side to move, and how it is judged.
#[derive(Clone, Debug, PartialEq)]
pub struct Problem {
    pub rows: usize,
    pub cols: usize,
    pub first_to_play: Color,
    pub black: Vec<Point>,
    pub white: Vec<Point>,
    /// Points to pick. Non-empty only for pick problems.
    pub answer_points: Vec<Point>,
    pub tree: VariationNode,
    /// Strength the problem is meant for, [`Rank::UNKNOWN`] when not given.
    pub rank: Rank,
    pub description: String,
}

impl Problem {
    pub fn from_json(json: &str) -> Result<Self, ProblemError> {
        let msg: ProblemMessage = serde_json::from_str(json)?;
        let (rows, cols) = (msg.rows, msg.cols);
        if !(1..=MAX_BOARD_SIZE).contains(&rows) || !(1..=MAX_BOARD_SIZE).contains(&cols) {
            return Err(ProblemError::Size(rows, cols));
        }
        let first_to_play = match Color::from_short(&msg.first_to_play) {
            Some(color @ (Color::Black | Color::White)) => color,
            _ => return Err(ProblemError::Color(msg.first_to_play)),
        };
        let tree = match msg.vtree {
            Some(node) => decode_node(node, rows, cols)?,
            None => VariationNode::default(),
        };
        let rank = match msg.rank {
            Some(text) => text.parse().map_err(|_| ProblemError::Rank(text))?,
            None => Rank::UNKNOWN,
        };
        Ok(Problem {
            rows,
            cols,
            first_to_play,
            black: decode_points(&msg.black, rows, cols)?,
            white: decode_points(&msg.white, rows, cols)?,
            answer_points: decode_points(&msg.answer_points, rows, cols)?,
            tree,
            rank,
            description: msg.description,
        })
    }

    pub fn is_pick(&self) -> bool {
        !self.answer_points.is_empty()
    }

    /// Setup stones, Black first.
    pub fn setup_stones(&self) -> MoveList {
        let black = self.black.iter().map(|&pt| (Color::Black, pt));
        let white = self.white.iter().map(|&pt| (Color::White, pt));
        black.chain(white).collect()
    }
}

/// Solved and failed problem counts over a session.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub attempted: u32,
    pub failed: u32,
}

impl SessionStats {
    pub fn solved(&self) -> u32 {
        self.attempted - self.failed
    }

    /// Share solved, in whole percent. Zero before the first problem.
    pub fn percent(&self) -> u32 {
        self.solved() * 100 / self.attempted.max(1)
    }

    fn record(&mut self, answer: AnswerType) {
        self.attempted += 1;
        if !answer.is_success() {
            self.failed += 1;
        }
    }
}

/// Limits of a solving session.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SolvePreset {
    /// Seconds per problem. 0 means no limit.
    pub time_limit_secs: u32,
    /// Problems in the session. 0 means unlimited.
    pub max_tasks: u32,
    /// Failed problems allowed for the session to pass. `None` means any.
    pub max_errors: Option<u32>,
}

/// Solving state for one problem at a time.
///
/// The first verdict reached on a problem is its result: retries after
/// [`reset`](Self::reset) can still be played and judged but do not change it.
pub struct SolveSession {
    problem: Problem,
    preset: SolvePreset,
    /// Seconds left on the current problem.
    time_left: u32,
    timeline: Timeline,
    /// Moves walked from the tree root.
    path: Vec<Point>,
    remaining_picks: BTreeSet<Point>,
    outcome: Option<AnswerType>,
    result: Option<AnswerType>,
    comment: String,
    stats: SessionStats,
}

impl SolveSession {
    pub fn new(problem: Problem) -> Result<Self, ProblemError> {
        Self::with_preset(problem, SolvePreset::default())
    }

    pub fn with_preset(problem: Problem, preset: SolvePreset) -> Result<Self, ProblemError> {
        let timeline = Self::setup(&problem)?;
        Ok(Self {
            remaining_picks: problem.answer_points.iter().copied().collect(),
            problem,
            preset,
            time_left: preset.time_limit_secs,
            timeline,
            path: Vec::new(),
            outcome: None,
            result: None,
            comment: String::new(),
            stats: SessionStats::default(),
        })
    }

    fn setup(problem: &Problem) -> Result<Timeline, ProblemError> {
        Ok(Timeline::with_setup(
            problem.rows,
            problem.cols,
            problem.setup_stones(),
            problem.first_to_play,
        )?)
    }

    /// Move on to another problem, keeping the statistics.
    ///
    /// The clock restarts here, not on [`reset`](Self::reset).
    pub fn load(&mut self, problem: Problem) -> Result<(), ProblemError> {
        self.timeline = Self::setup(&problem)?;
        self.problem = problem;
        self.result = None;
        self.time_left = self.preset.time_limit_secs;
        self.reset_attempt();
        Ok(())
    }

    /// Restore the start position for another try.
    pub fn reset(&mut self) {
        match Self::setup(&self.problem) {
            Ok(timeline) => self.timeline = timeline,
            // The setup was valid when loaded; fall back to rewinding.
            Err(e) => {
                log::error!("problem setup no longer applies: {e}");
                while self.timeline.undo_one() {}
            }
        }
        self.reset_attempt();
    }

    fn reset_attempt(&mut self) {
        self.path.clear();
        self.remaining_picks = self.problem.answer_points.iter().copied().collect();
        self.outcome = None;
        self.comment.clear();
    }

    /// Give up on the current problem. Counts as wrong if it had no result yet.
    pub fn skip(&mut self) {
        self.finish(AnswerType::Wrong);
    }

    pub fn problem(&self) -> &Problem {
        &self.problem
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Verdict of the current attempt, once it ended.
    pub fn outcome(&self) -> Option<AnswerType> {
        self.outcome
    }

    /// First verdict reached on this problem.
    pub fn result(&self) -> Option<AnswerType> {
        self.result
    }

    /// Comment of the last tree node reached.
    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn preset(&self) -> SolvePreset {
        self.preset
    }

    /// Seconds left on this problem, `None` without a time limit.
    pub fn time_left(&self) -> Option<u32> {
        (self.preset.time_limit_secs > 0).then_some(self.time_left)
    }

    /// Let one second pass. See [`elapse`](Self::elapse).
    pub fn tick(&mut self) -> Option<AnswerType> {
        self.elapse(1)
    }

    /// Let `secs` seconds pass on the clock.
    ///
    /// The clock only runs while the problem has no result. Running out ends
    /// the attempt as wrong, which is then returned.
    pub fn elapse(&mut self, secs: u32) -> Option<AnswerType> {
        if self.preset.time_limit_secs == 0 || self.result.is_some() {
            return None;
        }
        self.time_left = self.time_left.saturating_sub(secs);
        if self.time_left > 0 {
            return None;
        }
        log::debug!("time is up");
        self.remaining_picks.clear();
        self.finish(AnswerType::Wrong);
        Some(AnswerType::Wrong)
    }

    /// All problems of the session have a result.
    pub fn is_complete(&self) -> bool {
        self.preset.max_tasks > 0 && self.stats.attempted >= self.preset.max_tasks
    }

    /// No more problems failed than the preset allows.
    pub fn passed(&self) -> bool {
        self.preset
            .max_errors
            .is_none_or(|max| self.stats.failed <= max)
    }

    pub fn solver(&self) -> Color {
        self.problem.first_to_play
    }

    /// The solver may move now.
    pub fn solver_to_play(&self) -> bool {
        self.outcome.is_none() && self.timeline.to_play() == self.solver()
    }

    /// Points picked so far are removed; these are still to find.
    pub fn remaining_picks(&self) -> &BTreeSet<Point> {
        &self.remaining_picks
    }

    fn finish(&mut self, answer: AnswerType) {
        self.outcome = Some(answer);
        if self.result.is_none() {
            self.result = Some(answer);
            self.stats.record(answer);
            log::debug!("problem finished: {answer:?}");
        }
    }

    /// Follow `pt` in the tree and settle the attempt if it reached a verdict.
    fn walk(&mut self, pt: Point) -> Option<AnswerType> {
        self.path.push(pt);
        let verdict = match self.problem.tree.descend(&self.path) {
            Some(node) => {
                self.comment.clone_from(&node.comment);
                node.answer
            }
            None => {
                self.comment.clear();
                Some(AnswerType::Wrong)
            }
        };
        if let Some(answer) = verdict {
            self.finish(answer);
        }
        verdict
    }

    /// Play the solver's move. Returns the verdict if the attempt ended.
    ///
    /// A move the board rejects changes nothing.
    pub fn play(&mut self, pt: Point) -> Result<Option<AnswerType>, ProblemError> {
        if self.problem.is_pick() {
            return Err(ProblemError::PickProblem);
        }
        if self.outcome.is_some() {
            return Err(ProblemError::Finished);
        }
        if self.timeline.to_play() != self.solver() {
            return Err(ProblemError::NotYourTurn);
        }
        self.timeline.play(pt, PlayMode::Variation)?;
        Ok(self.walk(pt))
    }

    /// Play a random known reply for the opponent.
    ///
    /// Returns the move played and the verdict if the attempt ended.
    pub fn respond(
        &mut self,
        rng: &mut fastrand::Rng,
    ) -> Result<(Point, Option<AnswerType>), ProblemError> {
        if self.outcome.is_some() {
            return Err(ProblemError::Finished);
        }
        if self.timeline.to_play() == self.solver() {
            return Err(ProblemError::NotYourTurn);
        }
        let node = self
            .problem
            .tree
            .descend(&self.path)
            .ok_or(ProblemError::NoResponse)?;
        let replies: Vec<Point> = node.children.keys().copied().collect();
        if replies.is_empty() {
            return Err(ProblemError::NoResponse);
        }
        let pt = replies[rng.usize(..replies.len())];
        self.timeline.play(pt, PlayMode::Variation)?;
        Ok((pt, self.walk(pt)))
    }

    /// Pick a point of a pick problem. Returns the verdict if the attempt ended.
    ///
    /// Picking an answer point twice is ignored; any other point is wrong.
    pub fn pick(&mut self, pt: Point) -> Result<Option<AnswerType>, ProblemError> {
        if !self.problem.is_pick() {
            return Err(ProblemError::NotPickProblem);
        }
        if self.outcome.is_some() {
            return Err(ProblemError::Finished);
        }
        if self.remaining_picks.remove(&pt) {
            if self.remaining_picks.is_empty() {
                self.finish(AnswerType::Correct);
                return Ok(Some(AnswerType::Correct));
            }
            return Ok(None);
        }
        if self.problem.answer_points.contains(&pt) {
            return Ok(None);
        }
        self.remaining_picks.clear();
        self.finish(AnswerType::Wrong);
        Ok(Some(AnswerType::Wrong))
    }
}
