//! Playing against the engine and reviewing finished games.
//!
//! The engine opponent imitates a human of a given [`Rank`]: it samples its
//! move from the human-style policy the engine reports, searching only a few
//! visits at strong ranks. After the game the whole record is analyzed in
//! one query and every move gets a point loss.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::board::{Color, Move, MoveList, Point};
use crate::constants::{
    CAPTURE_MANY_THRESHOLD, DEFAULT_KOMI, DEFAULT_RULES, GAME_END_PASSES, PASS, RESIGN_CONSECUTIVE_TURNS,
    RESIGN_MIN_MOVES, RESIGN_SCORE_LEAD, RESIGN_WINRATE,
};
use crate::protocol::{AnalysisQuery, RootInfo};

const KYU_LEVELS: u8 = 30;
const DAN_LEVELS: u8 = 15;

/// Playing strength, 30K up to 15D. Ordered weakest first; unknown sorts lowest.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rank(u8);

impl Rank {
    pub const UNKNOWN: Rank = Rank(0);

    /// `n` kyu, 1..=30.
    pub fn kyu(n: u8) -> Option<Rank> {
        (1..=KYU_LEVELS).contains(&n).then(|| Rank(KYU_LEVELS + 1 - n))
    }

    /// `n` dan, 1..=15.
    pub fn dan(n: u8) -> Option<Rank> {
        (1..=DAN_LEVELS).contains(&n).then(|| Rank(KYU_LEVELS + n))
    }

    pub fn is_known(self) -> bool {
        self != Self::UNKNOWN
    }

    /// Every known rank, weakest first.
    pub fn all() -> impl Iterator<Item = Rank> {
        (1..=KYU_LEVELS + DAN_LEVELS).map(Rank)
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            0 => write!(f, "?"),
            n if n <= KYU_LEVELS => write!(f, "{}K", KYU_LEVELS + 1 - n),
            n => write!(f, "{}D", n - KYU_LEVELS),
        }
    }
}

impl FromStr for Rank {
    type Err = String;

    /// Parses "5k", "3D" and "?".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "?" {
            return Ok(Self::UNKNOWN);
        }
        let split = s.len().saturating_sub(1);
        let (num, kind) = (s.get(..split), s.get(split..));
        let n: u8 = num
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| format!("bad rank {s:?}"))?;
        let rank = match kind.map(str::to_ascii_lowercase).as_deref() {
            Some("k") => Rank::kyu(n),
            Some("d") => Rank::dan(n),
            _ => None,
        };
        rank.ok_or_else(|| format!("bad rank {s:?}"))
    }
}

/// Which generation of human games the opponent imitates.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PlayStyle {
    /// Games played before engines changed how people play.
    PreAlphaZero,
    Modern,
}

/// Engine profile name for a style and rank, e.g. "preaz_5k" or "rank_3d".
pub fn human_profile(style: PlayStyle, rank: Rank) -> String {
    let prefix = match style {
        PlayStyle::PreAlphaZero => "preaz_",
        PlayStyle::Modern => "rank_",
    };
    format!("{prefix}{}", rank.to_string().to_ascii_lowercase())
}

/// Search effort for an opponent of `rank`. Below 5D the raw policy is enough.
pub fn max_visits_for_rank(rank: Rank) -> u32 {
    let four_dan = Rank(KYU_LEVELS + 4);
    if rank <= four_dan {
        1
    } else {
        3 * u32::from(rank.0 - four_dan.0)
    }
}

/// Query settings for an engine opponent imitating `rank`.
pub fn engine_opponent_query(style: PlayStyle, rank: Rank, rows: usize, cols: usize) -> AnalysisQuery {
    let mut query = AnalysisQuery::new(rows, cols);
    query.rules = DEFAULT_RULES.to_string();
    query.komi = DEFAULT_KOMI;
    query.max_visits = Some(max_visits_for_rank(rank));
    query.include_policy = true;
    let overrides = &mut query.override_settings;
    overrides.insert("humanSLProfile".into(), Value::from(human_profile(style, rank)));
    overrides.insert("ignorePreRootHistory".into(), Value::from(false));
    overrides.insert("rootNumSymmetriesToSample".into(), Value::from(2));
    query
}

/// Sample a move from a human policy of `rows * cols + 1` entries.
///
/// Entry `r * cols + c` is the point `(r, c)` and the last entry is a pass.
/// Values are clamped to `[0, 1]`, and negative entries mark illegal points.
/// Returns `None` when nothing has positive weight.
pub fn sample_policy_move(
    policy: &[f64],
    rows: usize,
    cols: usize,
    rng: &mut fastrand::Rng,
) -> Option<Point> {
    let weights: Vec<f64> = policy
        .iter()
        .take(rows * cols + 1)
        .map(|&p| if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) })
        .collect();
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return None;
    }

    let mut target = rng.f64() * total;
    let mut chosen = None;
    for (i, &w) in weights.iter().enumerate() {
        if w <= 0.0 {
            continue;
        }
        chosen = Some(i);
        if target < w {
            break;
        }
        target -= w;
    }
    chosen.map(|i| if i == rows * cols { PASS } else { (i / cols, i % cols) })
}

/// Decides when the engine opponent gives up.
///
/// The engine resigns once the human has led by a wide margin with a near
/// certain win for more than a fixed number of consecutive evaluations, and
/// only after enough moves.
#[derive(Clone, Debug)]
pub struct ResignPolicy {
    /// The human's color.
    player: Color,
    consecutive: u32,
}

impl ResignPolicy {
    pub fn new(player: Color) -> Self {
        Self { player, consecutive: 0 }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// Feed one evaluation. Returns true once the engine should resign.
    ///
    /// Score lead and winrate are from Black's perspective.
    pub fn check(&mut self, root: &RootInfo, moves_played: usize) -> bool {
        let (lead, winrate) = match self.player {
            Color::White => (-root.score_lead, 1.0 - root.winrate),
            _ => (root.score_lead, root.winrate),
        };
        if lead >= RESIGN_SCORE_LEAD && winrate >= RESIGN_WINRATE {
            self.consecutive += 1;
            moves_played >= RESIGN_MIN_MOVES && self.consecutive > RESIGN_CONSECUTIVE_TURNS
        } else {
            self.consecutive = 0;
            false
        }
    }
}

/// Final margin from a score lead: always a half point. Positive means Black wins.
pub fn count_result(score_lead: f64) -> f64 {
    (score_lead + 0.5).round() - 0.5
}

/// Winner for a margin returned by [`count_result`].
pub fn winner(margin: f64) -> Color {
    if margin > 0.0 {
        Color::Black
    } else if margin < 0.0 {
        Color::White
    } else {
        Color::Empty
    }
}

/// How a game ended.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum GameResult {
    Resign { winner: Color },
    /// Counted; `margin` is positive.
    Score { winner: Color, margin: f64 },
    Draw,
}

impl GameResult {
    /// Result of counting a final score lead, Black positive.
    pub fn counted(score_lead: f64) -> Self {
        let margin = count_result(score_lead);
        match winner(margin) {
            Color::Empty => GameResult::Draw,
            winner => GameResult::Score {
                winner,
                margin: margin.abs(),
            },
        }
    }

    pub fn winner(&self) -> Color {
        match *self {
            GameResult::Resign { winner } | GameResult::Score { winner, .. } => winner,
            GameResult::Draw => Color::Empty,
        }
    }
}

impl fmt::Display for GameResult {
    /// "B+R", "W+3.5" or "Draw".
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameResult::Resign { winner } => write!(f, "{}+R", winner.short_str()),
            GameResult::Score { winner, margin } => write!(f, "{}+{margin:.1}", winner.short_str()),
            GameResult::Draw => f.write_str("Draw"),
        }
    }
}

/// Counts consecutive passes; two in a row end the game.
#[derive(Clone, Debug, Default)]
pub struct PassCounter {
    consecutive: u32,
}

impl PassCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn record_move(&mut self) {
        self.consecutive = 0;
    }

    /// Returns true when this pass ends the game.
    pub fn record_pass(&mut self) -> bool {
        self.consecutive += 1;
        self.is_game_over()
    }

    /// Feed any move; returns true when the game is over.
    pub fn record(&mut self, pt: Point) -> bool {
        if pt == PASS {
            self.record_pass()
        } else {
            self.record_move();
            false
        }
    }

    pub fn is_game_over(&self) -> bool {
        self.consecutive >= GAME_END_PASSES
    }
}

/// Whole-game analysis query: the final record with every turn from 0 to the end.
pub fn review_query(base: &AnalysisQuery, moves: MoveList) -> AnalysisQuery {
    let mut query = base.clone();
    query.analyze_turns = (0..=moves.len()).collect();
    query.moves = moves;
    query.max_visits = None;
    query.include_policy = false;
    query.include_ownership = false;
    query.override_settings.clear();
    query
}

/// Point loss of each move of a reviewed game.
///
/// Turn `i` is the position after `i` moves. Move `i` (1-based) loses points
/// for its mover when the score lead moves against them between turns `i - 1`
/// and `i`. Results for the turns may arrive in any order.
#[derive(Clone, Debug)]
pub struct GameReview {
    moves: MoveList,
    leads: Vec<Option<f64>>,
}

impl GameReview {
    pub fn new(moves: MoveList) -> Self {
        let leads = vec![None; moves.len() + 1];
        Self { moves, leads }
    }

    /// Record the score lead for turn `turn`. Out-of-range turns are ignored.
    pub fn record(&mut self, turn: usize, score_lead: f64) {
        match self.leads.get_mut(turn) {
            Some(slot) => *slot = Some(score_lead),
            None => log::warn!("review: turn {turn} outside game of {} moves", self.moves.len()),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.leads.iter().all(Option::is_some)
    }

    pub fn score_lead(&self, turn: usize) -> Option<f64> {
        self.leads.get(turn).copied().flatten()
    }

    /// Points lost by move `n` (1-based), once both surrounding turns are known.
    pub fn point_loss(&self, n: usize) -> Option<f64> {
        let &(color, _) = self.moves.get(n.checked_sub(1)?)?;
        let before = self.score_lead(n - 1)?;
        let after = self.score_lead(n)?;
        let loss = match color {
            Color::Black if after < before => before - after,
            Color::White if after > before => after - before,
            _ => 0.0,
        };
        Some(loss)
    }

    /// Point loss of every move, in order.
    pub fn losses(&self) -> Vec<Option<f64>> {
        (1..=self.moves.len()).map(|n| self.point_loss(n)).collect()
    }

    pub fn moves(&self) -> &[Move] {
        &self.moves
    }
}

/// Sound to play for a move, by number of stones it captured.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CaptureSound {
    Stone,
    One,
    Few,
    Many,
}

impl CaptureSound {
    pub fn for_captures(n: usize) -> Self {
        match n {
            0 => Self::Stone,
            1 => Self::One,
            n if n <= CAPTURE_MANY_THRESHOLD => Self::Few,
            _ => Self::Many,
        }
    }
}
