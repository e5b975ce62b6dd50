//! Constants for board geometry, the analysis protocol, and engine defaults.
//!
//! Board dimensions are chosen at run time (rows and columns independently),
//! so only the upper bound lives here.

use crate::board::Point;

// =============================================================================
// Board Geometry
// =============================================================================

/// Largest supported board side. Boards may be rectangular up to 19x19.
pub const MAX_BOARD_SIZE: usize = 19;

/// Standard board side used when nothing else is requested.
pub const DEFAULT_BOARD_SIZE: usize = 19;

/// Reserved point standing for a pass. Never on any board.
pub const PASS: Point = (usize::MAX, usize::MAX);

/// Column letters for engine coordinates. `I` is skipped by convention.
pub const COLUMN_LETTERS: &[u8; 25] = b"ABCDEFGHJKLMNOPQRSTUVWXYZ";

/// Seed for the per-board Zobrist key table.
pub const ZOBRIST_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

// =============================================================================
// Analysis Protocol
// =============================================================================

/// Literal used for a pass in engine coordinates.
pub const PASS_LITERAL: &str = "pass";

/// Suffix appended to a query id to form the id of its terminate message.
pub const TERMINATE_ID_SUFFIX: &str = "_term";

/// Size of a single read from the engine's output stream.
pub const READ_CHUNK_SIZE: usize = 8 << 10;

// =============================================================================
// Engine Defaults
// =============================================================================

/// Default rule set sent with each query.
pub const DEFAULT_RULES: &str = "chinese";

/// Default komi (compensation points for White).
pub const DEFAULT_KOMI: f64 = 7.5;

// =============================================================================
// Play-vs-engine Parameters
// =============================================================================

/// Score lead (in points) the engine's side must hold before it considers resigning.
pub const RESIGN_SCORE_LEAD: f64 = 40.0;

/// Win rate the engine's side must hold before it considers resigning.
pub const RESIGN_WINRATE: f64 = 0.99;

/// Number of consecutive hopeless evaluations required to resign.
pub const RESIGN_CONSECUTIVE_TURNS: u32 = 20;

/// The engine never resigns before this many moves have been played.
pub const RESIGN_MIN_MOVES: usize = 90;

/// Consecutive passes that end a game.
pub const GAME_END_PASSES: u32 = 2;

/// Captures above this count use the "many stones" sound.
pub const CAPTURE_MANY_THRESHOLD: usize = 5;
