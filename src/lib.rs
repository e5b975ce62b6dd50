//! Weiqi: Go rules, game records and an analysis engine client.
//!
//! This crate holds the non-graphical core of a Go study tool: a board that
//! enforces captures, suicide and positional superko on any size up to 19x19,
//! a navigable game record with variations, and a client that drives an
//! external analysis engine over line-delimited JSON.
//!
//! ## Modules
//!
//! - [`constants`] - Board limits, protocol constants and gameplay thresholds
//! - [`board`] - Stone placement, captures, superko and undo
//! - [`timeline`] - Mainline, variation branch and navigation
//! - [`protocol`] - Query encoding and response decoding
//! - [`engine`] - Launching the engine subprocess and reading its output
//! - [`client`] - Query ids, callbacks, cancellation and dispatch
//! - [`review`] - Engine opponent settings, resignation and game review
//! - [`problem`] - Problems with variation trees and solving sessions
//!
//! ## Example
//!
//! ```
//! use weiqi::board::{Color, parse_coord, str_coord};
//! use weiqi::protocol::{AnalysisQuery, encode_query};
//! use weiqi::timeline::{PlayMode, Timeline};
//!
//! let mut game = Timeline::new(19, 19);
//! let d4 = parse_coord("D4", 19, 19).unwrap();
//! game.play(d4, PlayMode::Variation).unwrap();
//! assert_eq!(game.board().at(d4), Color::Black);
//! assert_eq!(str_coord(d4, 19), "D4");
//!
//! let mut query = AnalysisQuery::new(19, 19);
//! query.moves = game.current_moves();
//! let line = encode_query("0", &query).unwrap();
//! assert!(line.contains(r#"["B","D4"]"#));
//! ```

pub mod board;
pub mod client;
pub mod constants;
pub mod engine;
pub mod problem;
pub mod protocol;
pub mod review;
pub mod timeline;
