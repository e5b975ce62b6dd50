//! Integration tests for weiqi
//!
//! Scenario tests across modules: board rules seen through the timeline, the
//! analysis client driven by a scripted engine, and problem solving sessions.

use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use crossbeam_channel::{Sender, unbounded};

use weiqi::board::{Board, Color, IllegalMove, Point, neighbors, parse_coord, str_coord};
use weiqi::client::{AnalysisClient, EngineError};
use weiqi::constants::PASS;
use weiqi::engine::{Connection, EngineConfig, Launcher, ReadEvent, Transport};
use weiqi::problem::{AnswerType, Problem, SolveSession};
use weiqi::protocol::{AnalysisQuery, AnalysisResponse};
use weiqi::review::{GameReview, review_query};
use weiqi::timeline::{PlayMode, Timeline};

// =============================================================================
// Helper functions
// =============================================================================

/// Play alternating moves given in engine coordinates.
fn play_game(size: usize, moves: &[&str]) -> Timeline {
    let mut game = Timeline::new(size, size);
    for mv in moves {
        let pt = parse_coord(mv, size, size).unwrap();
        game.play(pt, PlayMode::Variation).unwrap();
    }
    game
}

/// Every group on the board has at least one liberty.
fn all_groups_have_liberties(board: &Board) -> bool {
    (0..board.rows()).all(|r| {
        (0..board.cols()).all(|c| {
            let color = board.at((r, c));
            color == Color::Empty || group_has_liberty(board, (r, c), color)
        })
    })
}

fn group_has_liberty(board: &Board, start: Point, color: Color) -> bool {
    let mut stack = vec![start];
    let mut seen = vec![start];
    while let Some(pt) = stack.pop() {
        for n in neighbors(board.rows(), board.cols(), pt) {
            match board.at(n) {
                Color::Empty => return true,
                c if c == color && !seen.contains(&n) => {
                    seen.push(n);
                    stack.push(n);
                }
                _ => {}
            }
        }
    }
    false
}

// =============================================================================
// Board rules
// =============================================================================

#[test]
fn test_four_stones_no_capture() {
    let mut board = Board::new(19, 19);
    for (color, pt) in [
        (Color::Black, (3, 3)),
        (Color::White, (3, 4)),
        (Color::Black, (4, 4)),
        (Color::White, (4, 3)),
    ] {
        assert!(board.place(color, pt).unwrap().is_empty());
    }
    assert_eq!(board.count(Color::Black) + board.count(Color::White), 4);
    assert_eq!(board.seen_count(), 5);
    assert_eq!(board.place(Color::Black, (3, 4)), Err(IllegalMove::Occupied));
    assert_eq!(board.seen_count(), 5);
}

#[test]
fn test_corner_capture() {
    let mut board = Board::new(9, 9);
    board.place(Color::White, (0, 0)).unwrap();
    board.place(Color::Black, (0, 1)).unwrap();
    let removed = board.place(Color::Black, (1, 0)).unwrap();
    assert_eq!(removed, vec![(0, 0)]);
    assert_eq!(board.at((0, 0)), Color::Empty);
    // White cannot retake: the point has no liberties.
    assert_eq!(board.place(Color::White, (0, 0)), Err(IllegalMove::Suicide));
}

#[test]
fn test_undo_everything_restores_empty_board() {
    let mut board = Board::new(9, 9);
    let moves = [
        (Color::White, (0, 0)),
        (Color::Black, (0, 1)),
        (Color::Black, (1, 0)),
        (Color::White, (4, 4)),
        (Color::Black, (8, 8)),
    ];
    for (color, pt) in moves {
        board.place(color, pt).unwrap();
    }
    while board.undo().is_some() {}
    assert_eq!(board.hash(), 0);
    assert_eq!(board.seen_count(), 1);
    assert_eq!(board.count(Color::Black), 0);
    assert_eq!(board.count(Color::White), 0);
    // The same moves are legal again.
    for (color, pt) in moves {
        board.place(color, pt).unwrap();
    }
}

#[test]
fn test_no_group_without_liberties_after_random_play() {
    let mut rng = fastrand::Rng::with_seed(42);
    for size in [5, 9, 13] {
        let mut game = Timeline::new(size, size);
        for _ in 0..size * size * 2 {
            let pt = (rng.usize(..size), rng.usize(..size));
            let before = game.board().hash();
            match game.play(pt, PlayMode::Variation) {
                Ok(_) => assert!(all_groups_have_liberties(game.board())),
                Err(_) => assert_eq!(game.board().hash(), before),
            }
        }
        let applied = game.current_moves();
        let replay = Board::with_setup(size, size, &applied);
        assert!(replay.is_ok(), "recorded moves replay cleanly");
    }
}

#[test]
fn test_ko_cannot_be_retaken_at_once() {
    // Classic ko shape around D4/E4 on 9x9.
    let mut game = play_game(9, &["D5", "E5", "C4", "F4", "D3", "E3", "pass", "D4", "E4"]);
    assert_eq!(game.board().at(parse_coord("D4", 9, 9).unwrap()), Color::Empty);
    let retake = parse_coord("D4", 9, 9).unwrap();
    assert_eq!(game.play(retake, PlayMode::Variation), Err(IllegalMove::Superko));
    // After a ko threat elsewhere the retake becomes legal.
    game.play(parse_coord("A9", 9, 9).unwrap(), PlayMode::Variation)
        .unwrap();
    game.play(parse_coord("J1", 9, 9).unwrap(), PlayMode::Variation)
        .unwrap();
    assert_eq!(game.play(retake, PlayMode::Variation).unwrap().len(), 1);
}

// =============================================================================
// Timeline
// =============================================================================

#[test]
fn test_variation_then_back_to_mainline() {
    let mut game = play_game(19, &["Q16", "D4", "Q4", "D16"]);
    let mainline = game.mainline().to_vec();
    game.goto_move(2);
    game.play(parse_coord("C3", 19, 19).unwrap(), PlayMode::Variation)
        .unwrap();
    assert_eq!(game.current_moves().len(), 3);
    assert_eq!(game.mainline(), mainline.as_slice());

    assert!(game.goto_mainline());
    assert!(game.goto_end());
    assert_eq!(game.current_moves(), mainline);
    assert_eq!(str_coord(game.last_move().unwrap().1, 19), "D16");
}

#[test]
fn test_current_moves_feed_the_query() {
    let mut game = play_game(9, &["E5", "C3"]);
    game.pass(PlayMode::Variation);
    let mut query = AnalysisQuery::new(9, 9);
    query.moves = game.current_moves();
    let line = weiqi::protocol::encode_query("0", &query).unwrap();
    assert!(line.contains(r#""moves":[["B","E5"],["W","C3"],["B","pass"]]"#));
    assert_eq!(game.last_move(), Some((Color::Black, PASS)));
}

// =============================================================================
// Analysis client against a scripted engine
// =============================================================================

#[derive(Clone, Default)]
struct Wire(Rc<RefCell<Vec<String>>>);

struct ScriptedTransport(Wire);

impl Transport for ScriptedTransport {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.0.0.borrow_mut().push(String::from_utf8_lossy(bytes).into_owned());
        Ok(())
    }

    fn terminate(&mut self) {}
}

struct ScriptedEngine {
    wire: Wire,
    events: crossbeam_channel::Receiver<ReadEvent>,
}

impl Launcher for ScriptedEngine {
    fn launch(&self) -> io::Result<Connection> {
        Ok(Connection {
            transport: Box::new(ScriptedTransport(self.wire.clone())),
            events: self.events.clone(),
        })
    }
}

fn scripted_client() -> (AnalysisClient<ScriptedEngine>, Wire, Sender<ReadEvent>) {
    let (tx, rx) = unbounded();
    let wire = Wire::default();
    let mut client = AnalysisClient::with_launcher(ScriptedEngine {
        wire: wire.clone(),
        events: rx,
    });
    client.start().unwrap();
    (client, wire, tx)
}

fn final_response(id: &str, turn: usize, score_lead: f64) -> ReadEvent {
    let line = format!(
        concat!(
            r#"{{"id":"{}","isDuringSearch":false,"turnNumber":{},"#,
            r#""rootInfo":{{"currentPlayer":"B","visits":50,"winrate":0.5,"scoreLead":{}}},"#,
            r#""moveInfos":[{{"order":0,"move":"C3","pv":["C3"],"visits":50,"winrate":0.5,"scoreLead":{}}}]}}"#,
            "\n"
        ),
        id, turn, score_lead, score_lead
    );
    ReadEvent::Data(line.into_bytes())
}

type Log = Rc<RefCell<Vec<Result<AnalysisResponse, String>>>>;

fn recorder(log: &Log) -> impl FnMut(Result<AnalysisResponse, EngineError>) + 'static {
    let log = log.clone();
    move |r| log.borrow_mut().push(r.map_err(|e| e.to_string()))
}

#[test]
fn test_cancelled_query_never_calls_back() {
    let (mut client, wire, tx) = scripted_client();
    let log: Log = Rc::default();
    let id = client.submit(&AnalysisQuery::new(9, 9), recorder(&log)).unwrap();
    client.cancel(&id).unwrap();
    tx.send(final_response(&id, 0, 1.0)).unwrap();
    client.poll();
    assert!(log.borrow().is_empty());
    assert_eq!(wire.0.borrow().len(), 2);
}

#[test]
fn test_superseding_query_pattern() {
    let (mut client, _wire, tx) = scripted_client();
    let old: Log = Rc::default();
    let new: Log = Rc::default();
    let first = client.submit(&AnalysisQuery::new(9, 9), recorder(&old)).unwrap();
    client.cancel(&first).unwrap();
    let second = client.submit(&AnalysisQuery::new(9, 9), recorder(&new)).unwrap();
    assert_ne!(first, second);

    tx.send(final_response(&first, 0, 1.0)).unwrap();
    tx.send(final_response(&second, 0, 2.0)).unwrap();
    client.poll();
    assert!(old.borrow().is_empty());
    let new = new.borrow();
    assert_eq!(new.len(), 1);
    let response = new[0].as_ref().unwrap();
    assert_eq!(response.root_info.score_lead, 2.0);
    assert_eq!(response.move_infos[0].point, (6, 2));
}

#[test]
fn test_whole_game_review() {
    let (mut client, _wire, tx) = scripted_client();
    let game = play_game(9, &["E5", "C3", "A1"]);
    let moves = game.current_moves();
    let query = review_query(&AnalysisQuery::new(9, 9), moves.clone());
    let log: Log = Rc::default();
    let id = client.submit(&query, recorder(&log)).unwrap();

    // Turns may arrive in any order.
    for (turn, lead) in [(2, 1.5), (0, 0.5), (3, -2.0), (1, 2.0)] {
        tx.send(final_response(&id, turn, lead)).unwrap();
    }
    client.poll();
    assert!(!client.is_pending(&id));

    let mut review = GameReview::new(moves);
    for response in log.borrow().iter().flatten() {
        review.record(response.turn_number, response.root_info.score_lead);
    }
    assert!(review.is_complete());
    assert_eq!(review.losses(), vec![Some(0.0), Some(0.0), Some(3.5)]);
}

#[test]
fn test_engine_exit_fails_pending_query() {
    let (mut client, _wire, tx) = scripted_client();
    let log: Log = Rc::default();
    client.submit(&AnalysisQuery::new(9, 9), recorder(&log)).unwrap();
    drop(tx);
    client.poll();
    assert_eq!(*log.borrow(), vec![Err("engine process exited".to_string())]);
    assert!(!client.is_running());
}

#[test]
fn test_missing_engine_binary() {
    let mut client = AnalysisClient::new(EngineConfig {
        engine: "/nonexistent/analysis-engine".into(),
        model: "model.bin.gz".into(),
        human_model: "human.bin.gz".into(),
        config: "analysis.cfg".into(),
    });
    assert!(matches!(client.start(), Err(EngineError::Io(_))));
    assert!(!client.is_running());
    let log: Log = Rc::default();
    assert!(matches!(
        client.submit(&AnalysisQuery::default(), recorder(&log)),
        Err(EngineError::NotRunning)
    ));
}

// =============================================================================
// Problems
// =============================================================================

#[test]
fn test_solve_capture_problem() {
    // Black to capture the White stone at "bb" in a 4x4 corner.
    let json = r#"{
        "rows": 4, "cols": 4, "first_to_play": "B",
        "black": ["ba", "ab", "cb"], "white": ["bb"],
        "vtree": {"n": {"bc": {"a": 0, "c": "Captured."}}}
    }"#;
    let problem = Problem::from_json(json).unwrap();
    let mut session = SolveSession::new(problem).unwrap();
    assert_eq!(session.timeline().board().at((1, 1)), Color::White);

    assert_eq!(session.play((3, 3)), Ok(Some(AnswerType::Wrong)));
    session.reset();
    assert_eq!(session.play((2, 1)), Ok(Some(AnswerType::Correct)));
    assert_eq!(session.timeline().board().at((1, 1)), Color::Empty);
    assert_eq!(session.comment(), "Captured.");
    assert_eq!(session.result(), Some(AnswerType::Wrong));
    assert_eq!(session.stats().attempted, 1);
}
