//! Weiqi command-line front end.
//!
//! ## Usage
//!
//! - `weiqi` or `weiqi demo` - Play a short game and show the board
//! - `weiqi analyze --moves "D4 Q16"` - Analyze one position with the engine
//! - `weiqi review --moves "D4 Q16 ..."` - Point loss of every move of a game
//! - `weiqi solve problem.json` - Solve a problem, reading moves from stdin
//!
//! The engine paths come from flags or the `WEIQI_*` environment variables.

use std::cell::RefCell;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};

use weiqi::board::{parse_coord, str_coord};
use weiqi::client::AnalysisClient;
use weiqi::constants::{DEFAULT_BOARD_SIZE, DEFAULT_KOMI, DEFAULT_RULES, MAX_BOARD_SIZE};
use weiqi::engine::EngineConfig;
use weiqi::problem::{AnswerType, Problem, SolvePreset, SolveSession};
use weiqi::protocol::{AnalysisQuery, AnalysisResponse};
use weiqi::review::{CaptureSound, GameResult, GameReview, PassCounter, review_query};
use weiqi::timeline::{PlayMode, Timeline};

/// Weiqi: Go rules, game records and analysis engine client
#[derive(Parser)]
#[command(name = "weiqi")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a short scripted game and print the board
    Demo {
        #[arg(long, default_value_t = 9)]
        size: usize,
    },
    /// Analyze the position after the given moves
    Analyze {
        #[command(flatten)]
        engine: EngineArgs,
        #[command(flatten)]
        game: GameArgs,
        /// Maximum visits for the search
        #[arg(long)]
        visits: Option<u32>,
        /// Ask for ownership estimates
        #[arg(long)]
        ownership: bool,
    },
    /// Report the point loss of every move of a game
    Review {
        #[command(flatten)]
        engine: EngineArgs,
        #[command(flatten)]
        game: GameArgs,
    },
    /// Solve a problem interactively
    Solve {
        /// Problem file in JSON form
        problem: PathBuf,
        /// Seed for the opponent's replies
        #[arg(long)]
        seed: Option<u64>,
        /// Seconds to solve the problem, 0 for no limit
        #[arg(long, default_value_t = 0)]
        time_limit: u32,
    },
}

#[derive(Args)]
struct EngineArgs {
    /// Analysis engine binary
    #[arg(long, env = "WEIQI_ENGINE")]
    engine: PathBuf,
    /// Main network
    #[arg(long, env = "WEIQI_MODEL")]
    model: PathBuf,
    /// Human-style network
    #[arg(long, env = "WEIQI_HUMAN_MODEL")]
    human_model: PathBuf,
    /// Analysis configuration file
    #[arg(long, env = "WEIQI_CONFIG")]
    config: PathBuf,
    /// Give up waiting for the engine after this many seconds
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
}

impl EngineArgs {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            engine: self.engine.clone(),
            model: self.model.clone(),
            human_model: self.human_model.clone(),
            config: self.config.clone(),
        }
    }
}

#[derive(Args)]
struct GameArgs {
    /// Moves in engine coordinates, alternating from Black, e.g. "D4 Q16 pass"
    #[arg(long, default_value = "")]
    moves: String,
    #[arg(long, default_value_t = DEFAULT_BOARD_SIZE)]
    size: usize,
    #[arg(long, default_value_t = DEFAULT_KOMI)]
    komi: f64,
    #[arg(long, default_value = DEFAULT_RULES)]
    rules: String,
}

impl GameArgs {
    /// Replay the moves on a fresh record, rejecting illegal ones.
    fn timeline(&self) -> Result<Timeline> {
        check_size(self.size)?;
        let mut game = Timeline::new(self.size, self.size);
        for (i, token) in self.moves.split_whitespace().enumerate() {
            let pt = parse_coord(token, self.size, self.size)
                .ok_or_else(|| anyhow!("move {}: bad coordinate {token:?}", i + 1))?;
            game.play(pt, PlayMode::Mainline)
                .with_context(|| format!("move {} ({token})", i + 1))?;
        }
        Ok(game)
    }

    fn query(&self) -> AnalysisQuery {
        let mut query = AnalysisQuery::new(self.size, self.size);
        query.komi = self.komi;
        query.rules = self.rules.clone();
        query
    }
}

fn check_size(size: usize) -> Result<()> {
    if !(1..=MAX_BOARD_SIZE).contains(&size) {
        bail!("board size must be between 1 and {MAX_BOARD_SIZE}, got {size}");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, &cli.log_level),
    )
    .target(env_logger::Target::Stderr)
    .init();

    match cli.command {
        Some(Commands::Demo { size }) => run_demo(size),
        None => run_demo(9),
        Some(Commands::Analyze {
            engine,
            game,
            visits,
            ownership,
        }) => run_analyze(&engine, &game, visits, ownership),
        Some(Commands::Review { engine, game }) => run_review(&engine, &game),
        Some(Commands::Solve {
            problem,
            seed,
            time_limit,
        }) => run_solve(&problem, seed, time_limit),
    }
}

fn run_demo(size: usize) -> Result<()> {
    check_size(size)?;
    if size < 5 {
        bail!("the demo needs at least a 5x5 board");
    }
    println!("Weiqi: {size}x{size} demo\n");

    let mut game = Timeline::new(size, size);
    // Black surrounds the White stone at (1, 1) and captures it.
    let script = [(0, 1), (1, 1), (1, 0), (4, 4), (2, 1), (4, 3), (1, 2)];
    for pt in script {
        let color = game.to_play();
        let removed = game.play(pt, PlayMode::Variation)?;
        println!(
            "{color} {} captures {} ({:?})",
            str_coord(pt, size),
            removed.len(),
            CaptureSound::for_captures(removed.len())
        );
    }
    println!("\n{}", game.board());

    game.undo_one();
    println!("After undo, {} to play:\n{}", game.to_play(), game.board());
    Ok(())
}

/// Run `query` to completion, collecting every response in arrival order.
fn run_query(engine: &EngineArgs, query: &AnalysisQuery) -> Result<Vec<AnalysisResponse>> {
    let mut client = AnalysisClient::new(engine.engine_config());
    client.start().context("starting analysis engine")?;

    let responses = Rc::new(RefCell::new(Vec::new()));
    let failure = Rc::new(RefCell::new(None));
    let id = {
        let responses = responses.clone();
        let failure = failure.clone();
        client.submit(query, move |result| match result {
            Ok(response) => responses.borrow_mut().push(response),
            Err(e) => *failure.borrow_mut() = Some(e),
        })?
    };

    let deadline = Instant::now() + Duration::from_secs(engine.timeout_secs);
    while client.is_pending(&id) {
        let now = Instant::now();
        if now >= deadline {
            client.cancel(&id)?;
            bail!("no complete answer within {}s", engine.timeout_secs);
        }
        client.poll_timeout(deadline - now);
    }
    client.stop();

    if let Some(e) = failure.borrow_mut().take() {
        return Err(e).context("analysis failed");
    }
    Ok(responses.take())
}

fn run_analyze(
    engine: &EngineArgs,
    game: &GameArgs,
    visits: Option<u32>,
    ownership: bool,
) -> Result<()> {
    let timeline = game.timeline()?;
    let mut query = game.query();
    query.moves = timeline.current_moves();
    query.max_visits = visits;
    query.include_ownership = ownership;

    let responses = run_query(engine, &query)?;
    let last = responses
        .iter()
        .rev()
        .find(|r| !r.is_during_search)
        .ok_or_else(|| anyhow!("engine sent no final response"))?;

    println!("{}", timeline.board());
    println!(
        "{} to play: winrate {:.1}%, score lead {:+.1}, {} visits",
        last.root_info.current_player,
        last.root_info.winrate * 100.0,
        last.root_info.score_lead,
        last.root_info.visits
    );
    for info in &last.move_infos {
        let pv: Vec<String> = info.pv.iter().map(|&pt| str_coord(pt, game.size)).collect();
        println!(
            "{:>2}. {:<4} {:>6} visits  {:5.1}%  {:+6.1}  {}",
            info.order + 1,
            str_coord(info.point, game.size),
            info.visits,
            info.winrate * 100.0,
            info.score_lead,
            pv.join(" ")
        );
    }
    Ok(())
}

fn run_review(engine: &EngineArgs, game: &GameArgs) -> Result<()> {
    let timeline = game.timeline()?;
    let moves = timeline.current_moves();
    if moves.is_empty() {
        bail!("nothing to review: no moves given");
    }
    let query = review_query(&game.query(), moves.clone());

    let mut review = GameReview::new(moves.clone());
    for response in run_query(engine, &query)? {
        if !response.is_during_search {
            review.record(response.turn_number, response.root_info.score_lead);
        }
    }

    for (i, (&(color, pt), loss)) in moves.iter().zip(review.losses()).enumerate() {
        let loss = loss.map_or_else(|| "-".to_string(), |l| format!("{:.2}", -l));
        println!("{:>3}. {} {:<4} {loss}", i + 1, color.short_str(), str_coord(pt, game.size));
    }
    let mut passes = PassCounter::new();
    let ended = moves.iter().fold(false, |_, &(_, pt)| passes.record(pt));
    if let Some(lead) = review.score_lead(moves.len()) {
        let state = if ended { "counted" } else { "estimated" };
        println!("Result ({state}): {}", GameResult::counted(lead));
    }
    Ok(())
}

fn run_solve(path: &Path, seed: Option<u64>, time_limit: u32) -> Result<()> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let problem = Problem::from_json(&json).with_context(|| format!("loading {}", path.display()))?;
    let rows = problem.rows;
    let cols = problem.cols;
    let mut rng = seed.map_or_else(fastrand::Rng::new, fastrand::Rng::with_seed);
    let preset = SolvePreset {
        time_limit_secs: time_limit,
        max_tasks: 1,
        max_errors: Some(0),
    };
    let mut session = SolveSession::with_preset(problem, preset)?;

    let prompt = if session.problem().is_pick() { "pick" } else { "play" };
    if !session.problem().description.is_empty() {
        println!("{} ({})", session.problem().description, session.problem().rank);
    }
    println!("{}\n{} to {prompt}.", session.timeline().board(), session.solver());
    if !session.problem().tree.comment.is_empty() {
        println!("{}", session.problem().tree.comment);
    }

    let mut lines = io::stdin().lock().lines();
    let mut clock = Instant::now();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let Some(line) = lines.next().transpose()? else {
            break;
        };
        let waited = u32::try_from(clock.elapsed().as_secs()).unwrap_or(u32::MAX);
        clock += Duration::from_secs(waited.into());
        if session.elapse(waited).is_some() {
            println!("time is up: WRONG (type \"reset\" to try again)");
        }
        let line = line.trim();
        match line {
            "" => continue,
            "quit" => break,
            "reset" => {
                session.reset();
                println!("{}", session.timeline().board());
                continue;
            }
            _ => {}
        }
        let Some(pt) = parse_coord(line, rows, cols) else {
            println!("bad coordinate {line:?}");
            continue;
        };

        let verdict = if session.problem().is_pick() {
            session.pick(pt)
        } else {
            session.play(pt).and_then(|verdict| match verdict {
                Some(v) => Ok(Some(v)),
                None => {
                    let (reply, verdict) = session.respond(&mut rng)?;
                    println!("{} {}", session.solver().opponent(), str_coord(reply, rows));
                    Ok(verdict)
                }
            })
        };
        match verdict {
            Ok(verdict) => {
                if !session.comment().is_empty() {
                    println!("{}", session.comment());
                }
                if let Some(answer) = verdict {
                    let word = if answer == AnswerType::Wrong { "WRONG" } else { "CORRECT" };
                    println!("{word} (type \"reset\" to try again)");
                }
                if !session.problem().is_pick() {
                    println!("{}", session.timeline().board());
                }
            }
            Err(e) => println!("{e}"),
        }
    }

    let stats = session.stats();
    let verdict = if !session.is_complete() {
        "unfinished"
    } else if session.passed() {
        "passed"
    } else {
        "failed"
    };
    println!(
        "solved {} / {} ({}%), {verdict}",
        stats.solved(),
        stats.attempted,
        stats.percent()
    );
    Ok(())
}
