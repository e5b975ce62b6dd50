//! Wire format of the analysis engine.
//!
//! The engine reads one JSON query per line on its standard input and writes
//! one JSON object per line on its standard output. This module turns an
//! [`AnalysisQuery`] into such a line, classifies incoming lines, and decodes
//! analysis results into [`AnalysisResponse`] values.
//!
//! ## Outbound query
//!
//! ```text
//! {"id":"0","rules":"chinese","komi":7.5,"boardXSize":19,"boardYSize":19,
//!  "includePolicy":false,"includeOwnership":false,"overrideSettings":{},
//!  "moves":[["B","D4"],["W","pass"]],"maxVisits":10}
//! ```
//!
//! ## Inbound lines
//!
//! - analysis result: `id`, `isDuringSearch`, `turnNumber`, `rootInfo`, `moveInfos`
//! - error: `error`, usually with `id`
//! - warning: `warning`, never answered to a query
//!
//! Coordinates are column letter plus row number counted from the bottom edge
//! (see [`str_coord`]).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::board::{Color, MoveList, Point, parse_coord, str_coord};
use crate::constants::{DEFAULT_BOARD_SIZE, DEFAULT_KOMI, DEFAULT_RULES, TERMINATE_ID_SUFFIX};

/// Errors decoding an engine line.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bad coordinate {0:?}")]
    Coordinate(String),
    #[error("bad player {0:?}")]
    Player(String),
}

/// Settings and position for one analysis request.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisQuery {
    pub rules: String,
    pub komi: f64,
    pub rows: usize,
    pub cols: usize,
    /// Stones on the board before the first move (not part of the history).
    pub initial_stones: MoveList,
    /// Moves leading to the position to analyze.
    pub moves: MoveList,
    /// Turn numbers to report on, for a whole-game review. Empty means the
    /// final position only.
    pub analyze_turns: Vec<usize>,
    pub max_visits: Option<u32>,
    pub include_policy: bool,
    pub include_ownership: bool,
    /// Engine-specific parameter overrides, passed through untouched.
    pub override_settings: Map<String, Value>,
}

impl Default for AnalysisQuery {
    fn default() -> Self {
        Self::new(DEFAULT_BOARD_SIZE, DEFAULT_BOARD_SIZE)
    }
}

impl AnalysisQuery {
    /// A query with default rules and komi for an empty `rows` x `cols` board.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rules: DEFAULT_RULES.to_string(),
            komi: DEFAULT_KOMI,
            rows,
            cols,
            initial_stones: Vec::new(),
            moves: Vec::new(),
            analyze_turns: Vec::new(),
            max_visits: None,
            include_policy: false,
            include_ownership: false,
            override_settings: Map::new(),
        }
    }

    /// Number of final (not during-search) responses the engine sends for this query.
    pub fn expected_responses(&self) -> usize {
        self.analyze_turns.len().max(1)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryMessage<'a> {
    id: &'a str,
    rules: &'a str,
    komi: f64,
    board_x_size: usize,
    board_y_size: usize,
    include_policy: bool,
    include_ownership: bool,
    override_settings: &'a Map<String, Value>,
    moves: Vec<[String; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_visits: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    initial_stones: Vec<[String; 2]>,
    #[serde(rename = "analyze_turns", skip_serializing_if = "<[usize]>::is_empty")]
    analyze_turns: &'a [usize],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TerminateMessage<'a> {
    id: String,
    action: &'static str,
    terminate_id: &'a str,
}

fn encode_moves(moves: &MoveList, rows: usize) -> Vec<[String; 2]> {
    moves
        .iter()
        .map(|&(color, pt)| [color.short_str().to_string(), str_coord(pt, rows)])
        .collect()
}

/// Serialize a query as one newline-terminated line.
pub fn encode_query(id: &str, query: &AnalysisQuery) -> Result<String, serde_json::Error> {
    let msg = QueryMessage {
        id,
        rules: &query.rules,
        komi: query.komi,
        board_x_size: query.cols,
        board_y_size: query.rows,
        include_policy: query.include_policy,
        include_ownership: query.include_ownership,
        override_settings: &query.override_settings,
        moves: encode_moves(&query.moves, query.rows),
        max_visits: query.max_visits,
        initial_stones: encode_moves(&query.initial_stones, query.rows),
        analyze_turns: &query.analyze_turns,
    };
    let mut line = serde_json::to_string(&msg)?;
    line.push('\n');
    Ok(line)
}

/// Serialize the control message that stops query `id`.
pub fn encode_terminate(id: &str) -> Result<String, serde_json::Error> {
    let msg = TerminateMessage {
        id: format!("{id}{TERMINATE_ID_SUFFIX}"),
        action: "terminate",
        terminate_id: id,
    };
    let mut line = serde_json::to_string(&msg)?;
    line.push('\n');
    Ok(line)
}

/// Root evaluation of a position. Score lead is from Black's perspective.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RootInfo {
    pub current_player: Color,
    pub visits: u64,
    pub winrate: f64,
    pub score_lead: f64,
}

/// One candidate move with its principal variation.
#[derive(Clone, Debug, PartialEq)]
pub struct MoveInfo {
    pub order: u32,
    pub point: Point,
    pub pv: Vec<Point>,
    pub visits: u64,
    pub winrate: f64,
    pub score_lead: f64,
}

/// A decoded analysis result.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AnalysisResponse {
    pub turn_number: usize,
    /// More responses for the same query follow.
    pub is_during_search: bool,
    pub root_info: RootInfo,
    /// Candidates, best first.
    pub move_infos: Vec<MoveInfo>,
    pub policy: Vec<f64>,
    pub human_policy: Vec<f64>,
    pub ownership: Vec<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseMessage {
    is_during_search: bool,
    turn_number: usize,
    root_info: RootInfoMessage,
    move_infos: Vec<MoveInfoMessage>,
    #[serde(default)]
    policy: Vec<f64>,
    #[serde(default)]
    human_policy: Vec<f64>,
    #[serde(default)]
    ownership: Vec<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RootInfoMessage {
    #[serde(default)]
    current_player: Option<String>,
    visits: u64,
    winrate: f64,
    score_lead: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveInfoMessage {
    order: u32,
    #[serde(rename = "move")]
    point: String,
    pv: Vec<String>,
    visits: u64,
    winrate: f64,
    score_lead: f64,
}

/// One classified engine output line.
#[derive(Debug, PartialEq)]
pub enum EngineMessage {
    /// Engine-reported failure, terminal for `id` when present.
    Error { id: Option<String>, message: String },
    Warning(String),
    /// Anything carrying an id: an analysis result to decode.
    Response { id: String, body: Value },
    /// Valid JSON that is none of the above.
    Other(Value),
}

/// Parse and classify one engine output line.
pub fn classify(line: &str) -> Result<EngineMessage, ProtocolError> {
    let value: Value = serde_json::from_str(line)?;
    let id = value.get("id").and_then(id_string);

    if let Some(err) = value.get("error") {
        return Ok(EngineMessage::Error {
            id,
            message: text(err),
        });
    }
    if let Some(warning) = value.get("warning") {
        return Ok(EngineMessage::Warning(text(warning)));
    }
    match id {
        Some(id) => Ok(EngineMessage::Response { id, body: value }),
        None => Ok(EngineMessage::Other(value)),
    }
}

fn id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn decode_point(s: &str, rows: usize, cols: usize) -> Result<Point, ProtocolError> {
    parse_coord(s, rows, cols).ok_or_else(|| ProtocolError::Coordinate(s.to_string()))
}

/// Decode an analysis result for a `rows` x `cols` board.
pub fn decode_response(
    body: Value,
    rows: usize,
    cols: usize,
) -> Result<AnalysisResponse, ProtocolError> {
    let msg: ResponseMessage = serde_json::from_value(body)?;

    let current_player = match msg.root_info.current_player.as_deref() {
        None => Color::Empty,
        Some(s) => Color::from_short(s).ok_or_else(|| ProtocolError::Player(s.to_string()))?,
    };

    let move_infos = msg
        .move_infos
        .into_iter()
        .map(|mi| {
            Ok(MoveInfo {
                order: mi.order,
                point: decode_point(&mi.point, rows, cols)?,
                pv: mi
                    .pv
                    .iter()
                    .map(|p| decode_point(p, rows, cols))
                    .collect::<Result<_, _>>()?,
                visits: mi.visits,
                winrate: mi.winrate,
                score_lead: mi.score_lead,
            })
        })
        .collect::<Result<Vec<_>, ProtocolError>>()?;

    Ok(AnalysisResponse {
        turn_number: msg.turn_number,
        is_during_search: msg.is_during_search,
        root_info: RootInfo {
            current_player,
            visits: msg.root_info.visits,
            winrate: msg.root_info.winrate,
            score_lead: msg.root_info.score_lead,
        },
        move_infos,
        policy: msg.policy,
        human_policy: msg.human_policy,
        ownership: msg.ownership,
    })
}

/// Reassembles newline-delimited lines from arbitrarily split reads.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completes, without terminators.
    ///
    /// Blank lines are dropped, as are lines that are not valid UTF-8.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let mut line = &self.pending[start..end];
            if let [rest @ .., b'\r'] = line {
                line = rest;
            }
            if !line.is_empty() {
                match std::str::from_utf8(line) {
                    Ok(s) => lines.push(s.to_owned()),
                    Err(e) => log::warn!("engine: dropping non-utf8 line: {e}"),
                }
            }
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// Bytes of an incomplete line still held.
    pub fn partial_len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PASS;
    use serde_json::json;

    const RESPONSE: &str = r#"{"id":"3","isDuringSearch":false,"turnNumber":2,"rootInfo":{"currentPlayer":"B","visits":120,"winrate":0.46,"scoreLead":-1.5},"moveInfos":[{"order":0,"move":"Q16","pv":["Q16","D16","pass"],"visits":80,"winrate":0.47,"scoreLead":-1.2},{"order":1,"move":"C3","pv":["C3"],"visits":40,"winrate":0.44,"scoreLead":-2.0}]}"#;

    #[test]
    fn test_encode_query_required_fields() {
        let mut query = AnalysisQuery::new(19, 19);
        query.moves = vec![(Color::Black, (15, 3)), (Color::White, PASS)];
        let line = encode_query("7", &query).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let v: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(v["id"], "7");
        assert_eq!(v["rules"], "chinese");
        assert_eq!(v["komi"], 7.5);
        assert_eq!(v["boardXSize"], 19);
        assert_eq!(v["boardYSize"], 19);
        assert_eq!(v["includePolicy"], false);
        assert_eq!(v["includeOwnership"], false);
        assert_eq!(v["overrideSettings"], json!({}));
        assert_eq!(v["moves"], json!([["B", "D4"], ["W", "pass"]]));
        assert!(v.get("maxVisits").is_none());
        assert!(v.get("initialStones").is_none());
        assert!(v.get("analyze_turns").is_none());
    }

    #[test]
    fn test_encode_query_optional_fields() {
        let mut query = AnalysisQuery::new(9, 13);
        query.max_visits = Some(25);
        query.initial_stones = vec![(Color::White, (0, 12))];
        query.analyze_turns = vec![0, 1];
        query
            .override_settings
            .insert("humanSLProfile".into(), json!("rank_5k"));
        let line = encode_query("0", &query).unwrap();
        let v: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["boardXSize"], 13);
        assert_eq!(v["boardYSize"], 9);
        assert_eq!(v["maxVisits"], 25);
        assert_eq!(v["initialStones"], json!([["W", "N9"]]));
        assert_eq!(v["analyze_turns"], json!([0, 1]));
        assert_eq!(v["overrideSettings"]["humanSLProfile"], "rank_5k");
    }

    #[test]
    fn test_encode_terminate() {
        let line = encode_terminate("4").unwrap();
        let v: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v, json!({"id": "4_term", "action": "terminate", "terminateId": "4"}));
    }

    #[test]
    fn test_decode_response() {
        let EngineMessage::Response { id, body } = classify(RESPONSE).unwrap() else {
            panic!("expected a response");
        };
        assert_eq!(id, "3");
        let resp = decode_response(body, 19, 19).unwrap();
        assert_eq!(resp.turn_number, 2);
        assert!(!resp.is_during_search);
        assert_eq!(resp.root_info.current_player, Color::Black);
        assert_eq!(resp.root_info.visits, 120);
        assert_eq!(resp.root_info.score_lead, -1.5);
        assert_eq!(resp.move_infos.len(), 2);
        assert_eq!(resp.move_infos[0].point, (3, 15));
        assert_eq!(resp.move_infos[0].pv, vec![(3, 15), (3, 3), PASS]);
        assert_eq!(resp.move_infos[1].point, (16, 2));
        assert!(resp.policy.is_empty());
        assert!(resp.ownership.is_empty());
    }

    #[test]
    fn test_decode_rejects_bad_coordinate() {
        let body = json!({
            "id": "1", "isDuringSearch": false, "turnNumber": 0,
            "rootInfo": {"visits": 1, "winrate": 0.5, "scoreLead": 0.0},
            "moveInfos": [{"order": 0, "move": "T19", "pv": [], "visits": 1, "winrate": 0.5, "scoreLead": 0.0}]
        });
        assert!(matches!(
            decode_response(body, 9, 9),
            Err(ProtocolError::Coordinate(_))
        ));
    }

    #[test]
    fn test_decode_missing_field() {
        let body = json!({"id": "1", "turnNumber": 0});
        assert!(matches!(decode_response(body, 9, 9), Err(ProtocolError::Json(_))));
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            classify(r#"{"id":"2","error":"bad query"}"#).unwrap(),
            EngineMessage::Error {
                id: Some("2".into()),
                message: "bad query".into()
            }
        );
        assert_eq!(
            classify(r#"{"warning":"unused field","field":"x"}"#).unwrap(),
            EngineMessage::Warning("unused field".into())
        );
        assert!(matches!(classify(r#"{"foo":1}"#).unwrap(), EngineMessage::Other(_)));
        assert!(classify("{not json").is_err());
    }

    #[test]
    fn test_line_buffer_split_reads() {
        let mut buf = LineBuffer::new();
        let line = format!("{RESPONSE}\n");
        let bytes = line.as_bytes();
        assert!(buf.push(&bytes[..10]).is_empty());
        assert!(buf.push(&bytes[10..200]).is_empty());
        let lines = buf.push(&bytes[200..]);
        assert_eq!(lines, vec![RESPONSE.to_string()]);
        assert_eq!(buf.partial_len(), 0);
    }

    #[test]
    fn test_line_buffer_many_lines_in_one_read() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"{\"a\":1}\r\n\n{\"b\":2}\n{\"c\"");
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
        assert_eq!(buf.partial_len(), 4);
        assert_eq!(buf.push(b":3}\n"), vec!["{\"c\":3}"]);
    }

    #[test]
    fn test_line_buffer_drops_invalid_utf8() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.push(b"\xff\xfe\n{}\n"), vec!["{}"]);
    }
}
