//! Analysis engine client.
//!
//! The client owns one engine connection and a table of pending queries. Each
//! query gets a fresh id and a callback. Engine output is consumed by
//! [`AnalysisClient::poll`], which never blocks: it drains whatever output has
//! arrived, reassembles lines, and invokes callbacks on the caller's thread.
//!
//! ## Dispatch rules
//!
//! - error with a known id: the callback gets `Err`, the query is removed
//! - warning: logged only
//! - analysis result with a known id: the callback gets `Ok`; the query is
//!   removed once its last final (`isDuringSearch == false`) result arrives
//! - unknown or cancelled id: discarded
//! - malformed line: logged and skipped
//!
//! If the engine exits, every pending callback receives
//! [`EngineError::ProcessExited`] once and the table is cleared. After
//! [`AnalysisClient::stop`] or [`AnalysisClient::cancel`] no callback of the
//! affected queries runs again.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use thiserror::Error;

use crate::engine::{EngineConfig, Launcher, ProcessLauncher, ReadEvent, Transport};
use crate::protocol::{
    AnalysisQuery, AnalysisResponse, EngineMessage, LineBuffer, classify, decode_response,
    encode_query, encode_terminate,
};

/// Identifier of a submitted query.
pub type QueryId = String;

/// Receives every response of one query, then possibly a terminal error.
pub type QueryCallback = Box<dyn FnMut(Result<AnalysisResponse, EngineError>)>;

/// Errors of the analysis client.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is not running")]
    NotRunning,
    #[error("engine i/o: {0}")]
    Io(#[from] io::Error),
    #[error("encoding query: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("engine error: {0}")]
    Engine(String),
    #[error("engine process exited")]
    ProcessExited,
}

struct PendingQuery {
    callback: QueryCallback,
    rows: usize,
    cols: usize,
    /// Final responses still expected before the query is complete.
    remaining: usize,
}

struct Session {
    transport: Box<dyn Transport>,
    events: Receiver<ReadEvent>,
    lines: LineBuffer,
}

/// Client for a line-delimited JSON analysis engine.
pub struct AnalysisClient<L: Launcher = ProcessLauncher> {
    launcher: L,
    session: Option<Session>,
    next_id: u64,
    pending: HashMap<QueryId, PendingQuery>,
}

impl AnalysisClient<ProcessLauncher> {
    /// A client that runs the engine described by `config` as a subprocess.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_launcher(ProcessLauncher::new(config))
    }
}

impl<L: Launcher> AnalysisClient<L> {
    pub fn with_launcher(launcher: L) -> Self {
        Self {
            launcher,
            session: None,
            next_id: 0,
            pending: HashMap::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// Number of queries still awaiting responses.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    /// Launch the engine. Does nothing if it is already running.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.session.is_some() {
            return Ok(());
        }
        let conn = self.launcher.launch()?;
        self.session = Some(Session {
            transport: conn.transport,
            events: conn.events,
            lines: LineBuffer::new(),
        });
        Ok(())
    }

    /// Kill the engine. Pending queries are dropped without a callback.
    pub fn stop(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.transport.terminate();
        }
        if !self.pending.is_empty() {
            log::debug!("engine: dropping {} pending queries", self.pending.len());
            self.pending.clear();
        }
    }

    /// Send a query and register `callback` for its responses.
    ///
    /// A write failure is returned here and nothing is registered.
    pub fn submit<F>(&mut self, query: &AnalysisQuery, callback: F) -> Result<QueryId, EngineError>
    where
        F: FnMut(Result<AnalysisResponse, EngineError>) + 'static,
    {
        let session = self.session.as_mut().ok_or(EngineError::NotRunning)?;

        let id = self.next_id.to_string();
        self.next_id += 1;
        let line = encode_query(&id, query)?;
        session.transport.send(line.as_bytes())?;

        log::debug!(
            "engine: query {id} submitted: moves={} turns={:?} max_visits={:?}",
            query.moves.len(),
            query.analyze_turns,
            query.max_visits
        );
        self.pending.insert(
            id.clone(),
            PendingQuery {
                callback: Box::new(callback),
                rows: query.rows,
                cols: query.cols,
                remaining: query.expected_responses(),
            },
        );
        Ok(id)
    }

    /// Stop delivering responses for `id` and ask the engine to stop working on it.
    ///
    /// Unknown, finished and already cancelled ids are ignored. The entry is
    /// removed even if the terminate message cannot be written.
    pub fn cancel(&mut self, id: &str) -> Result<(), EngineError> {
        if self.pending.remove(id).is_none() {
            return Ok(());
        }
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let line = encode_terminate(id)?;
        session.transport.send(line.as_bytes())?;
        log::debug!("engine: query {id} cancelled");
        Ok(())
    }

    /// Process all engine output that has already arrived. Never blocks.
    ///
    /// Returns the number of lines dispatched.
    pub fn poll(&mut self) -> usize {
        let mut dispatched = 0;
        loop {
            let event = match &self.session {
                Some(session) => session.events.try_recv(),
                None => return dispatched,
            };
            match event {
                Ok(event) => dispatched += self.handle_event(event),
                Err(TryRecvError::Empty) => return dispatched,
                Err(TryRecvError::Disconnected) => {
                    self.handle_exit();
                    return dispatched;
                }
            }
        }
    }

    /// Like [`poll`](Self::poll), but wait up to `timeout` for output first.
    pub fn poll_timeout(&mut self, timeout: Duration) -> usize {
        let event = match &self.session {
            Some(session) => session.events.recv_timeout(timeout),
            None => return 0,
        };
        match event {
            Ok(event) => self.handle_event(event) + self.poll(),
            Err(RecvTimeoutError::Timeout) => 0,
            Err(RecvTimeoutError::Disconnected) => {
                self.handle_exit();
                0
            }
        }
    }

    fn handle_event(&mut self, event: ReadEvent) -> usize {
        match event {
            ReadEvent::Data(bytes) => {
                let lines = match self.session.as_mut() {
                    Some(session) => session.lines.push(&bytes),
                    None => return 0,
                };
                for line in &lines {
                    self.dispatch_line(line);
                }
                lines.len()
            }
            ReadEvent::Closed => {
                self.handle_exit();
                0
            }
        }
    }

    fn handle_exit(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.transport.terminate();
        }
        log::error!(
            "engine: process exited with {} pending queries",
            self.pending.len()
        );
        for (_, mut query) in self.pending.drain() {
            (query.callback)(Err(EngineError::ProcessExited));
        }
    }

    fn dispatch_line(&mut self, line: &str) {
        let message = match classify(line) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("engine: skipping malformed line: {e}");
                return;
            }
        };

        match message {
            EngineMessage::Error {
                id: Some(id),
                message,
            } => match self.pending.remove(&id) {
                Some(mut query) => (query.callback)(Err(EngineError::Engine(message))),
                None => log::warn!("engine: error for inactive query {id}: {message}"),
            },
            EngineMessage::Error { id: None, message } => log::error!("engine: {message}"),
            EngineMessage::Warning(warning) => log::warn!("engine: {warning}"),
            EngineMessage::Response { id, body } => {
                let Some(query) = self.pending.get_mut(&id) else {
                    log::debug!("engine: discarding response for inactive query {id}");
                    return;
                };
                let response = match decode_response(body, query.rows, query.cols) {
                    Ok(response) => response,
                    Err(e) => {
                        log::warn!("engine: skipping undecodable response for query {id}: {e}");
                        return;
                    }
                };
                let finished = if response.is_during_search {
                    false
                } else {
                    query.remaining = query.remaining.saturating_sub(1);
                    query.remaining == 0
                };
                (query.callback)(Ok(response));
                if finished {
                    self.pending.remove(&id);
                }
            }
            EngineMessage::Other(value) => log::debug!("engine: ignoring {value}"),
        }
    }
}

impl<L: Launcher> Drop for AnalysisClient<L> {
    fn drop(&mut self) {
        self.stop();
    }
}
