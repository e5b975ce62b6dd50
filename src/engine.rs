//! Analysis engine subprocess.
//!
//! [`ProcessLauncher`] starts the engine binary with its analysis arguments and
//! returns a [`Connection`]: a [`Transport`] for writing queries and a channel
//! of raw output chunks. A background thread does the blocking reads, so the
//! owner only ever polls the channel. Standard error is drained by a second
//! thread and logged at debug level.

use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread;

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::constants::READ_CHUNK_SIZE;

/// Paths needed to launch the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub engine: PathBuf,
    pub model: PathBuf,
    pub human_model: PathBuf,
    pub config: PathBuf,
}

impl EngineConfig {
    /// Command-line arguments selecting analysis mode.
    pub fn args(&self) -> Vec<OsString> {
        vec![
            "analysis".into(),
            "-config".into(),
            self.config.clone().into_os_string(),
            "-model".into(),
            self.model.clone().into_os_string(),
            "-human-model".into(),
            self.human_model.clone().into_os_string(),
        ]
    }
}

/// Output of the engine as seen by the reader thread.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadEvent {
    /// Bytes from one read. May hold partial or several lines.
    Data(Vec<u8>),
    /// End of output: the engine exited or closed its stdout.
    Closed,
}

/// Write side of an engine connection.
pub trait Transport {
    /// Write `bytes` in full and flush.
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Kill the engine. Must be safe to call more than once.
    fn terminate(&mut self);
}

/// A live engine: where to write, and where its output arrives.
pub struct Connection {
    pub transport: Box<dyn Transport>,
    pub events: Receiver<ReadEvent>,
}

/// Something that can start an engine.
pub trait Launcher {
    fn launch(&self) -> io::Result<Connection>;
}

/// Launches the engine as a child process.
#[derive(Clone, Debug)]
pub struct ProcessLauncher {
    config: EngineConfig,
}

impl ProcessLauncher {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self) -> io::Result<Connection> {
        let child = Command::new(&self.config.engine)
            .args(self.config.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        log::info!(
            "engine started: pid={} path={}",
            child.id(),
            self.config.engine.display()
        );

        // From here on the process is killed if anything below fails.
        let mut process = EngineProcess { child, stdin: None };
        process.stdin = process.child.stdin.take();
        let stdout = process
            .child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("engine stdout not captured"))?;

        let (tx, rx) = unbounded();
        spawn_reader(stdout, tx)?;
        if let Some(stderr) = process.child.stderr.take() {
            spawn_stderr_logger(stderr)?;
        }

        Ok(Connection {
            transport: Box::new(process),
            events: rx,
        })
    }
}

/// A running engine child process.
pub struct EngineProcess {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl Transport for EngineProcess {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "engine stdin closed"))?;
        stdin.write_all(bytes)?;
        stdin.flush()
    }

    fn terminate(&mut self) {
        self.stdin = None;
        if let Err(e) = self.child.kill() {
            log::debug!("engine kill: {e}");
        }
        match self.child.wait() {
            Ok(status) => log::info!("engine stopped: {status}"),
            Err(e) => log::warn!("engine wait failed: {e}"),
        }
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            self.terminate();
        }
    }
}

/// Forward raw chunks from `src` until end of stream, then send `Closed`.
pub fn spawn_reader<R>(mut src: R, tx: Sender<ReadEvent>) -> io::Result<thread::JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name("engine-stdout".into())
        .spawn(move || {
            let mut buf = vec![0u8; READ_CHUNK_SIZE];
            loop {
                match src.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(ReadEvent::Data(buf[..n].to_vec())).is_err() {
                            // Receiver gone: the client was stopped.
                            return;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        log::warn!("engine: read failed: {e}");
                        break;
                    }
                }
            }
            let _ = tx.send(ReadEvent::Closed);
        })
}

fn spawn_stderr_logger<R>(src: R) -> io::Result<thread::JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name("engine-stderr".into())
        .spawn(move || {
            for line in BufReader::new(src).lines().map_while(Result::ok) {
                log::debug!("engine stderr: {line}");
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn config(engine: &str) -> EngineConfig {
        EngineConfig {
            engine: engine.into(),
            model: "main.bin.gz".into(),
            human_model: "human.bin.gz".into(),
            config: "analysis.cfg".into(),
        }
    }

    #[test]
    fn test_args() {
        let args = config("katago").args();
        let args: Vec<_> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            [
                "analysis",
                "-config",
                "analysis.cfg",
                "-model",
                "main.bin.gz",
                "-human-model",
                "human.bin.gz"
            ]
        );
    }

    #[test]
    fn test_launch_missing_binary_fails() {
        let launcher = ProcessLauncher::new(config("/nonexistent/engine-binary"));
        assert!(launcher.launch().is_err());
    }

    #[test]
    fn test_reader_forwards_then_closes() {
        let (tx, rx) = unbounded();
        let handle = spawn_reader(Cursor::new(b"{\"id\":\"0\"}\n".to_vec()), tx).unwrap();
        handle.join().unwrap();

        let mut data = Vec::new();
        let mut closed = false;
        for event in rx.try_iter() {
            match event {
                ReadEvent::Data(bytes) => data.extend(bytes),
                ReadEvent::Closed => closed = true,
            }
        }
        assert_eq!(data, b"{\"id\":\"0\"}\n");
        assert!(closed);
    }
}
