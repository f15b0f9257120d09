//! Supervision of a `parity-relay` child process.
//!
//! The test process plays the bridged application: it writes payloads to the
//! relay's stdin and reads forwarded commands from its stdout. Both output
//! streams are recorded for later inspection, and the bound port is read from
//! the `listening on <addr>` line the relay logs to stderr.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::SocketAddr;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::{RelayProcessConfig, DEFAULT_HOST};
use crate::error::{HarnessError, HarnessResult};

/// Origin stream for captured relay output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Single captured line with its source.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub stream: LogStream,
    pub line: String,
}

/// A `parity-relay` child process, with this process standing in for the
/// bridged application on its stdin and stdout.
pub struct RelayProcess {
    child: Child,
    address: SocketAddr,
    stdin: Option<ChildStdin>,
    stdout_rx: mpsc::Receiver<String>,
    log_buffer: Arc<Mutex<Vec<LogLine>>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl RelayProcess {
    /// Launch the relay and wait for it to report its listen address.
    pub fn spawn(config: RelayProcessConfig) -> HarnessResult<Self> {
        let port = config.port.to_string();
        let mut command = Command::new(&config.binary_path);
        command
            .args(["--host", DEFAULT_HOST, "--port", port.as_str()])
            .env("RUST_LOG", "info")
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &config.working_directory {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|err| {
            HarnessError::relay_start(format!("{}: {err}", config.binary_path.display()))
        })?;
        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.kill();
            return Err(HarnessError::relay_start("relay stdio was not piped"));
        };

        let log_buffer = Arc::new(Mutex::new(Vec::new()));
        let (stdout_tx, stdout_rx) = mpsc::channel();
        let (stderr_tx, stderr_rx) = mpsc::channel();
        let workers = vec![
            capture(stdout, LogStream::Stdout, stdout_tx, log_buffer.clone()),
            capture(stderr, LogStream::Stderr, stderr_tx, log_buffer.clone()),
        ];

        // Stderr stays captured after startup; only the channel is dropped.
        let address = match await_bind(&mut child, &stderr_rx, config.startup_timeout) {
            Ok(address) => address,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err);
            }
        };
        debug!(%address, "relay process listening");

        Ok(Self {
            child,
            address,
            stdin: Some(stdin),
            stdout_rx,
            log_buffer,
            workers,
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Read the startup line and check it is `expected`.
    pub fn read_ready_signal(&self, expected: &str, timeout: Duration) -> HarnessResult<()> {
        let line = self.read_line(timeout)?;
        if line == expected {
            Ok(())
        } else {
            Err(HarnessError::relay_start(format!(
                "expected ready signal {expected:?}, got {line:?}"
            )))
        }
    }

    /// Write one line to the relay's stdin, as the bridged application would.
    pub fn write_line(&mut self, text: &str) -> HarnessResult<()> {
        let stdin = self.stdin.as_mut().ok_or(HarnessError::NotConnected)?;
        stdin.write_all(text.as_bytes())?;
        stdin.write_all(b"\n")?;
        stdin.flush()?;
        Ok(())
    }

    /// Next line the relay wrote to stdout.
    pub fn read_line(&self, timeout: Duration) -> HarnessResult<String> {
        match self.stdout_rx.recv_timeout(timeout) {
            Ok(line) => Ok(line),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(HarnessError::Timeout(timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(HarnessError::Disconnected),
        }
    }

    pub fn logs(&self) -> Vec<LogLine> {
        self.log_buffer
            .lock()
            .map(|buffer| buffer.clone())
            .unwrap_or_default()
    }

    /// Close stdin, stop the child and join the reader threads.
    pub fn shutdown(mut self) -> HarnessResult<()> {
        self.terminate()
    }

    fn terminate(&mut self) -> HarnessResult<()> {
        self.stdin.take();
        if self.child.try_wait()?.is_none() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl Drop for RelayProcess {
    fn drop(&mut self) {
        let _ = self.terminate();
    }
}

/// Record every line of `reader` in the shared log and pass it on to `tx`.
/// Recording continues after the receiver goes away.
fn capture<R: Read + Send + 'static>(
    reader: R,
    stream: LogStream,
    tx: mpsc::Sender<String>,
    log: Arc<Mutex<Vec<LogLine>>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for line in BufReader::new(reader).lines().map_while(Result::ok) {
            if let Ok(mut guard) = log.lock() {
                guard.push(LogLine {
                    stream,
                    line: line.clone(),
                });
            }
            let _ = tx.send(line);
        }
    })
}

/// Watch the relay's stderr until it logs its bound address.
fn await_bind(
    child: &mut Child,
    stderr: &mpsc::Receiver<String>,
    timeout: Duration,
) -> HarnessResult<SocketAddr> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Err(HarnessError::RelayExited(status));
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(HarnessError::StartupTimeout(timeout));
        }
        match stderr.recv_timeout(remaining.min(Duration::from_millis(50))) {
            Ok(line) => {
                if let Some(address) = parse_listen_line(&line) {
                    return Ok(address);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            // Stderr closed without an address; the exit status arrives shortly.
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                thread::sleep(Duration::from_millis(10));
            }
        }
    }
}

/// Address from a `... listening on <addr>` log line, ignoring trailing fields.
pub fn parse_listen_line(line: &str) -> Option<SocketAddr> {
    const MARKER: &str = "listening on";
    let start = line.to_ascii_lowercase().find(MARKER)? + MARKER.len();
    line.get(start..)?.split_whitespace().next()?.parse().ok()
}
