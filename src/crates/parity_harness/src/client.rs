//! TCP client for the relay's line protocol.
//!
//! A [`Client`] frames newline-terminated JSON payloads off one socket and
//! folds each into its [`Session`], which keeps the last combat section
//! across payloads that omit it. [`GameLink`] is the seam the director and
//! resolver drive, so tests can substitute a scripted peer.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::protocol::{Command, CommandSet, Payload};
use crate::snapshot::Snapshot;

const RECV_CHUNK: usize = 16 * 1024;

/// Connection-scoped state mirrored from the most recent payloads.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Most recent raw payload, exactly as decoded.
    pub last_raw: Option<Value>,
    /// Most recent effective snapshot.
    ///
    /// Combat data is sticky: a payload without a combat section keeps the
    /// previous snapshot's combat view, since some screen transitions omit it.
    pub last_snapshot: Option<Snapshot>,
    pub ready_for_command: bool,
    pub in_game: bool,
    pub last_error: Option<String>,
    pub available_commands: Vec<String>,
}

impl Session {
    pub fn commands(&self) -> CommandSet<'_> {
        CommandSet(&self.available_commands)
    }

    /// Whether the latest raw payload itself carried a combat section, as
    /// opposed to one carried over from an earlier payload.
    pub fn payload_has_combat(&self) -> bool {
        self.last_raw
            .as_ref()
            .and_then(|raw| raw.get("game_state"))
            .and_then(|state| state.get("combat_state"))
            .and_then(Value::as_object)
            .map(|combat| !combat.is_empty())
            .unwrap_or(false)
    }

    /// Fold one payload into the session and return the effective snapshot.
    pub fn absorb(&mut self, raw: Value, payload: Payload) -> Option<Snapshot> {
        self.ready_for_command = payload.ready_for_command;
        self.in_game = payload.in_game;
        self.last_error = payload.error.clone();
        if let Some(error) = &self.last_error {
            debug!(%error, "payload reported an error");
        }

        if let Some(mut snapshot) = payload.snapshot() {
            if snapshot.combat.is_none() {
                snapshot.combat = self
                    .last_snapshot
                    .take()
                    .and_then(|previous| previous.combat);
            }
            self.last_snapshot = Some(snapshot);
        }

        self.available_commands = payload.available_commands;
        self.last_raw = Some(raw);
        self.last_snapshot.clone()
    }
}

/// Request/response operations the resolution engine and director need from
/// a connection to the live application.
pub trait GameLink {
    fn send(&mut self, command: &Command) -> HarnessResult<()>;

    /// Receive and absorb one payload, returning the effective snapshot.
    fn wait_for_state(&mut self, timeout: Option<Duration>) -> HarnessResult<Option<Snapshot>>;

    /// Discard buffered lines until `window` passes without one arriving.
    fn drain(&mut self, window: Duration) -> HarnessResult<usize>;

    fn session(&self) -> &Session;
}

/// Blocking line-protocol client for the relay.
#[derive(Debug)]
pub struct Client {
    config: ClientConfig,
    stream: Option<TcpStream>,
    buffer: Vec<u8>,
    session: Session,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            stream: None,
            buffer: Vec::new(),
            session: Session::default(),
        }
    }

    /// Create a client and connect using the config's timeout and retry interval.
    pub fn attach(config: ClientConfig) -> HarnessResult<Self> {
        let mut client = Self::new(config);
        let (timeout, retry) = (client.config.connect_timeout, client.config.retry_interval);
        client.connect(timeout, retry)?;
        Ok(client)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Connect to the relay, retrying every `retry_interval` until `timeout`.
    ///
    /// A relay that is not listening yet is expected at start-up.
    pub fn connect(&mut self, timeout: Duration, retry_interval: Duration) -> HarnessResult<()> {
        let deadline = Instant::now() + timeout;
        let host = self.config.host.clone();
        let port = self.config.port;

        loop {
            match TcpStream::connect((host.as_str(), port)) {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    self.stream = Some(stream);
                    self.buffer.clear();
                    self.session = Session::default();
                    info!(%host, port, "connected to relay");
                    return Ok(());
                }
                Err(err) => debug!(%host, port, error = %err, "relay not reachable yet"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(HarnessError::Connect {
                    host,
                    port,
                    timeout,
                });
            }
            thread::sleep(retry_interval.min(deadline - now));
        }
    }

    /// Close the connection and discard the session.
    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        self.buffer.clear();
        self.session = Session::default();
    }

    /// Write `text` plus a newline in a single write.
    pub fn send_command(&mut self, text: &str) -> HarnessResult<()> {
        let stream = self.stream.as_mut().ok_or(HarnessError::NotConnected)?;
        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');
        debug!(command = text, "send");
        stream
            .write_all(line.as_bytes())
            .and_then(|_| stream.flush())
            .map_err(map_socket_error)
    }

    pub fn send(&mut self, command: &Command) -> HarnessResult<()> {
        self.send_command(&command.to_string())
    }

    /// Return exactly one line, keeping any remainder buffered.
    ///
    /// `None` blocks indefinitely. A zero-byte read means the relay closed
    /// the connection.
    pub fn receive_line(&mut self, timeout: Option<Duration>) -> HarnessResult<String> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut chunk = vec![0u8; RECV_CHUNK];

        loop {
            if let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
                debug!(bytes = text.len(), "received line");
                return Ok(text);
            }

            let stream = self.stream.as_mut().ok_or(HarnessError::NotConnected)?;
            let read_timeout = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(HarnessError::Timeout(timeout.unwrap_or_default()));
                    }
                    Some(remaining)
                }
                None => None,
            };
            stream.set_read_timeout(read_timeout)?;

            match stream.read(&mut chunk) {
                Ok(0) => return Err(HarnessError::Disconnected),
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(HarnessError::Timeout(timeout.unwrap_or_default()));
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(map_socket_error(err)),
            }
        }
    }

    /// Receive one payload, fold it into the session and return the
    /// effective snapshot.
    pub fn wait_for_state(&mut self, timeout: Option<Duration>) -> HarnessResult<Option<Snapshot>> {
        let line = self.receive_line(timeout)?;
        let (raw, payload) = Payload::parse(&line)?;
        Ok(self.session.absorb(raw, payload))
    }

    pub fn drain(&mut self, window: Duration) -> HarnessResult<usize> {
        let mut drained = 0;
        loop {
            match self.receive_line(Some(window)) {
                Ok(_) => drained += 1,
                Err(HarnessError::Timeout(_)) => break,
                Err(err) => return Err(err),
            }
        }
        if drained > 0 {
            debug!(drained, "discarded stale lines");
        }
        Ok(drained)
    }

    /// Play a card; `hand_index` is 0-based.
    pub fn play_card(&mut self, hand_index: usize, target: Option<usize>) -> HarnessResult<()> {
        self.send(&Command::play(hand_index, target))
    }

    pub fn end_turn(&mut self) -> HarnessResult<()> {
        self.send(&Command::End)
    }

    pub fn choose(&mut self, index: usize) -> HarnessResult<()> {
        self.send(&Command::Choose(index))
    }

    pub fn proceed(&mut self) -> HarnessResult<()> {
        self.send(&Command::Proceed)
    }

    pub fn confirm(&mut self) -> HarnessResult<()> {
        self.send(&Command::Confirm)
    }

    pub fn start_game(
        &mut self,
        character: &str,
        ascension: u32,
        seed: Option<&str>,
    ) -> HarnessResult<()> {
        self.send(&Command::Start {
            character: character.to_string(),
            ascension,
            seed: seed.map(str::to_string),
        })
    }

    pub fn signal_ready(&mut self) -> HarnessResult<()> {
        self.send(&Command::Ready)
    }

    pub fn request_state(&mut self) -> HarnessResult<()> {
        self.send(&Command::State)
    }

    /// Overwrite live state directly. `state` must be a JSON object.
    pub fn set_state(&mut self, state: &Value) -> HarnessResult<()> {
        self.send(&Command::Set(state.clone()))
    }

    pub fn abandon(&mut self) -> HarnessResult<()> {
        self.send(&Command::Abandon)
    }
}

impl GameLink for Client {
    fn send(&mut self, command: &Command) -> HarnessResult<()> {
        Client::send(self, command)
    }

    fn wait_for_state(&mut self, timeout: Option<Duration>) -> HarnessResult<Option<Snapshot>> {
        Client::wait_for_state(self, timeout)
    }

    fn drain(&mut self, window: Duration) -> HarnessResult<usize> {
        Client::drain(self, window)
    }

    fn session(&self) -> &Session {
        &self.session
    }
}

fn map_socket_error(err: std::io::Error) -> HarnessError {
    match err.kind() {
        ErrorKind::BrokenPipe
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::UnexpectedEof => HarnessError::Disconnected,
        _ => HarnessError::Io(err),
    }
}

static LIVE_CLIENT: OnceLock<Option<Mutex<Client>>> = OnceLock::new();

/// Shared connection to the live relay for a whole test binary.
///
/// The first call tries to connect once (host and port from the
/// environment, three second timeout). Returns `None` when the relay is not
/// reachable so dependent tests can skip instead of failing.
pub fn live_client() -> Option<MutexGuard<'static, Client>> {
    LIVE_CLIENT
        .get_or_init(|| {
            let config = ClientConfig::from_env().with_connect_timeout(Duration::from_secs(3));
            match Client::attach(config) {
                Ok(client) => Some(Mutex::new(client)),
                Err(err) => {
                    warn!(error = %err, "live relay unavailable; dependent tests will skip");
                    None
                }
            }
        })
        .as_ref()
        .map(|client| client.lock().unwrap_or_else(PoisonError::into_inner))
}
