//! Bridge between a process that only speaks over two local text streams and
//! a single detachable TCP client.
//!
//! Three threads share one [`ConnectionSlot`]: an acceptor (newest connection
//! wins), a local-input to socket forwarder, and a socket to local-output
//! forwarder. The slot's mutex is only held while swapping or cloning the
//! handle, never across socket I/O.

use std::io::{BufRead, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::error::{HarnessError, HarnessResult};

#[derive(Debug, Default)]
struct SlotState {
    generation: u64,
    stream: Option<TcpStream>,
}

/// The single "current connection" shared by the relay threads.
///
/// Every install or clear bumps a generation counter so a thread holding a
/// cloned handle can tell whether its connection is still the current one.
#[derive(Debug, Default)]
pub struct ConnectionSlot {
    inner: Mutex<SlotState>,
}

impl ConnectionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SlotState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install a new connection, closing any previous one.
    ///
    /// Returns the new generation and whether a connection was evicted.
    pub fn install(&self, stream: TcpStream) -> (u64, bool) {
        let (generation, evicted) = {
            let mut state = self.state();
            state.generation += 1;
            (state.generation, state.stream.replace(stream))
        };
        let had_previous = evicted.is_some();
        if let Some(old) = evicted {
            let _ = old.shutdown(Shutdown::Both);
        }
        (generation, had_previous)
    }

    /// Remove the current connection, leaving the slot empty.
    pub fn take(&self) -> Option<TcpStream> {
        let mut state = self.state();
        let stream = state.stream.take();
        if stream.is_some() {
            state.generation += 1;
        }
        stream
    }

    /// Run `f` against the current connection while holding the lock.
    ///
    /// `f` must not block; clone the handle and do I/O outside instead.
    pub fn with_current<T>(&self, f: impl FnOnce(u64, &TcpStream) -> T) -> Option<T> {
        let state = self.state();
        state.stream.as_ref().map(|stream| f(state.generation, stream))
    }

    /// A cloned handle to the current connection plus its generation.
    pub fn current(&self) -> Option<(u64, TcpStream)> {
        self.with_current(|generation, stream| {
            stream.try_clone().ok().map(|clone| (generation, clone))
        })
        .flatten()
    }

    /// Drop the connection if it is still the one from `generation`.
    pub fn clear(&self, generation: u64) -> bool {
        let mut state = self.state();
        if state.generation != generation || state.stream.is_none() {
            return false;
        }
        state.generation += 1;
        if let Some(stream) = state.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        true
    }

    pub fn generation(&self) -> u64 {
        self.state().generation
    }

    pub fn is_attached(&self) -> bool {
        self.state().stream.is_some()
    }
}

/// Handle to a running relay.
pub struct RelayHandle {
    local_addr: SocketAddr,
    slot: Arc<ConnectionSlot>,
    running: Arc<AtomicBool>,
    acceptor: Option<thread::JoinHandle<()>>,
    downstream: Option<thread::JoinHandle<()>>,
}

impl RelayHandle {
    /// Address the listener actually bound (resolves port `0`).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_attached(&self) -> bool {
        self.slot.is_attached()
    }

    /// Bumped on every attach and detach.
    pub fn generation(&self) -> u64 {
        self.slot.generation()
    }

    /// Block until the relay stops. For a relay process this is forever.
    pub fn wait(mut self) {
        if let Some(handle) = self.acceptor.take() {
            let _ = handle.join();
        }
        self.stop();
    }

    /// Stop accepting, drop the current client and join the worker threads.
    ///
    /// The local-input forwarder exits on its own once its stream closes.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(stream) = self.slot.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        if let Some(handle) = self.acceptor.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.downstream.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start a relay between `input`/`output` and a TCP listener.
///
/// The ready signal is written to `output` before binding; a bind failure is
/// fatal and returned to the caller.
pub fn spawn<R, W>(config: &RelayConfig, input: R, mut output: W) -> HarnessResult<RelayHandle>
where
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    output.write_all(config.ready_signal.as_bytes())?;
    output.write_all(b"\n")?;
    output.flush()?;

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr).map_err(|source| HarnessError::Bind {
        addr: addr.clone(),
        source,
    })?;
    let local_addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;
    info!("listening on {local_addr}");

    let slot = Arc::new(ConnectionSlot::new());
    let running = Arc::new(AtomicBool::new(true));

    let acceptor = {
        let slot = slot.clone();
        let running = running.clone();
        let backoff = config.idle_backoff;
        thread::Builder::new()
            .name("relay-accept".into())
            .spawn(move || accept_clients(listener, &slot, &running, backoff))?
    };

    {
        let slot = slot.clone();
        thread::Builder::new()
            .name("relay-upstream".into())
            .spawn(move || forward_local_input(input, &slot))?;
    }

    let downstream = {
        let slot = slot.clone();
        let running = running.clone();
        let poll = config.poll_interval;
        let backoff = config.idle_backoff;
        thread::Builder::new()
            .name("relay-downstream".into())
            .spawn(move || forward_client_output(output, &slot, &running, poll, backoff))?
    };

    Ok(RelayHandle {
        local_addr,
        slot,
        running,
        acceptor: Some(acceptor),
        downstream: Some(downstream),
    })
}

fn accept_clients(
    listener: TcpListener,
    slot: &ConnectionSlot,
    running: &AtomicBool,
    backoff: Duration,
) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(err) = stream.set_nonblocking(false) {
                    warn!(%peer, error = %err, "rejecting client");
                    continue;
                }
                let _ = stream.set_nodelay(true);
                let (generation, evicted) = slot.install(stream);
                info!(%peer, generation, evicted, "client attached");
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => thread::sleep(backoff),
            Err(err) => {
                warn!(error = %err, "accept failed");
                thread::sleep(backoff);
            }
        }
    }
}

/// Forward each local input line to the attached client, or drop it.
fn forward_local_input<R: BufRead>(mut input: R, slot: &ConnectionSlot) {
    let mut line = Vec::new();
    loop {
        line.clear();
        match input.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(error = %err, "local input failed");
                break;
            }
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        if line.is_empty() {
            continue;
        }
        line.push(b'\n');

        match slot.current() {
            Some((generation, mut stream)) => {
                if let Err(err) = stream.write_all(&line) {
                    warn!(generation, error = %err, "client write failed; detaching");
                    slot.clear(generation);
                }
            }
            None => debug!(bytes = line.len(), "no client attached; dropping line"),
        }
    }
    info!("local input closed");
}

/// Forward complete lines from the attached client to the local output.
fn forward_client_output<W: Write>(
    mut output: W,
    slot: &ConnectionSlot,
    running: &AtomicBool,
    poll: Duration,
    backoff: Duration,
) {
    let mut active: Option<(u64, TcpStream)> = None;
    let mut pending = Vec::new();
    let mut chunk = [0u8; 4096];

    while running.load(Ordering::SeqCst) {
        let generation = slot.generation();
        if active.as_ref().map(|(current, _)| *current) != Some(generation) {
            pending.clear();
            active = slot.current();
            if let Some((_, stream)) = &active {
                let _ = stream.set_read_timeout(Some(poll));
            }
        }

        let Some((generation, stream)) = active.as_mut() else {
            thread::sleep(backoff);
            continue;
        };
        let generation = *generation;
        let read = stream.read(&mut chunk);

        match read {
            Ok(0) => {
                info!(generation, "client disconnected");
                slot.clear(generation);
                active = None;
                pending.clear();
            }
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                while let Some(pos) = pending.iter().position(|byte| *byte == b'\n') {
                    let line: Vec<u8> = pending.drain(..=pos).collect();
                    if line.len() == 1 {
                        continue;
                    }
                    if let Err(err) = output.write_all(&line).and_then(|_| output.flush()) {
                        warn!(error = %err, "local output failed");
                    }
                }
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => {
                warn!(generation, error = %err, "client read failed; detaching");
                slot.clear(generation);
                active = None;
                pending.clear();
            }
        }
    }
}
