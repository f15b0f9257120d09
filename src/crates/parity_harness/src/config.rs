use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Port the relay listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 38281;
/// Loopback host shared by the relay and its clients.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Environment variable overriding the relay host seen by clients.
pub const HOST_ENV: &str = "PARITY_RELAY_HOST";
/// Environment variable overriding the relay port seen by clients.
pub const PORT_ENV: &str = "PARITY_RELAY_PORT";

/// Settings for the bridge relay process.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Interface the listener binds to.
    pub host: String,
    /// TCP port for the single remote client. `0` picks an ephemeral port.
    pub port: u16,
    /// Line written to the local output stream before listening.
    pub ready_signal: String,
    /// Read timeout used when polling the attached socket.
    pub poll_interval: Duration,
    /// Sleep between checks while no client is attached.
    pub idle_backoff: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            ready_signal: "ready".to_string(),
            poll_interval: Duration::from_millis(100),
            idle_backoff: Duration::from_millis(50),
        }
    }
}

impl RelayConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Override the ready line emitted at startup.
    pub fn with_ready_signal(mut self, signal: impl Into<String>) -> Self {
        self.ready_signal = signal.into();
        self
    }

    /// Override the socket polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = backoff;
        self
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Connection parameters for the protocol client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Total time to keep retrying the initial connection.
    pub connect_timeout: Duration,
    /// Delay between connection attempts.
    pub retry_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(10),
            retry_interval: Duration::from_millis(500),
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Defaults, with host and port taken from the environment when set.
    ///
    /// An unparsable port falls back to [`DEFAULT_PORT`].
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = std::env::var(HOST_ENV) {
            if !host.trim().is_empty() {
                config.host = host.trim().to_string();
            }
        }
        if let Some(port) = std::env::var(PORT_ENV)
            .ok()
            .and_then(|value| value.trim().parse().ok())
        {
            config.port = port;
        }
        config
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }
}

/// Termination heuristic for driving the live application to quiescence.
///
/// The live side never announces that an action has fully resolved, so the
/// engine waits `responsive_timeout` after anything it sends and only
/// `probe_timeout` after explicitly re-requesting state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionPolicy {
    pub responsive_timeout: Duration,
    pub probe_timeout: Duration,
    pub max_steps: usize,
}

impl Default for ResolutionPolicy {
    fn default() -> Self {
        Self {
            responsive_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(3),
            max_steps: 30,
        }
    }
}

impl ResolutionPolicy {
    pub fn with_responsive_timeout(mut self, timeout: Duration) -> Self {
        self.responsive_timeout = timeout;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_max_steps(mut self, steps: usize) -> Self {
        self.max_steps = steps;
        self
    }
}

/// Timing for scenario setup and screen dismissal.
#[derive(Debug, Clone)]
pub struct DirectorConfig {
    /// Receive timeout while waiting for a `set` to settle.
    pub settle_timeout: Duration,
    /// Quiet window used when draining stale lines.
    pub drain_window: Duration,
    /// Pause after a dismissal or navigation command.
    pub settle_delay: Duration,
    /// Receive timeout for each state probe while dismissing screens.
    pub dismiss_timeout: Duration,
    /// Rounds spent dismissing leftover screens before giving up.
    pub dismiss_rounds: usize,
    /// Receives allowed after a `set` before returning the last state.
    pub set_max_reads: usize,
    /// Screens walked while looking for a combat encounter.
    pub navigation_attempts: usize,
    pub resolution: ResolutionPolicy,
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            settle_timeout: Duration::from_secs(10),
            drain_window: Duration::from_millis(100),
            settle_delay: Duration::from_millis(500),
            dismiss_timeout: Duration::from_secs(5),
            dismiss_rounds: 5,
            set_max_reads: 20,
            navigation_attempts: 40,
            resolution: ResolutionPolicy::default(),
        }
    }
}

impl DirectorConfig {
    pub fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }

    pub fn with_drain_window(mut self, window: Duration) -> Self {
        self.drain_window = window;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_dismiss_timeout(mut self, timeout: Duration) -> Self {
        self.dismiss_timeout = timeout;
        self
    }

    pub fn with_resolution(mut self, policy: ResolutionPolicy) -> Self {
        self.resolution = policy;
        self
    }
}

/// How [`RelayProcess::spawn`](crate::RelayProcess::spawn) launches `parity-relay`.
#[derive(Debug, Clone)]
pub struct RelayProcessConfig {
    /// `parity-relay` executable.
    pub binary_path: PathBuf,
    /// Port passed through `--port`; `0` lets the relay pick one.
    pub port: u16,
    pub env: BTreeMap<String, String>,
    pub working_directory: Option<PathBuf>,
    /// How long the relay may take to log `listening on <addr>`.
    pub startup_timeout: Duration,
}

impl RelayProcessConfig {
    pub fn new(binary_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            port: 0,
            env: BTreeMap::new(),
            working_directory: None,
            startup_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set a variable in the relay's environment, e.g. `RUST_LOG`.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Give a slow relay longer to bind before `spawn` gives up.
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }
}
