use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Result alias for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Errors that can occur while relaying, driving or comparing the two sides.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("could not connect to relay at {host}:{port} within {timeout:?}")]
    Connect {
        host: String,
        port: u16,
        timeout: Duration,
    },
    #[error("relay disconnected")]
    Disconnected,
    #[error("not connected to relay")]
    NotConnected,
    #[error("no data received within {0:?}")]
    Timeout(Duration),
    #[error("failed to bind relay listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("duplicate identifier mapping: {0}")]
    DuplicateMapping(String),
    #[error("unknown identifier: {0}")]
    UnknownIdentifier(String),
    #[error("scenario error: {0}")]
    Scenario(String),
    #[error("reference engine rejected action: {0}")]
    Reference(String),
    #[error("failed to spawn relay: {0}")]
    RelayStart(String),
    #[error("relay terminated early with status {0}")]
    RelayExited(ExitStatus),
    #[error("relay did not report a listen address within {0:?}")]
    StartupTimeout(Duration),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl HarnessError {
    /// Whether this error means the live application is unreachable rather
    /// than misbehaving. Dependent tests skip instead of failing on these.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            HarnessError::Connect { .. } | HarnessError::Disconnected | HarnessError::NotConnected
        )
    }

    pub(crate) fn scenario(message: impl Into<String>) -> Self {
        HarnessError::Scenario(message.into())
    }

    pub(crate) fn relay_start(err: impl Into<String>) -> Self {
        HarnessError::RelayStart(err.into())
    }
}
