//! Bridge relay
//!
//! Exposes this process's stdin/stdout to a single TCP client. Launch it in
//! place of the scripted application's command; logs go to stderr.

use std::io::{self, BufReader, IsTerminal};
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use parity_harness::{relay, RelayConfig, DEFAULT_HOST, DEFAULT_PORT};

/// Bridge a stdio-driven process to one TCP client
#[derive(Parser, Debug)]
#[command(name = "parity-relay")]
#[command(version, about, long_about = None)]
struct Args {
    /// Interface to listen on
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Port to listen on (0 picks a free port)
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Line written to stdout once the relay is starting
    #[arg(long, default_value = "ready")]
    ready_signal: String,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing();

    let config = RelayConfig::new(args.host, args.port).with_ready_signal(args.ready_signal);
    match relay::spawn(&config, BufReader::new(io::stdin()), io::stdout()) {
        Ok(handle) => {
            handle.wait();
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "relay failed to start");
            ExitCode::FAILURE
        }
    }
}
