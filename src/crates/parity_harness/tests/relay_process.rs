#[path = "support.rs"]
mod support;

use std::time::Duration;

use parity_harness::{
    Client, ClientConfig, HarnessError, LogStream, RelayProcess, RelayProcessConfig,
};
use serial_test::serial;
use support::{combat_state, payload, relay_bin_path};
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(5);

fn spawn_relay() -> (RelayProcess, TempDir) {
    let workdir = tempfile::tempdir().expect("temp working dir");
    let config = RelayProcessConfig::new(relay_bin_path())
        .with_working_directory(workdir.path())
        .with_startup_timeout(WAIT);
    let relay = RelayProcess::spawn(config).expect("relay should launch");
    (relay, workdir)
}

#[test]
#[serial]
fn relay_binary_bridges_stdio_to_client() {
    let (mut relay, _workdir) = spawn_relay();
    relay
        .read_ready_signal("ready", WAIT)
        .expect("ready signal comes first");

    let address = relay.address();
    let mut client = Client::attach(
        ClientConfig::new(address.ip().to_string(), address.port())
            .with_connect_timeout(WAIT)
            .with_retry_interval(Duration::from_millis(20)),
    )
    .expect("client should connect");

    // A line arriving on stdout proves the relay has installed this client.
    client.request_state().expect("send state");
    assert_eq!(relay.read_line(WAIT).expect("forwarded command"), "state");

    relay
        .write_line(&payload(true, &["play", "end"], Some(combat_state(7, &["BGStrike_R"]))))
        .expect("write payload");
    let snapshot = client
        .wait_for_state(Some(WAIT))
        .expect("payload")
        .expect("snapshot");
    assert_eq!(snapshot.combat.expect("combat").player.current_hp, 7);

    client.play_card(0, Some(0)).expect("send play");
    assert_eq!(relay.read_line(WAIT).expect("forwarded play"), "play 1 0");

    let logs = relay.logs();
    assert!(logs
        .iter()
        .any(|log| log.stream == LogStream::Stderr && log.line.contains("listening on")));
    assert!(logs
        .iter()
        .any(|log| log.stream == LogStream::Stdout && log.line == "ready"));

    client.disconnect();
    relay.shutdown().expect("shutdown should succeed");
}

#[test]
#[serial]
fn relay_process_reports_bind_failure() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = occupied.local_addr().expect("addr").port();

    let config = RelayProcessConfig::new(relay_bin_path())
        .with_port(port)
        .with_startup_timeout(WAIT);
    match RelayProcess::spawn(config) {
        Err(HarnessError::RelayExited(status)) => assert!(!status.success()),
        Err(HarnessError::StartupTimeout(_)) => {}
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("relay should not start on an occupied port"),
    }
}

#[test]
#[serial]
fn silent_relay_read_times_out() {
    let (relay, _workdir) = spawn_relay();
    relay.read_ready_signal("ready", WAIT).expect("ready");
    let err = relay
        .read_line(Duration::from_millis(100))
        .expect_err("nothing else written");
    assert!(matches!(err, HarnessError::Timeout(_)));
    relay.shutdown().expect("shutdown should succeed");
}
