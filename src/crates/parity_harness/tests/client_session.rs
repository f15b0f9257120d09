#[path = "support.rs"]
mod support;

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use parity_harness::{Client, ClientConfig, Command, HarnessError};
use support::{combat_state, payload, scripted_peer, screen_state};

const SHORT: Duration = Duration::from_millis(200);
const WAIT: Duration = Duration::from_secs(2);

fn connected(addr: std::net::SocketAddr) -> Client {
    let mut client = Client::new(ClientConfig::new("127.0.0.1", addr.port()));
    client
        .connect(WAIT, Duration::from_millis(10))
        .expect("client should connect");
    client
}

#[test]
fn partial_reads_are_buffered_into_lines() {
    let (addr, peer) = scripted_peer(|mut stream| {
        stream.write_all(b"first\nsec").expect("write");
        stream.flush().expect("flush");
        thread::sleep(Duration::from_millis(50));
        stream.write_all(b"ond\nthird\n").expect("write");
        thread::sleep(Duration::from_millis(200));
    });

    let mut client = connected(addr);
    assert_eq!(client.receive_line(Some(WAIT)).expect("line"), "first");
    assert_eq!(client.receive_line(Some(WAIT)).expect("line"), "second");
    assert_eq!(client.receive_line(Some(WAIT)).expect("line"), "third");
    peer.join().expect("peer");
}

#[test]
fn zero_byte_read_is_a_disconnect() {
    let (addr, peer) = scripted_peer(|mut stream| {
        stream.write_all(b"bye\n").expect("write");
    });

    let mut client = connected(addr);
    peer.join().expect("peer");
    assert_eq!(client.receive_line(Some(WAIT)).expect("line"), "bye");
    let err = client.receive_line(Some(WAIT)).expect_err("peer closed");
    assert!(matches!(err, HarnessError::Disconnected));
    assert!(err.is_connection());
}

#[test]
fn silent_peer_times_out() {
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let (addr, peer) = scripted_peer(move |_stream| {
        let _ = done_rx.recv_timeout(WAIT);
    });

    let mut client = connected(addr);
    let start = Instant::now();
    let err = client.receive_line(Some(SHORT)).expect_err("nothing sent");
    assert!(matches!(err, HarnessError::Timeout(timeout) if timeout == SHORT));
    assert!(!err.is_connection());
    assert!(start.elapsed() >= SHORT);

    done_tx.send(()).expect("release peer");
    peer.join().expect("peer");
}

#[test]
fn commands_are_sent_as_lines() {
    let (line_tx, line_rx) = mpsc::channel();
    let (addr, peer) = scripted_peer(move |stream| {
        let reader = BufReader::new(stream);
        for line in reader.lines().map_while(Result::ok).take(3) {
            line_tx.send(line).expect("forward line");
        }
    });

    let mut client = connected(addr);
    client.play_card(0, Some(1)).expect("send");
    client.send(&Command::KeyConfirm).expect("send");
    client.start_game("BG_IRONCLAD", 0, Some("SEED")).expect("send");

    let received: Vec<String> = (0..3)
        .map(|_| line_rx.recv_timeout(WAIT).expect("line"))
        .collect();
    assert_eq!(received, vec!["play 1 1", "key confirm", "start BG_IRONCLAD 0 SEED"]);
    peer.join().expect("peer");
}

#[test]
fn sending_without_connection_fails() {
    let mut client = Client::new(ClientConfig::default());
    let err = client.send_command("state").expect_err("not connected");
    assert!(matches!(err, HarnessError::NotConnected));
    assert!(err.is_connection());
}

#[test]
fn combat_data_is_sticky_across_payloads() {
    let (addr, peer) = scripted_peer(|mut stream| {
        let lines = [
            payload(true, &["play", "end"], Some(combat_state(20, &["BGStrike_R"]))),
            payload(false, &["choose"], Some(screen_state("HAND_SELECT", &["strike"]))),
        ];
        for line in lines {
            stream.write_all(line.as_bytes()).expect("write");
            stream.write_all(b"\n").expect("write");
        }
        thread::sleep(Duration::from_millis(200));
    });

    let mut client = connected(addr);
    let first = client
        .wait_for_state(Some(WAIT))
        .expect("payload")
        .expect("snapshot");
    assert_eq!(first.combat.as_ref().expect("combat").player.current_hp, 20);
    assert!(client.session().ready_for_command);

    let second = client
        .wait_for_state(Some(WAIT))
        .expect("payload")
        .expect("snapshot");
    let combat = second.combat.as_ref().expect("combat carried over");
    assert_eq!(combat.player.current_hp, 20);
    assert_eq!(combat.hand[0].card_id, "BGStrike_R");
    assert_eq!(second.choice_list, vec!["strike".to_string()]);
    assert!(!client.session().ready_for_command);
    assert!(!client.session().payload_has_combat());
    assert_eq!(client.session().available_commands, vec!["choose".to_string()]);
    peer.join().expect("peer");
}

#[test]
fn error_payload_keeps_previous_snapshot() {
    let (addr, peer) = scripted_peer(|mut stream| {
        let ok = payload(true, &["end"], Some(combat_state(5, &[])));
        let error = r#"{"error": "Invalid command", "ready_for_command": true, "in_game": true, "available_commands": ["end"]}"#;
        writeln!(stream, "{ok}\n{error}").expect("write");
        thread::sleep(Duration::from_millis(200));
    });

    let mut client = connected(addr);
    client.wait_for_state(Some(WAIT)).expect("payload");
    let snapshot = client
        .wait_for_state(Some(WAIT))
        .expect("payload")
        .expect("previous snapshot");
    assert_eq!(snapshot.combat.expect("combat").player.current_hp, 5);
    assert_eq!(client.session().last_error.as_deref(), Some("Invalid command"));
    peer.join().expect("peer");
}

#[test]
fn malformed_payload_is_a_hard_error() {
    let (addr, peer) = scripted_peer(|mut stream| {
        stream.write_all(b"{\"in_game\": tru\n").expect("write");
        thread::sleep(Duration::from_millis(200));
    });

    let mut client = connected(addr);
    let err = client.wait_for_state(Some(WAIT)).expect_err("bad json");
    assert!(matches!(err, HarnessError::Payload(_)));
    peer.join().expect("peer");
}

#[test]
fn drain_discards_stale_lines() {
    let (addr, peer) = scripted_peer(|mut stream| {
        stream.write_all(b"one\ntwo\nthree\n").expect("write");
        thread::sleep(Duration::from_millis(300));
        stream.write_all(b"fresh\n").expect("write");
        thread::sleep(Duration::from_millis(200));
    });

    let mut client = connected(addr);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(client.drain(Duration::from_millis(100)).expect("drain"), 3);
    assert_eq!(client.receive_line(Some(WAIT)).expect("line"), "fresh");
    peer.join().expect("peer");
}

#[test]
fn connect_gives_up_after_timeout() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };

    let mut client = Client::new(ClientConfig::new("127.0.0.1", port));
    let start = Instant::now();
    let err = client
        .connect(SHORT, Duration::from_millis(20))
        .expect_err("nothing listening");
    assert!(start.elapsed() >= SHORT);
    match &err {
        HarnessError::Connect {
            host,
            port: reported,
            timeout,
        } => {
            assert_eq!(host, "127.0.0.1");
            assert_eq!(*reported, port);
            assert_eq!(*timeout, SHORT);
        }
        other => panic!("expected connect error, got {other}"),
    }
    assert!(err.is_connection());
    assert!(!client.is_connected());
}

#[test]
fn connect_waits_for_late_listener() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };

    let late = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        let listener = TcpListener::bind(("127.0.0.1", port)).expect("rebind");
        let (mut stream, _) = listener.accept().expect("accept");
        stream.write_all(b"hello\n").expect("write");
        thread::sleep(Duration::from_millis(100));
    });

    let mut client = Client::new(ClientConfig::new("127.0.0.1", port));
    client
        .connect(WAIT, Duration::from_millis(20))
        .expect("connect after listener appears");
    assert_eq!(client.receive_line(Some(WAIT)).expect("line"), "hello");
    client.disconnect();
    assert!(!client.is_connected());
    assert!(client.session().last_raw.is_none());
    late.join().expect("listener thread");
}
