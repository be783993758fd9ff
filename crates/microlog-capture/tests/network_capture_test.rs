//! Integration test: concurrent TCP capture server
//!
//! Validates that:
//! 1. N concurrent connections x k lines drain as N*k records and clear the buffer.
//! 2. A drain with no traffic returns empty once the timeout elapses.
//! 3. Lines split across writes are reassembled per connection.
//! 4. Per-connection order survives interleaving with other connections.
//! 5. Shutdown joins every handler and reports connection counts.
//!
//! Run: cargo test -p microlog-capture --test network_capture_test

use std::io::Write;
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use microlog_capture::network::{NetworkCaptureServer, ServerOptions};
use microlog_capture::record::Level;

fn record_line(conn: usize, seq: usize) -> String {
    format!(
        "[16/10/26 09:15:00.{seq:03}][INFO ][pid:00000100][tid:{conn:016}][demo.cpp:049::operator()][conn {conn} seq {seq}]"
    )
}

fn start() -> NetworkCaptureServer {
    NetworkCaptureServer::bind("127.0.0.1:0", ServerOptions::default()).expect("bind ephemeral port")
}

#[test]
fn concurrent_connections_drain_all_lines() {
    const CONNECTIONS: usize = 8;
    const LINES: usize = 25;

    let server = start();
    let addr = server.local_addr();
    let clients: Vec<_> = (0..CONNECTIONS)
        .map(|conn| {
            thread::spawn(move || {
                let mut stream = TcpStream::connect(addr).expect("connect");
                for seq in 0..LINES {
                    writeln!(stream, "{}", record_line(conn, seq)).expect("write");
                }
            })
        })
        .collect();
    for client in clients {
        client.join().expect("client thread");
    }

    let buffer = Arc::clone(server.buffer());
    let stats = server.shutdown();
    assert_eq!(stats.connections, CONNECTIONS as u64);
    assert_eq!(stats.handler_errors, 0);

    let records = buffer
        .drain_or_empty(Duration::from_secs(1))
        .expect("all lines parse");
    assert_eq!(records.len(), CONNECTIONS * LINES);
    assert!(buffer.is_empty(), "drain must clear the buffer");
    assert!(records.iter().all(|r| r.level == Level::Info));
}

#[test]
fn drain_without_traffic_is_empty_after_timeout() {
    let server = start();
    let timeout = Duration::from_millis(200);
    let start = Instant::now();
    let records = server.drain_or_empty(timeout).expect("empty drain is not an error");
    assert!(records.is_empty());
    assert!(start.elapsed() >= timeout);
}

#[test]
fn line_split_across_writes_is_reassembled() {
    let server = start();
    let line = record_line(3, 7);
    let (head, tail) = line.split_at(40);
    {
        let mut stream = TcpStream::connect(server.local_addr()).expect("connect");
        stream.set_nodelay(true).expect("nodelay");
        stream.write_all(head.as_bytes()).expect("head");
        stream.flush().expect("flush");
        thread::sleep(Duration::from_millis(50));
        stream.write_all(tail.as_bytes()).expect("tail");
        stream.write_all(b"\n").expect("newline");
    }

    let buffer = Arc::clone(server.buffer());
    server.shutdown();
    let records = buffer.drain_or_empty(Duration::ZERO).expect("parse");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message, "conn 3 seq 7");
}

#[test]
fn per_connection_order_is_preserved() {
    let server = start();
    let addr = server.local_addr();
    let clients: Vec<_> = (0..4)
        .map(|conn| {
            thread::spawn(move || {
                let mut stream = TcpStream::connect(addr).expect("connect");
                for seq in 0..10 {
                    writeln!(stream, "{}", record_line(conn, seq)).expect("write");
                    stream.flush().expect("flush");
                }
            })
        })
        .collect();
    for client in clients {
        client.join().expect("client thread");
    }
    let buffer = Arc::clone(server.buffer());
    server.shutdown();

    let records = buffer.drain_or_empty(Duration::ZERO).expect("parse");
    for conn in 0..4usize {
        let tid = format!("{conn:016}");
        let seqs: Vec<String> = records
            .iter()
            .filter(|r| r.tid == tid)
            .map(|r| r.message.clone())
            .collect();
        let expected: Vec<String> = (0..10).map(|seq| format!("conn {conn} seq {seq}")).collect();
        assert_eq!(seqs, expected);
    }
}

#[test]
fn drain_wakes_when_connection_closes() {
    let server = start();
    let addr = server.local_addr();
    let client = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        let mut stream = TcpStream::connect(addr).expect("connect");
        writeln!(stream, "{}", record_line(1, 1)).expect("write");
    });
    let start = Instant::now();
    let records = server.drain_or_empty(Duration::from_secs(5)).expect("parse");
    client.join().expect("client thread");
    assert_eq!(records.len(), 1);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn malformed_traffic_fails_and_still_clears() {
    let server = start();
    {
        let mut stream = TcpStream::connect(server.local_addr()).expect("connect");
        stream.write_all(b"definitely not a record\n").expect("write");
    }
    let buffer = Arc::clone(server.buffer());
    server.shutdown();
    assert!(buffer.drain_or_empty(Duration::ZERO).is_err());
    assert!(buffer.is_empty());
}

#[test]
fn server_can_drain_repeatedly() {
    let server = start();
    for round in 0..3 {
        {
            let mut stream = TcpStream::connect(server.local_addr()).expect("connect");
            writeln!(stream, "{}", record_line(round, round)).expect("write");
        }
        let records = server.drain_or_empty(Duration::from_secs(5)).expect("parse");
        assert_eq!(records.len(), 1, "round {round}");
        assert_eq!(records[0].message, format!("conn {round} seq {round}"));
    }
    assert_eq!(server.shutdown().connections, 3);
}
