//! Live-socket integration tests: real loopback connections drive the
//! acquisition layer, the wrapper's snapshot orchestration, and the
//! collector's eviction behavior. Linux-only, since they talk to the kernel.

#![cfg(target_os = "linux")]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sockscope::{StatsConn, TcpInfoCollector};

fn loopback_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).unwrap();
    let (server, _) = listener.accept().unwrap();
    (client, server)
}

// ---------------------------------------------------------------------------
// TC-L-1: kernel probe and platform support on a real kernel
// ---------------------------------------------------------------------------

#[test]
fn probe_detects_running_kernel() {
    let version = sockscope::kernel::detect().unwrap();
    assert!(version.kernel >= 2);
    assert!(sockscope::supported());
}

// ---------------------------------------------------------------------------
// TC-L-2: direct acquisition against live sockets
// ---------------------------------------------------------------------------

#[test]
fn acquisition_reads_connection_state() {
    let (client, _server) = loopback_pair();
    let sys = sockscope::get_tcp_info(client.as_raw_fd()).unwrap();
    assert_eq!(sys.state_name, "ESTABLISHED");
    assert!(sys.tx_mss > 0);

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let sys = sockscope::get_tcp_info(listener.as_raw_fd()).unwrap();
    assert_eq!(sys.state_name, "LISTEN");
}

// ---------------------------------------------------------------------------
// TC-L-3: wrapper snapshots on a real TCP connection
// ---------------------------------------------------------------------------

#[test]
fn wrapper_takes_open_and_close_snapshots() {
    let (client, mut server) = loopback_pair();

    let reports = Arc::new(AtomicUsize::new(0));
    let reports2 = Arc::clone(&reports);
    let mut conn = StatsConn::wrap(
        client,
        Some(Box::new(move |_stats, _state| {
            reports2.fetch_add(1, Ordering::SeqCst);
        })),
    );

    // Exactly one of snapshot / sticky error after wrap, never both unset.
    let stats = conn.stats();
    assert!(stats.opened_info.is_some() != stats.info_err.is_some());
    let opened = stats.opened_info.as_ref().expect("snapshot on loopback");
    assert_eq!(opened.state, "ESTABLISHED");

    conn.write_all(b"ping").unwrap();
    let mut buf = [0u8; 4];
    server.read_exact(&mut buf).unwrap();
    server.write_all(b"pong").unwrap();
    conn.read_exact(&mut buf).unwrap();

    conn.close().unwrap();

    let stats = conn.stats();
    assert_eq!(stats.tx_bytes, 4);
    assert_eq!(stats.rx_bytes, 4);
    assert!(stats.closed_info.is_some());
    assert_eq!(reports.load(Ordering::SeqCst), 2);

    // Snapshots bracket the I/O timestamps.
    assert!(stats.opened_at <= stats.first_tx_at.unwrap());
    assert!(stats.last_rx_at.unwrap() <= stats.closed_at.unwrap());
}

// ---------------------------------------------------------------------------
// TC-L-3b: snapshots are gathered even with no callback installed
// ---------------------------------------------------------------------------

#[test]
fn null_callback_still_snapshots_real_sockets() {
    let (client, _server) = loopback_pair();
    let mut conn = StatsConn::wrap(client, None);

    // A null callback suppresses reports only; the opened-state snapshot
    // (or its sticky error) must be there regardless.
    let stats = conn.stats();
    assert!(stats.opened_info.is_some() != stats.info_err.is_some());
    let opened = stats.opened_info.as_ref().expect("snapshot on loopback");
    assert_eq!(opened.state, "ESTABLISHED");

    conn.close().unwrap();
    assert!(conn.stats().closed_info.is_some());
}

// ---------------------------------------------------------------------------
// TC-L-4: collector pull with self-healing eviction
// ---------------------------------------------------------------------------

#[test]
fn collector_evicts_dead_members_and_continues() {
    let (live_client, _live_server) = loopback_pair();
    let (dead_client, _dead_server) = loopback_pair();

    let errors = Arc::new(AtomicUsize::new(0));
    let errors2 = Arc::clone(&errors);
    let collector = TcpInfoCollector::new(
        "test",
        vec!["peer".to_string()],
        vec![("app".to_string(), "it".to_string())],
        Box::new(move |_err| {
            errors2.fetch_add(1, Ordering::SeqCst);
        }),
    );

    assert!(collector.add(&live_client, vec!["live".to_string()]));
    assert!(collector.add(&dead_client, vec!["dead".to_string()]));
    assert_eq!(collector.len(), 2);

    // Close the second socket behind the collector's back.
    drop(dead_client);

    let samples = collector.collect();
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(collector.len(), 1);
    assert!(!samples.is_empty());
    for sample in &samples {
        assert!(sample.name.starts_with("test_tcpinfo_"));
        assert!(sample
            .labels
            .contains(&("app".to_string(), "it".to_string())));
        assert!(sample
            .labels
            .contains(&("peer".to_string(), "live".to_string())));
    }

    // The registry healed: the next pull reports no further errors.
    let _ = collector.collect();
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// TC-L-5: re-registration replaces the entry for the same identity
// ---------------------------------------------------------------------------

#[test]
fn add_replaces_same_identity() {
    let (client, _server) = loopback_pair();
    let collector = TcpInfoCollector::new("", Vec::new(), Vec::new(), Box::new(|_| {}));
    assert!(collector.add(&client, vec!["first".to_string()]));
    assert!(collector.add(&client, vec!["second".to_string()]));
    assert_eq!(collector.len(), 1);

    collector.remove(&client);
    assert!(collector.is_empty());
    // Removing an absent entry is not an error.
    collector.remove(&client);
}
