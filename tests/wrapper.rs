//! Connection-wrapper semantics against an in-memory mock connection.
//!
//! The mock exposes no socket handle, which is the "underlying connection
//! is not TCP" path: counters and timestamps must update, both snapshots
//! must stay unset without error, and the report callback must still fire
//! for both lifecycle states. These tests run on every platform.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use sockscope::{ConnState, StatsConn, StreamConn};

/// Scripted byte-stream connection with no socket handle.
#[derive(Default)]
struct MockConn {
    reads: VecDeque<io::Result<Vec<u8>>>,
    write_errs: VecDeque<io::Error>,
    written: Vec<u8>,
    close_count: u32,
}

impl MockConn {
    fn with_reads(reads: Vec<io::Result<Vec<u8>>>) -> Self {
        Self {
            reads: reads.into_iter().collect(),
            ..Self::default()
        }
    }
}

impl Read for MockConn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.reads.pop_front() {
            Some(Ok(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            Some(Err(e)) => Err(e),
            None => Ok(0),
        }
    }
}

impl Write for MockConn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(err) = self.write_errs.pop_front() {
            return Err(err);
        }
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl StreamConn for MockConn {
    fn close(&mut self) -> io::Result<()> {
        self.close_count += 1;
        Ok(())
    }
}

type ReportLog = Arc<Mutex<Vec<&'static str>>>;

fn logging_report() -> (ReportLog, sockscope::ReportFn) {
    let log: ReportLog = Arc::new(Mutex::new(Vec::new()));
    let log2 = Arc::clone(&log);
    let report: sockscope::ReportFn = Box::new(move |_stats, state| {
        log2.lock().unwrap().push(state.as_str());
    });
    (log, report)
}

// ---------------------------------------------------------------------------
// TC-W-1: non-TCP connection lifecycle (scenario: wrap + close on a mock)
// ---------------------------------------------------------------------------

#[test]
fn mock_conn_lifecycle_reports_without_snapshots() {
    let (log, report) = logging_report();
    let mut conn = StatsConn::wrap(MockConn::default(), Some(report));

    assert!(conn.stats().opened_at > 0);
    assert!(conn.stats().opened_info.is_none());
    assert!(conn.stats().info_err.is_none());

    conn.close().unwrap();

    let stats = conn.stats();
    assert!(stats.closed_at.unwrap() >= stats.opened_at);
    assert!(stats.opened_info.is_none());
    assert!(stats.closed_info.is_none());
    assert!(stats.info_err.is_none());
    assert_eq!(*log.lock().unwrap(), vec!["open", "close"]);
    assert_eq!(conn.get_ref().close_count, 1);
}

// ---------------------------------------------------------------------------
// TC-W-2: byte counters and timestamp ordering
// ---------------------------------------------------------------------------

#[test]
fn counters_sum_successful_transfers() {
    let mock = MockConn::with_reads(vec![Ok(b"hello".to_vec()), Ok(b"world!!".to_vec())]);
    let mut conn = StatsConn::wrap(mock, None);

    let mut buf = [0u8; 16];
    assert_eq!(conn.read(&mut buf).unwrap(), 5);
    assert_eq!(conn.read(&mut buf).unwrap(), 7);
    assert_eq!(conn.read(&mut buf).unwrap(), 0); // EOF adds nothing

    conn.write_all(b"ping").unwrap();
    conn.write_all(b"pong123").unwrap();

    let stats = conn.stats();
    assert_eq!(stats.rx_bytes, 12);
    assert_eq!(stats.tx_bytes, 11);

    let first_rx = stats.first_rx_at.unwrap();
    let last_rx = stats.last_rx_at.unwrap();
    let first_tx = stats.first_tx_at.unwrap();
    let last_tx = stats.last_tx_at.unwrap();
    assert!(stats.opened_at <= first_rx);
    assert!(first_rx <= last_rx);
    assert!(stats.opened_at <= first_tx);
    assert!(first_tx <= last_tx);

    conn.close().unwrap();
    let closed_at = conn.stats().closed_at.unwrap();
    assert!(closed_at >= last_rx && closed_at >= last_tx);
}

// ---------------------------------------------------------------------------
// TC-W-3: error recording: non-timeout errors stick, timeouts do not
// ---------------------------------------------------------------------------

#[test]
fn non_timeout_errors_are_recorded() {
    let mock = MockConn::with_reads(vec![
        Err(io::Error::from(io::ErrorKind::WouldBlock)),
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer reset")),
    ]);
    let mut conn = StatsConn::wrap(mock, None);

    let mut buf = [0u8; 4];
    let err = conn.read(&mut buf).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    assert!(conn.stats().rx_err.is_none()); // timeouts never recorded

    let err = conn.read(&mut buf).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    let recorded = conn.stats().rx_err.as_ref().unwrap();
    assert_eq!(recorded.kind(), io::ErrorKind::ConnectionReset);
}

#[test]
fn write_errors_are_recorded_symmetrically() {
    let mut mock = MockConn::default();
    mock.write_errs
        .push_back(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
    let mut conn = StatsConn::wrap(mock, None);

    let err = conn.write(b"x").unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    assert_eq!(
        conn.stats().tx_err.as_ref().unwrap().kind(),
        io::ErrorKind::BrokenPipe
    );
    assert_eq!(conn.stats().tx_bytes, 0);
}

// ---------------------------------------------------------------------------
// TC-W-4: a null callback suppresses reports but changes nothing else
// ---------------------------------------------------------------------------

#[test]
fn null_callback_still_tracks() {
    let mock = MockConn::with_reads(vec![Ok(b"abc".to_vec())]);
    let mut conn = StatsConn::wrap(mock, None);
    let mut buf = [0u8; 8];
    conn.read(&mut buf).unwrap();
    conn.close().unwrap();

    let stats = conn.stats();
    assert_eq!(stats.rx_bytes, 3);
    assert!(stats.closed_at.is_some());
}

// ---------------------------------------------------------------------------
// TC-W-5: host-managed attempt counter
// ---------------------------------------------------------------------------

#[test]
fn attempts_are_host_managed() {
    let mut conn = StatsConn::wrap(MockConn::default(), None);
    assert_eq!(conn.stats().attempts, 0);
    conn.set_attempts(3);
    conn.close().unwrap();
    assert_eq!(conn.stats().attempts, 3);
    assert!(conn
        .stats()
        .warnings()
        .contains(&"attempts=3".to_string()));
}

// ---------------------------------------------------------------------------
// TC-W-6: connection record serialization
// ---------------------------------------------------------------------------

#[test]
fn stats_map_has_stable_keys() {
    let mock = MockConn::with_reads(vec![Ok(b"zz".to_vec())]);
    let mut conn = StatsConn::wrap(mock, None);
    let mut buf = [0u8; 4];
    conn.read(&mut buf).unwrap();
    conn.write_all(b"yo").unwrap();
    conn.close().unwrap();

    let map = conn.stats().to_map();
    for key in [
        "openedAt", "closedAt", "firstRxAt", "lastRxAt", "firstTxAt", "lastTxAt", "txBytes",
        "rxBytes", "attempts", "warnings",
    ] {
        assert!(map.contains_key(key), "missing key {key}");
    }
    // Nothing errored and no snapshots were possible on a mock.
    assert!(!map.contains_key("rxErr"));
    assert!(!map.contains_key("infoErr"));
    assert!(!map.contains_key("openedInfo"));
    assert_eq!(map["rxBytes"], serde_json::json!(2));
    assert_eq!(map["txBytes"], serde_json::json!(2));
}

// ---------------------------------------------------------------------------
// TC-W-7: double close re-reports but never re-snapshots
// ---------------------------------------------------------------------------

#[test]
fn double_close_reports_again() {
    let (log, report) = logging_report();
    let mut conn = StatsConn::wrap(MockConn::default(), Some(report));
    conn.close().unwrap();
    conn.close().unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["open", "close", "close"]);
    assert_eq!(conn.get_ref().close_count, 2);
    assert!(conn.stats().closed_info.is_none());
}

// ---------------------------------------------------------------------------
// TC-W-8: lifecycle state labels
// ---------------------------------------------------------------------------

#[test]
fn state_labels() {
    assert_eq!(ConnState::Opened.as_str(), "open");
    assert_eq!(ConnState::Closed.as_str(), "close");
}
