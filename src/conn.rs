// Connection wrapper — transparent byte-stream interposer.
//
// Wraps any byte-stream connection, keeps per-connection counters and
// timestamps, and gathers one kernel TCP snapshot just after establishment
// and one just before close. The wrapper never owns the socket handle: it
// borrows it for the duration of each snapshot syscall and nothing more.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Map, Value};

use crate::error::TcpInfoError;
use crate::info::Info;
use crate::sys::{self, SocketHandle};

/// Wall-clock nanoseconds since the Unix epoch.
fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Timeout-class errors are expected on sockets with deadlines and are not
/// recorded as the connection's last error.
fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

fn clone_io_error(err: &io::Error) -> io::Error {
    io::Error::new(err.kind(), err.to_string())
}

// ---------------------------------------------------------------------------
// StreamConn
// ---------------------------------------------------------------------------

/// The abstract byte-stream contract this crate wraps.
///
/// `std::net::TcpStream` implements it with a real socket handle; test
/// doubles and in-memory pipes implement it with `socket() == None`, which
/// makes the wrapper skip snapshots while still counting bytes.
pub trait StreamConn: Read + Write {
    /// Close the connection for further I/O.
    fn close(&mut self) -> io::Result<()>;

    /// The OS socket handle, if this connection is backed by one.
    fn socket(&self) -> Option<SocketHandle> {
        None
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

impl StreamConn for TcpStream {
    fn close(&mut self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }

    fn socket(&self) -> Option<SocketHandle> {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            Some(self.as_raw_fd())
        }
        #[cfg(windows)]
        {
            use std::os::windows::io::AsRawSocket;
            Some(self.as_raw_socket())
        }
        #[cfg(not(any(unix, windows)))]
        {
            None
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        TcpStream::local_addr(self).ok()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        TcpStream::peer_addr(self).ok()
    }
}

// ---------------------------------------------------------------------------
// Connection record
// ---------------------------------------------------------------------------

/// Lifecycle state passed to the report callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Opened,
    Closed,
}

impl ConnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnState::Opened => "open",
            ConnState::Closed => "close",
        }
    }
}

/// Callback invoked synchronously after each snapshot attempt, with the
/// connection record and the lifecycle state it was taken in.
pub type ReportFn = Box<dyn Fn(&ConnStats, ConnState) + Send + Sync>;

/// Bookkeeping for one wrapped connection.
///
/// Timestamps are wall-clock nanoseconds since the epoch; `None` means the
/// event has not happened. Byte counters sum successful read/write returns.
#[derive(Debug, Default)]
pub struct ConnStats {
    pub opened_at: u64,
    pub closed_at: Option<u64>,
    pub first_rx_at: Option<u64>,
    pub first_tx_at: Option<u64>,
    pub last_rx_at: Option<u64>,
    pub last_tx_at: Option<u64>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    /// Last non-timeout read error.
    pub rx_err: Option<io::Error>,
    /// Last non-timeout write error.
    pub tx_err: Option<io::Error>,
    /// Sticky snapshot-acquisition error; set once, suppresses later
    /// snapshot attempts.
    pub info_err: Option<TcpInfoError>,
    /// Dial attempts needed to open this connection, managed by the host.
    pub attempts: u32,
    /// Snapshot taken just after the connection was wrapped.
    pub opened_info: Option<Info>,
    /// Snapshot taken just before the connection was closed.
    pub closed_info: Option<Info>,
    pub local_addr: Option<SocketAddr>,
    pub peer_addr: Option<SocketAddr>,
}

impl ConnStats {
    /// Serialize to the stable name -> value map form.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("openedAt".to_string(), json!(self.opened_at));
        if let Some(v) = self.closed_at {
            m.insert("closedAt".to_string(), json!(v));
        }
        if let Some(v) = self.first_rx_at {
            m.insert("firstRxAt".to_string(), json!(v));
        }
        if let Some(v) = self.first_tx_at {
            m.insert("firstTxAt".to_string(), json!(v));
        }
        if let Some(v) = self.last_rx_at {
            m.insert("lastRxAt".to_string(), json!(v));
        }
        if let Some(v) = self.last_tx_at {
            m.insert("lastTxAt".to_string(), json!(v));
        }
        m.insert("txBytes".to_string(), json!(self.tx_bytes));
        m.insert("rxBytes".to_string(), json!(self.rx_bytes));
        m.insert("attempts".to_string(), json!(self.attempts));
        if let Some(addr) = self.local_addr {
            m.insert("localAddr".to_string(), json!(addr.to_string()));
        }
        if let Some(addr) = self.peer_addr {
            m.insert("remoteAddr".to_string(), json!(addr.to_string()));
        }
        if let Some(err) = &self.rx_err {
            m.insert("rxErr".to_string(), json!(err.to_string()));
        }
        if let Some(err) = &self.tx_err {
            m.insert("txErr".to_string(), json!(err.to_string()));
        }
        if let Some(err) = &self.info_err {
            m.insert("infoErr".to_string(), json!(err.to_string()));
        }
        if let Some(info) = &self.opened_info {
            m.insert("openedInfo".to_string(), Value::Object(info.to_map()));
        }
        if let Some(info) = &self.closed_info {
            m.insert("closedInfo".to_string(), Value::Object(info.to_map()));
        }
        m.insert("warnings".to_string(), json!(self.warnings()));
        m
    }

    /// Compact `key=value` strings for conditions worth surfacing across
    /// the connection's lifetime.
    pub fn warnings(&self) -> Vec<String> {
        let mut warns = Vec::new();
        if self.attempts > 0 {
            warns.push(format!("attempts={}", self.attempts));
        }
        for info in [&self.opened_info, &self.closed_info].into_iter().flatten() {
            warns.extend(info.warnings());
        }
        warns
    }
}

// ---------------------------------------------------------------------------
// StatsConn
// ---------------------------------------------------------------------------

/// A byte-stream connection augmented with counters and two TCP snapshots.
///
/// Satisfies the same `StreamConn` contract as the wrapped connection, so
/// it can stand in anywhere the original was used.
pub struct StatsConn<C> {
    inner: C,
    report: Option<ReportFn>,
    supported: bool,
    stats: ConnStats,
}

impl<C: StreamConn> StatsConn<C> {
    /// Wrap a connection, attempt the opened-state snapshot, and report
    /// `Opened` regardless of snapshot outcome.
    pub fn wrap(conn: C, report: Option<ReportFn>) -> Self {
        let stats = ConnStats {
            opened_at: now_ns(),
            local_addr: conn.local_addr(),
            peer_addr: conn.peer_addr(),
            ..ConnStats::default()
        };
        let mut wrapped = Self {
            inner: conn,
            report,
            supported: sys::supported(),
            stats,
        };
        wrapped.gather_and_report(ConnState::Opened);
        wrapped
    }

    /// The connection record accumulated so far.
    pub fn stats(&self) -> &ConnStats {
        &self.stats
    }

    /// Record how many dial attempts the host needed for this connection.
    /// Never touched internally.
    pub fn set_attempts(&mut self, attempts: u32) {
        self.stats.attempts = attempts;
    }

    pub fn get_ref(&self) -> &C {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut C {
        &mut self.inner
    }

    /// Record the close timestamp, attempt the closed-state snapshot,
    /// report `Closed`, then close the underlying connection. Snapshot
    /// failure never becomes the close result.
    pub fn close(&mut self) -> io::Result<()> {
        self.stats.closed_at = Some(now_ns());
        self.gather_and_report(ConnState::Closed);
        self.inner.close()
    }

    fn gather_and_report(&mut self, state: ConnState) {
        self.gather(state);
        if let Some(report) = &self.report {
            report(&self.stats, state);
        }
    }

    /// Attempt a snapshot for the given lifecycle state. Each state's
    /// snapshot happens at most once; unsupported platforms, prior
    /// acquisition errors, and handle-less connections skip silently.
    fn gather(&mut self, state: ConnState) {
        match state {
            ConnState::Opened if self.stats.opened_info.is_some() => return,
            ConnState::Closed if self.stats.closed_info.is_some() => return,
            _ => {}
        }
        if !self.supported || self.stats.info_err.is_some() {
            return;
        }
        let Some(handle) = self.inner.socket() else {
            return;
        };

        match sys::get_tcp_info(handle) {
            Ok(sys_info) => {
                let info = sys_info.into_info();
                match state {
                    ConnState::Opened => self.stats.opened_info = Some(info),
                    ConnState::Closed => self.stats.closed_info = Some(info),
                }
            }
            Err(err) => {
                log::debug!("TCP info snapshot failed ({}): {err}", state.as_str());
                self.stats.info_err = Some(err);
            }
        }
    }
}

impl<C: StreamConn> Read for StatsConn<C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf) {
            Ok(n) => {
                if n > 0 {
                    let ts = now_ns();
                    if self.stats.first_rx_at.is_none() {
                        self.stats.first_rx_at = Some(ts);
                    }
                    self.stats.last_rx_at = Some(ts);
                }
                self.stats.rx_bytes += n as u64;
                Ok(n)
            }
            Err(err) => {
                if !is_timeout(&err) {
                    self.stats.rx_err = Some(clone_io_error(&err));
                }
                Err(err)
            }
        }
    }
}

impl<C: StreamConn> Write for StatsConn<C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.inner.write(buf) {
            Ok(n) => {
                if n > 0 {
                    let ts = now_ns();
                    if self.stats.first_tx_at.is_none() {
                        self.stats.first_tx_at = Some(ts);
                    }
                    self.stats.last_tx_at = Some(ts);
                }
                self.stats.tx_bytes += n as u64;
                Ok(n)
            }
            Err(err) => {
                if !is_timeout(&err) {
                    self.stats.tx_err = Some(clone_io_error(&err));
                }
                Err(err)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<C: StreamConn> StreamConn for StatsConn<C> {
    fn close(&mut self) -> io::Result<()> {
        StatsConn::close(self)
    }

    fn socket(&self) -> Option<SocketHandle> {
        self.inner.socket()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ut_timeout_classification: only WouldBlock/TimedOut count as timeouts
    #[test]
    fn ut_timeout_classification() {
        assert!(is_timeout(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(is_timeout(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(!is_timeout(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_timeout(&io::Error::from(io::ErrorKind::BrokenPipe)));
    }

    // ut_now_ns_monotonic_enough: consecutive stamps never go backwards by
    // more than clock slew allows; mainly guards the unit (ns, not ms)
    #[test]
    fn ut_now_ns_monotonic_enough() {
        let a = now_ns();
        let b = now_ns();
        assert!(a > 1_600_000_000_000_000_000); // after Sep 2020, in ns
        assert!(b + 1_000_000_000 > a);
    }
}
