//! Per-connection TCP observability.
//!
//! `sockscope` augments TCP byte-stream connections with application-level
//! counters and snapshots of the kernel's per-socket TCP statistics
//! (`tcp_info` on Linux, `tcp_connection_info` on macOS, `TCP_INFO_v0`/`v1`
//! on Windows), normalized into one platform-agnostic record with
//! nanosecond durations.
//!
//! Three layers:
//!
//! - [`sys`]: acquire the kernel's raw record from a socket handle and
//!   normalize it. On Linux a one-time kernel-version probe decides how
//!   many bytes to request and which fields are trustworthy.
//! - [`StatsConn`]: a transparent wrapper around any [`StreamConn`] that
//!   tracks bytes, timestamps and errors, and gathers one snapshot at wrap
//!   time and one at close.
//! - [`TcpInfoCollector`]: a thread-safe registry of live connections that
//!   emits pull-based metric samples and evicts members whose stats can no
//!   longer be read.
//!
//! ```no_run
//! use std::io::Write;
//! use std::net::TcpStream;
//! use sockscope::StatsConn;
//!
//! # fn main() -> std::io::Result<()> {
//! let conn = TcpStream::connect("example.com:80")?;
//! let mut conn = StatsConn::wrap(
//!     conn,
//!     Some(Box::new(|stats, state| {
//!         println!("{}: {:?}", state.as_str(), stats.opened_at);
//!     })),
//! );
//! conn.write_all(b"GET / HTTP/1.0\r\n\r\n")?;
//! conn.close()?;
//! # Ok(())
//! # }
//! ```

pub mod collector;
pub mod conn;
pub mod error;
pub mod info;
pub mod kernel;
pub mod sys;

pub use collector::{Descriptor, ErrorFn, Sample, TcpInfoCollector};
pub use conn::{ConnState, ConnStats, ReportFn, StatsConn, StreamConn};
pub use error::TcpInfoError;
pub use info::{Info, Nullable, OptionKind, TcpOption};
pub use sys::{get_tcp_info, supported, MetricKind, MetricSpec, SocketHandle, SysInfo};
