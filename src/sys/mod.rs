// Platform-abstracted TCP kernel statistics.
//
// On Linux: getsockopt(TCP_INFO) with runtime kernel-version adaptation.
// On macOS: getsockopt(TCP_CONNECTION_INFO).
// On Windows: WSAIoctl(SIO_TCP_INFO), version 1 with a version 0 fallback.
//
// All platforms export:
//   - SysInfo: the platform-specific normalized record
//   - get_tcp_info(handle) -> Result<SysInfo, TcpInfoError>
//   - supported() -> bool
//   - metrics() -> &'static [MetricSpec<SysInfo>]
//
// Every module's raw structures and unpack logic are plain portable code so
// they compile (and their unit tests run) on every platform; only the kernel
// call itself is target-gated.

pub mod darwin;
pub mod linux;
pub mod unsupported;
pub mod windows;

/// The OS-native identity of an open socket.
///
/// Borrowed transiently for each kernel call; never owned by this crate and
/// never dereferenced after the host closes the socket.
#[cfg(unix)]
pub type SocketHandle = std::os::unix::io::RawFd;
#[cfg(windows)]
pub type SocketHandle = std::os::windows::io::RawSocket;
#[cfg(not(any(unix, windows)))]
pub type SocketHandle = i32;

/// Pull-based metric classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

/// One metric derived from a numeric field of the normalized record.
///
/// `read` returns `None` when the field is a nullable the current kernel
/// does not populate; such metrics are omitted from that connection's
/// sample set.
pub struct MetricSpec<S> {
    pub name: &'static str,
    pub kind: MetricKind,
    pub help: &'static str,
    pub read: fn(&S) -> Option<f64>,
}

#[cfg(target_os = "linux")]
pub use linux::{get_tcp_info, metrics, supported, SysInfo};

#[cfg(target_os = "macos")]
pub use darwin::{get_tcp_info, metrics, supported, SysInfo};

#[cfg(target_os = "windows")]
pub use windows::{get_tcp_info, metrics, supported, SysInfo};

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
pub use unsupported::{get_tcp_info, metrics, supported, SysInfo};
