#[derive(Debug, thiserror::Error)]
pub enum TcpInfoError {
    #[error("per-socket TCP information is not available on this platform or kernel")]
    Unsupported,
    #[error("operation would block")]
    WouldBlock,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("no such entry")]
    NoSuchEntry,
    #[error("cannot parse kernel release string: {0:?}")]
    KernelVersion(String),
    #[error("OS error: {0}")]
    Os(#[source] std::io::Error),
}

impl TcpInfoError {
    /// Map the errno left behind by a failed socket call.
    ///
    /// EAGAIN/EINVAL/ENOENT get dedicated variants; anything else is
    /// carried verbatim as `Os`.
    #[cfg(unix)]
    pub(crate) fn from_last_os_error() -> Self {
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EAGAIN) => TcpInfoError::WouldBlock,
            Some(libc::EINVAL) => TcpInfoError::InvalidArgument,
            Some(libc::ENOENT) => TcpInfoError::NoSuchEntry,
            _ => TcpInfoError::Os(err),
        }
    }

    /// Map a WSA error code from `WSAGetLastError`.
    #[cfg(windows)]
    pub(crate) fn from_wsa_error(code: i32) -> Self {
        use windows_sys::Win32::Networking::WinSock::{WSAEINVAL, WSAEWOULDBLOCK};
        match code {
            WSAEWOULDBLOCK => TcpInfoError::WouldBlock,
            WSAEINVAL => TcpInfoError::InvalidArgument,
            _ => TcpInfoError::Os(std::io::Error::from_raw_os_error(code)),
        }
    }

    /// Returns true for the invalid-argument class of failures (used by the
    /// Windows v1 -> v0 ioctl fallback).
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, TcpInfoError::InvalidArgument)
    }
}
