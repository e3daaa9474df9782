// Kernel version probe.
//
// The Linux tcp_info structure grows across kernel releases, so the
// acquisition layer needs to know the running kernel's version exactly once
// per process. The parse half is plain string handling and compiles (and is
// tested) on every platform; the uname(2) half is Linux-only.

use crate::error::TcpInfoError;

/// A kernel release as an ordered (kernel, major, minor) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct KernelVersion {
    pub kernel: u32,
    pub major: u32,
    pub minor: u32,
}

impl KernelVersion {
    pub const fn new(kernel: u32, major: u32, minor: u32) -> Self {
        Self {
            kernel,
            major,
            minor,
        }
    }
}

impl std::fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.kernel, self.major, self.minor)
    }
}

/// Parse a uname release string like `5.15.0-91-generic` or `6.7`.
///
/// Only the leading dotted-numeric prefix is considered; everything from the
/// first character that is neither a digit nor a dot is ignored. At least
/// kernel and major must be present; a missing minor defaults to 0.
pub fn parse_release(release: &str) -> Option<KernelVersion> {
    let numeric: &str = release
        .split(|c: char| !c.is_ascii_digit() && c != '.')
        .next()
        .unwrap_or("");

    let mut parts = numeric.split('.');
    let kernel: u32 = parts.next()?.parse().ok()?;
    let major: u32 = parts.next()?.parse().ok()?;
    let minor: u32 = match parts.next() {
        Some("") | None => 0,
        Some(s) => s.parse().ok()?,
    };

    Some(KernelVersion::new(kernel, major, minor))
}

/// Query the running kernel's version via uname(2).
#[cfg(target_os = "linux")]
pub fn detect() -> Result<KernelVersion, TcpInfoError> {
    let mut uts: libc::utsname = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::uname(&mut uts) };
    if ret != 0 {
        return Err(TcpInfoError::Os(std::io::Error::last_os_error()));
    }

    let release = unsafe { std::ffi::CStr::from_ptr(uts.release.as_ptr()) };
    let release = release.to_string_lossy();
    parse_release(&release).ok_or_else(|| TcpInfoError::KernelVersion(release.into_owned()))
}

#[cfg(not(target_os = "linux"))]
pub fn detect() -> Result<KernelVersion, TcpInfoError> {
    Err(TcpInfoError::Unsupported)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ut_parse_distro_release: trailing distro suffix is ignored
    #[test]
    fn ut_parse_distro_release() {
        assert_eq!(
            parse_release("5.15.0-91-generic"),
            Some(KernelVersion::new(5, 15, 0))
        );
        assert_eq!(
            parse_release("4.18.0-477.el8.x86_64"),
            Some(KernelVersion::new(4, 18, 0))
        );
    }

    // ut_parse_two_components: missing minor defaults to zero
    #[test]
    fn ut_parse_two_components() {
        assert_eq!(parse_release("6.7"), Some(KernelVersion::new(6, 7, 0)));
        assert_eq!(parse_release("3.8+"), Some(KernelVersion::new(3, 8, 0)));
    }

    // ut_parse_garbage: non-numeric or single-component strings fail
    #[test]
    fn ut_parse_garbage() {
        assert_eq!(parse_release(""), None);
        assert_eq!(parse_release("linux"), None);
        assert_eq!(parse_release("5"), None);
        assert_eq!(parse_release("a.b.c"), None);
    }

    // ut_version_ordering: Ord follows (kernel, major, minor) precedence
    #[test]
    fn ut_version_ordering() {
        assert!(KernelVersion::new(5, 4, 0) > KernelVersion::new(4, 19, 200));
        assert!(KernelVersion::new(5, 5, 0) > KernelVersion::new(5, 4, 99));
        assert!(KernelVersion::new(2, 6, 1) < KernelVersion::new(2, 6, 2));
        assert_eq!(KernelVersion::new(6, 2, 0), KernelVersion::new(6, 2, 0));
    }
}
