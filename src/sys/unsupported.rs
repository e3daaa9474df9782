// Fallback for platforms without a per-socket TCP info interface.

use serde::{Deserialize, Serialize};

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
use crate::error::TcpInfoError;
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
use crate::info::Info;
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
use crate::sys::{MetricSpec, SocketHandle};

/// Empty placeholder record; never produced, since acquisition always fails.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SysInfo {}

impl SysInfo {
    pub fn warnings(&self) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
impl SysInfo {
    pub fn into_info(self) -> Info {
        Info {
            sys: self,
            ..Info::default()
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
pub fn supported() -> bool {
    false
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
pub fn get_tcp_info(_handle: SocketHandle) -> Result<SysInfo, TcpInfoError> {
    Err(TcpInfoError::Unsupported)
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
pub fn metrics() -> &'static [MetricSpec<SysInfo>] {
    &[]
}
