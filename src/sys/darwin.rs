// macOS acquisition — getsockopt(TCP_CONNECTION_INFO).
//
// xnu exposes a fixed-size tcp_connection_info structure, so there is no
// version ladder here: one call, one struct, every field always populated.
// Durations arrive in milliseconds and are normalized to nanoseconds.

use serde::{Deserialize, Serialize};

use crate::info::{OptionKind, TcpOption};
use crate::sys::{MetricKind, MetricSpec};

#[cfg(target_os = "macos")]
use crate::error::TcpInfoError;
#[cfg(target_os = "macos")]
use crate::info::Info;
#[cfg(target_os = "macos")]
use crate::sys::SocketHandle;

// ---------------------------------------------------------------------------
// Raw kernel structure
// ---------------------------------------------------------------------------

/// Byte-exact mirror of struct tcp_connection_info from xnu's
/// bsd/netinet/tcp.h. The u64 tail is aligned(8) in the kernel header,
/// which matches repr(C) here (the u32 block ends on an 8-byte boundary).
///
/// `tfo_flags` is the kernel's packed TCP Fast Open bitfield, kept raw.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawConnectionInfo {
    pub state: u8,
    pub snd_wscale: u8,
    pub rcv_wscale: u8,
    pub pad1: u8,
    pub options: u32,
    pub flags: u32,
    /// Retransmit timeout, milliseconds.
    pub rto: u32,
    pub maxseg: u32,
    pub snd_ssthresh: u32,
    pub snd_cwnd: u32,
    pub snd_wnd: u32,
    pub snd_sbbytes: u32,
    pub rcv_wnd: u32,
    /// Most recent RTT, milliseconds.
    pub rttcur: u32,
    /// Smoothed RTT, milliseconds.
    pub srtt: u32,
    pub rttvar: u32,
    pub tfo_flags: u32,
    pub txpackets: u64,
    pub txbytes: u64,
    pub txretransmitbytes: u64,
    pub rxpackets: u64,
    pub rxbytes: u64,
    pub rxoutoforderbytes: u64,
    pub txretransmitpackets: u64,
}

const _: () = assert!(std::mem::size_of::<RawConnectionInfo>() == 112);

// ---------------------------------------------------------------------------
// State, option and flag tables
// ---------------------------------------------------------------------------

// TCP states from xnu bsd/netinet/tcp_fsm.h.
pub const TCPS_CLOSED: u8 = 0;
pub const TCPS_LISTEN: u8 = 1;
pub const TCPS_SYN_SENT: u8 = 2;
pub const TCPS_SYN_RECEIVED: u8 = 3;
pub const TCPS_ESTABLISHED: u8 = 4;
pub const TCPS_CLOSE_WAIT: u8 = 5;
pub const TCPS_FIN_WAIT_1: u8 = 6;
pub const TCPS_CLOSING: u8 = 7;
pub const TCPS_LAST_ACK: u8 = 8;
pub const TCPS_FIN_WAIT_2: u8 = 9;
pub const TCPS_TIME_WAIT: u8 = 10;

fn state_name(state: u8) -> String {
    match state {
        TCPS_CLOSED => "CLOSE".to_string(),
        TCPS_LISTEN => "LISTEN".to_string(),
        TCPS_SYN_SENT => "SYN_SENT".to_string(),
        TCPS_SYN_RECEIVED => "SYN_RECV".to_string(),
        TCPS_ESTABLISHED => "ESTABLISHED".to_string(),
        TCPS_CLOSE_WAIT => "CLOSE_WAIT".to_string(),
        TCPS_FIN_WAIT_1 => "FIN_WAIT1".to_string(),
        TCPS_CLOSING => "CLOSING".to_string(),
        TCPS_LAST_ACK => "LAST_ACK".to_string(),
        TCPS_FIN_WAIT_2 => "FIN_WAIT2".to_string(),
        TCPS_TIME_WAIT => "TIME_WAIT".to_string(),
        n => format!("UNKNOWN({n})"),
    }
}

// TCPCI_OPT_* from xnu bsd/netinet/tcp.h.
const TCPCI_OPT_TIMESTAMPS: u32 = 0x01;
const TCPCI_OPT_SACK: u32 = 0x02;
const TCPCI_OPT_WSCALE: u32 = 0x04;
const TCPCI_OPT_ECN: u32 = 0x08;

const OPTION_FLAGS: [(u32, OptionKind); 4] = [
    (TCPCI_OPT_TIMESTAMPS, OptionKind::Timestamps),
    (TCPCI_OPT_SACK, OptionKind::Sack),
    (TCPCI_OPT_WSCALE, OptionKind::WindowScale),
    (TCPCI_OPT_ECN, OptionKind::Ecn),
];

// TCPCI_FLAG_* from xnu bsd/netinet/tcp.h.
const TCPCI_FLAG_LOSSRECOVERY: u32 = 0x01;
const TCPCI_FLAG_REORDERING_DETECTED: u32 = 0x02;

fn flags_string(flags: u32) -> String {
    let mut out = Vec::new();
    if flags & TCPCI_FLAG_LOSSRECOVERY != 0 {
        out.push("LOSS_RECOVERY");
    }
    if flags & TCPCI_FLAG_REORDERING_DETECTED != 0 {
        out.push("REORDERING_DETECTED");
    }
    out.join(",")
}

// ---------------------------------------------------------------------------
// Normalized record
// ---------------------------------------------------------------------------

/// xnu duration scalars are milliseconds.
const TIME_FIELD_UNIT_NS: u64 = 1_000_000;

fn msec_to_ns(v: u32) -> u64 {
    u64::from(v) * TIME_FIELD_UNIT_NS
}

/// The macOS tcp_connection_info record, unpacked and unit-normalized.
/// Duration fields are nanoseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SysInfo {
    pub state: u8,
    pub state_name: String,
    pub tx_wscale: u8,
    pub rx_wscale: u8,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tx_options: Vec<TcpOption>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rx_options: Vec<TcpOption>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub flags: String,
    /// Retransmit timeout in nanoseconds.
    pub rto: u64,
    pub max_seg: u32,
    pub tx_ssthresh: u32,
    /// Send congestion window in bytes.
    pub tx_cwindow_bytes: u32,
    /// Send window in bytes.
    pub tx_window: u32,
    /// Bytes in the send socket buffer, including in-flight data.
    pub tx_buffered_bytes: u32,
    /// Receive window in bytes.
    pub rx_window: u32,
    /// Most recent RTT in nanoseconds.
    pub rtt_cur: u64,
    /// Smoothed RTT in nanoseconds.
    pub rtt: u64,
    pub rtt_var: u64,
    /// Raw TCP Fast Open bitfield, as reported by the kernel.
    pub tfo_flags: u32,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub tx_retransmit_bytes: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub rx_out_of_order_bytes: u64,
    pub tx_retransmit_packets: u64,
}

impl RawConnectionInfo {
    /// Unpack into the normalized record, converting ms durations to ns.
    pub fn unpack(&self) -> SysInfo {
        let mut out = SysInfo {
            state: self.state,
            state_name: state_name(self.state),
            tx_wscale: self.snd_wscale,
            rx_wscale: self.rcv_wscale,
            flags: flags_string(self.flags),
            rto: msec_to_ns(self.rto),
            max_seg: self.maxseg,
            tx_ssthresh: self.snd_ssthresh,
            tx_cwindow_bytes: self.snd_cwnd,
            tx_window: self.snd_wnd,
            tx_buffered_bytes: self.snd_sbbytes,
            rx_window: self.rcv_wnd,
            rtt_cur: msec_to_ns(self.rttcur),
            rtt: msec_to_ns(self.srtt),
            rtt_var: msec_to_ns(self.rttvar),
            tfo_flags: self.tfo_flags,
            tx_packets: self.txpackets,
            tx_bytes: self.txbytes,
            tx_retransmit_bytes: self.txretransmitbytes,
            rx_packets: self.rxpackets,
            rx_bytes: self.rxbytes,
            rx_out_of_order_bytes: self.rxoutoforderbytes,
            tx_retransmit_packets: self.txretransmitpackets,
            ..SysInfo::default()
        };

        for (flag, kind) in OPTION_FLAGS {
            if self.options & flag == 0 {
                continue;
            }
            if flag == TCPCI_OPT_WSCALE {
                // Unlike Linux, the payload here is the scale itself; xnu
                // does not report post-scaling window sizes per side.
                out.tx_options
                    .push(TcpOption::with_value(kind, u64::from(self.snd_wscale)));
                out.rx_options
                    .push(TcpOption::with_value(kind, u64::from(self.rcv_wscale)));
            } else {
                out.tx_options.push(TcpOption::flag(kind));
                out.rx_options.push(TcpOption::flag(kind));
            }
        }

        out
    }
}

#[cfg(target_os = "macos")]
impl SysInfo {
    /// Project into the platform-agnostic interface record.
    pub fn into_info(self) -> Info {
        Info {
            state: self.state_name.clone(),
            tx_options: self.tx_options.clone(),
            rx_options: self.rx_options.clone(),
            tx_mss: u64::from(self.max_seg),
            rx_mss: u64::from(self.max_seg),
            rtt: self.rtt,
            rtt_var: self.rtt_var,
            rto: self.rto,
            rx_window: u64::from(self.rx_window),
            tx_ssthreshold: u64::from(self.tx_ssthresh),
            tx_cwindow_bytes: u64::from(self.tx_cwindow_bytes),
            retransmits: self.tx_retransmit_packets,
            sys: self,
            ..Info::default()
        }
    }
}

impl SysInfo {
    /// Compact `key=value` strings for conditions worth surfacing.
    pub fn warnings(&self) -> Vec<String> {
        let mut warns = Vec::new();
        if self.tx_retransmit_bytes > 0 {
            warns.push(format!("retransmitBytes={}", self.tx_retransmit_bytes));
        }
        if self.tx_retransmit_packets > 0 {
            warns.push(format!("retransmitPackets={}", self.tx_retransmit_packets));
        }
        if self.rx_out_of_order_bytes > 0 {
            warns.push(format!("outOfOrderBytes={}", self.rx_out_of_order_bytes));
        }
        if !self.flags.is_empty() {
            warns.push(format!("flags={}", self.flags));
        }
        warns
    }
}

// ---------------------------------------------------------------------------
// Acquisition
// ---------------------------------------------------------------------------

/// xnu has exported tcp_connection_info on every release this crate can
/// run on.
#[cfg(target_os = "macos")]
pub fn supported() -> bool {
    true
}

/// Fetch and normalize tcp_connection_info for a socket.
#[cfg(target_os = "macos")]
pub fn get_tcp_info(fd: SocketHandle) -> Result<SysInfo, TcpInfoError> {
    let mut raw = RawConnectionInfo::default();
    let mut len = std::mem::size_of::<RawConnectionInfo>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_CONNECTION_INFO,
            &mut raw as *mut RawConnectionInfo as *mut libc::c_void,
            &mut len,
        )
    };
    if ret != 0 {
        return Err(TcpInfoError::from_last_os_error());
    }
    Ok(raw.unpack())
}

// ---------------------------------------------------------------------------
// Metric schema
// ---------------------------------------------------------------------------

macro_rules! gauge {
    ($name:literal, $help:literal, $read:expr) => {
        MetricSpec {
            name: $name,
            kind: MetricKind::Gauge,
            help: $help,
            read: $read,
        }
    };
}

macro_rules! counter {
    ($name:literal, $help:literal, $read:expr) => {
        MetricSpec {
            name: $name,
            kind: MetricKind::Counter,
            help: $help,
            read: $read,
        }
    };
}

/// One metric per numeric field of the normalized record.
pub fn metrics() -> &'static [MetricSpec<SysInfo>] {
    static METRICS: &[MetricSpec<SysInfo>] = &[
        gauge!("tcpinfo_state", "Connection state, see bsd/netinet/tcp_fsm.h.", |s| {
            Some(f64::from(s.state))
        }),
        gauge!("tcpinfo_snd_wscale", "Window scaling of send-half of connection.", |s| {
            Some(f64::from(s.tx_wscale))
        }),
        gauge!("tcpinfo_rcv_wscale", "Window scaling of receive-half of connection.", |s| {
            Some(f64::from(s.rx_wscale))
        }),
        gauge!("tcpinfo_rto", "Retransmit timeout in nanoseconds.", |s| {
            Some(s.rto as f64)
        }),
        gauge!("tcpinfo_max_seg", "Maximum segment size supported, bytes.", |s| {
            Some(f64::from(s.max_seg))
        }),
        gauge!("tcpinfo_snd_ssthresh", "Slow start threshold in bytes.", |s| {
            Some(f64::from(s.tx_ssthresh))
        }),
        gauge!("tcpinfo_snd_cwnd", "Send congestion window in bytes.", |s| {
            Some(f64::from(s.tx_cwindow_bytes))
        }),
        gauge!("tcpinfo_snd_wnd", "Send window in bytes.", |s| {
            Some(f64::from(s.tx_window))
        }),
        gauge!("tcpinfo_snd_sbbytes", "Bytes in send socket buffer, including in-flight.", |s| {
            Some(f64::from(s.tx_buffered_bytes))
        }),
        gauge!("tcpinfo_rcv_wnd", "Receive window in bytes.", |s| {
            Some(f64::from(s.rx_window))
        }),
        gauge!("tcpinfo_rtt_cur", "Most recent RTT in nanoseconds.", |s| {
            Some(s.rtt_cur as f64)
        }),
        gauge!("tcpinfo_srtt", "Smoothed RTT in nanoseconds.", |s| {
            Some(s.rtt as f64)
        }),
        gauge!("tcpinfo_rttvar", "RTT variance in nanoseconds.", |s| {
            Some(s.rtt_var as f64)
        }),
        gauge!("tcpinfo_tfo_flags", "Raw TCP Fast Open flags bitfield.", |s| {
            Some(f64::from(s.tfo_flags))
        }),
        counter!("tcpinfo_tx_packets", "Packets sent.", |s| {
            Some(s.tx_packets as f64)
        }),
        counter!("tcpinfo_tx_bytes", "Bytes sent.", |s| {
            Some(s.tx_bytes as f64)
        }),
        counter!("tcpinfo_tx_retransmit_bytes", "Bytes retransmitted.", |s| {
            Some(s.tx_retransmit_bytes as f64)
        }),
        counter!("tcpinfo_rx_packets", "Packets received.", |s| {
            Some(s.rx_packets as f64)
        }),
        counter!("tcpinfo_rx_bytes", "Bytes received.", |s| {
            Some(s.rx_bytes as f64)
        }),
        counter!("tcpinfo_rx_out_of_order_bytes", "Out-of-order bytes received.", |s| {
            Some(s.rx_out_of_order_bytes as f64)
        }),
        counter!("tcpinfo_tx_retransmit_packets", "Packets retransmitted.", |s| {
            Some(s.tx_retransmit_packets as f64)
        }),
    ];
    METRICS
}

#[cfg(test)]
mod tests {
    use super::*;

    // ut_ms_to_ns: millisecond durations normalize to nanoseconds
    #[test]
    fn ut_ms_to_ns() {
        let raw = RawConnectionInfo {
            srtt: 5,
            rttvar: 2,
            rto: 200,
            rttcur: 7,
            ..RawConnectionInfo::default()
        };
        let sys = raw.unpack();
        assert_eq!(sys.rtt, 5_000_000);
        assert_eq!(sys.rtt_var, 2_000_000);
        assert_eq!(sys.rto, 200_000_000);
        assert_eq!(sys.rtt_cur, 7_000_000);
    }

    // ut_state_table: xnu state numbering, unknown -> UNKNOWN(n)
    #[test]
    fn ut_state_table() {
        assert_eq!(state_name(TCPS_CLOSED), "CLOSE");
        assert_eq!(state_name(TCPS_ESTABLISHED), "ESTABLISHED");
        assert_eq!(state_name(TCPS_FIN_WAIT_2), "FIN_WAIT2");
        assert_eq!(state_name(TCPS_TIME_WAIT), "TIME_WAIT");
        assert_eq!(state_name(42), "UNKNOWN(42)");
    }

    // ut_options_scales: WindowScale entries carry the per-side scales
    #[test]
    fn ut_options_scales() {
        let raw = RawConnectionInfo {
            options: TCPCI_OPT_SACK | TCPCI_OPT_WSCALE,
            snd_wscale: 6,
            rcv_wscale: 5,
            ..RawConnectionInfo::default()
        };
        let sys = raw.unpack();
        assert_eq!(
            sys.tx_options,
            vec![
                TcpOption::flag(OptionKind::Sack),
                TcpOption::with_value(OptionKind::WindowScale, 6),
            ]
        );
        assert_eq!(
            sys.rx_options,
            vec![
                TcpOption::flag(OptionKind::Sack),
                TcpOption::with_value(OptionKind::WindowScale, 5),
            ]
        );
    }

    // ut_flags_string: joined symbolic flags
    #[test]
    fn ut_flags_string() {
        assert_eq!(flags_string(0), "");
        assert_eq!(flags_string(0x1), "LOSS_RECOVERY");
        assert_eq!(flags_string(0x3), "LOSS_RECOVERY,REORDERING_DETECTED");
    }

    // ut_into_info_projection: cwnd lands in the bytes slot, never segments
    #[test]
    #[cfg(target_os = "macos")]
    fn ut_into_info_projection() {
        let raw = RawConnectionInfo {
            state: TCPS_ESTABLISHED,
            maxseg: 1460,
            snd_cwnd: 14600,
            rcv_wnd: 131072,
            txretransmitpackets: 2,
            ..RawConnectionInfo::default()
        };
        let info = raw.unpack().into_info();
        assert_eq!(info.state, "ESTABLISHED");
        assert_eq!(info.tx_mss, 1460);
        assert_eq!(info.rx_mss, 1460);
        assert_eq!(info.tx_cwindow_bytes, 14600);
        assert_eq!(info.tx_cwindow_segs, 0);
        assert_eq!(info.rx_window, 131072);
        assert_eq!(info.retransmits, 2);
        assert_eq!(info.ato, 0);
    }
}
