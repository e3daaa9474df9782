// Linux acquisition — getsockopt(TCP_INFO) plus congestion-control extras.
//
// One statically compiled binary has to work from kernel 2.6.2 through the
// latest release, and struct tcp_info has grown a dozen times in between.
// The strategy: detect the kernel version once, request exactly the number
// of bytes that kernel exports, and mark every field that appeared later
// than the running kernel as invalid instead of reporting its zero fill.

use serde::{Deserialize, Serialize};

use crate::info::{Nullable, OptionKind, TcpOption};
use crate::kernel::KernelVersion;
use crate::sys::{MetricKind, MetricSpec};

#[cfg(target_os = "linux")]
use crate::error::TcpInfoError;
#[cfg(target_os = "linux")]
use crate::info::Info;
#[cfg(target_os = "linux")]
use crate::sys::SocketHandle;

// ---------------------------------------------------------------------------
// Capability ladder
// ---------------------------------------------------------------------------

/// Kernel versions at which tcp_info grew, with the struct size each tier
/// exports. The probe picks the highest tier the running kernel meets.
const LADDER: [(KernelVersion, usize); 13] = [
    (KernelVersion::new(2, 6, 2), 104),
    (KernelVersion::new(3, 15, 0), 120),
    (KernelVersion::new(4, 1, 0), 136),
    (KernelVersion::new(4, 2, 0), 144),
    (KernelVersion::new(4, 6, 0), 160),
    (KernelVersion::new(4, 9, 0), 168),
    (KernelVersion::new(4, 10, 0), 192),
    (KernelVersion::new(4, 18, 0), 200),
    (KernelVersion::new(4, 19, 0), 224),
    (KernelVersion::new(5, 4, 0), 232),
    (KernelVersion::new(5, 5, 0), 232),
    (KernelVersion::new(6, 2, 0), 240),
    (KernelVersion::new(6, 7, 0), 248),
];

fn tier_size(tier: KernelVersion) -> usize {
    LADDER
        .iter()
        .find(|(v, _)| *v == tier)
        .map(|(_, s)| *s)
        .unwrap_or(usize::MAX)
}

/// What the running kernel can be trusted to populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caps {
    version: KernelVersion,
    info_len: usize,
}

impl Caps {
    /// Derive capabilities for a given kernel version.
    ///
    /// A kernel older than 2.6.2 gets a zero struct length, which
    /// `supported()` and `get_tcp_info()` treat as unsupported.
    pub fn for_version(version: KernelVersion) -> Self {
        let info_len = LADDER
            .iter()
            .rev()
            .find(|(v, _)| version >= *v)
            .map(|(_, s)| *s)
            .unwrap_or(0);
        Self { version, info_len }
    }

    /// True iff the running kernel is at least `v`.
    pub fn supports(&self, v: KernelVersion) -> bool {
        self.version >= v
    }

    /// Bytes of tcp_info the kernel exports at its tier.
    pub fn structure_bytes(&self) -> usize {
        self.info_len
    }

    /// Clamp to the byte count the kernel actually wrote back, so fields
    /// past the populated prefix are never exposed.
    pub fn truncate(&self, written: usize) -> Self {
        Self {
            version: self.version,
            info_len: self.info_len.min(written),
        }
    }

    /// A sized field is present iff its tier is met and its bytes fall
    /// within the populated prefix.
    fn has(&self, tier: KernelVersion) -> bool {
        self.supports(tier) && tier_size(tier) <= self.info_len
    }
}

// ---------------------------------------------------------------------------
// Raw kernel structures
// ---------------------------------------------------------------------------

/// Byte-exact mirror of struct tcp_info (current as of kernel 6.7).
///
/// `bitfield0` packs snd_wscale (low nibble) and rcv_wscale (high nibble);
/// `bitfield1` packs delivery_rate_app_limited (bit 0) and
/// fastopen_client_fail (bits 1-2). The two packed bytes have occupied the
/// same offsets since 2.6 because of alignment, so older kernels simply
/// leave the newer bits zero.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawTcpInfo {
    pub state: u8,
    pub ca_state: u8,
    pub retransmits: u8,
    pub probes: u8,
    pub backoff: u8,
    pub options: u8,
    pub bitfield0: u8,
    pub bitfield1: u8,
    pub rto: u32,
    pub ato: u32,
    pub snd_mss: u32,
    pub rcv_mss: u32,
    pub unacked: u32,
    pub sacked: u32,
    pub lost: u32,
    pub retrans: u32,
    pub fackets: u32,
    pub last_data_sent: u32,
    pub last_ack_sent: u32,
    pub last_data_recv: u32,
    pub last_ack_recv: u32,
    pub pmtu: u32,
    pub rcv_ssthresh: u32,
    pub rtt: u32,
    pub rttvar: u32,
    pub snd_ssthresh: u32,
    pub snd_cwnd: u32,
    pub advmss: u32,
    pub reordering: u32,
    pub rcv_rtt: u32,
    pub rcv_space: u32,
    pub total_retrans: u32,
    // 3.15
    pub pacing_rate: u64,
    pub max_pacing_rate: u64,
    // 4.1
    pub bytes_acked: u64,
    pub bytes_received: u64,
    // 4.2
    pub segs_out: u32,
    pub segs_in: u32,
    // 4.6
    pub notsent_bytes: u32,
    pub min_rtt: u32,
    pub data_segs_in: u32,
    pub data_segs_out: u32,
    // 4.9
    pub delivery_rate: u64,
    // 4.10
    pub busy_time: u64,
    pub rwnd_limited: u64,
    pub sndbuf_limited: u64,
    // 4.18
    pub delivered: u32,
    pub delivered_ce: u32,
    // 4.19
    pub bytes_sent: u64,
    pub bytes_retrans: u64,
    pub dsack_dups: u32,
    pub reord_seen: u32,
    // 5.4
    pub rcv_ooopack: u32,
    pub snd_wnd: u32,
    // 6.2
    pub rcv_wnd: u32,
    pub rehash: u32,
    // 6.7
    pub total_rto: u16,
    pub total_rto_recoveries: u16,
    pub total_rto_time: u32,
}

const _: () = assert!(std::mem::size_of::<RawTcpInfo>() == 248);

/// struct tcpvegas_info from uapi/linux/tcp.h.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpVegasInfo {
    pub enabled: u32,
    pub rttcnt: u32,
    pub rtt: u32,
    pub minrtt: u32,
}

/// struct tcp_bbr_info from uapi/linux/tcp.h.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpBbrInfo {
    pub bw_lo: u32,
    pub bw_hi: u32,
    pub min_rtt: u32,
    pub pacing_gain: u32,
    pub cwnd_gain: u32,
}

/// struct tcp_dctcp_info from uapi/linux/tcp.h.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDctcpInfo {
    pub enabled: u16,
    pub ce_state: u16,
    pub alpha: u32,
    pub ab_ecn: u32,
    pub ab_tot: u32,
}

const _: () = assert!(std::mem::size_of::<TcpVegasInfo>() == 16);
const _: () = assert!(std::mem::size_of::<TcpBbrInfo>() == 20);
const _: () = assert!(std::mem::size_of::<TcpDctcpInfo>() == 16);

/// Algorithm-specific congestion-control block, fetched by name after the
/// main TCP_INFO call. The three variants are mutually exclusive.
#[derive(Debug, Clone, Copy)]
pub enum CcInfo {
    Vegas(TcpVegasInfo),
    Bbr(TcpBbrInfo),
    Dctcp(TcpDctcpInfo),
}

// ---------------------------------------------------------------------------
// State and option tables
// ---------------------------------------------------------------------------

// TCP states from include/net/tcp_states.h.
pub const TCP_ESTABLISHED: u8 = 1;
pub const TCP_SYN_SENT: u8 = 2;
pub const TCP_SYN_RECV: u8 = 3;
pub const TCP_FIN_WAIT1: u8 = 4;
pub const TCP_FIN_WAIT2: u8 = 5;
pub const TCP_TIME_WAIT: u8 = 6;
pub const TCP_CLOSE: u8 = 7;
pub const TCP_CLOSE_WAIT: u8 = 8;
pub const TCP_LAST_ACK: u8 = 9;
pub const TCP_LISTEN: u8 = 10;
pub const TCP_CLOSING: u8 = 11;
pub const TCP_NEW_SYN_RECV: u8 = 12;

fn state_name(state: u8) -> String {
    match state {
        TCP_ESTABLISHED => "ESTABLISHED".to_string(),
        TCP_SYN_SENT => "SYN_SENT".to_string(),
        TCP_SYN_RECV => "SYN_RECV".to_string(),
        TCP_FIN_WAIT1 => "FIN_WAIT1".to_string(),
        TCP_FIN_WAIT2 => "FIN_WAIT2".to_string(),
        TCP_TIME_WAIT => "TIME_WAIT".to_string(),
        TCP_CLOSE => "CLOSE".to_string(),
        TCP_CLOSE_WAIT => "CLOSE_WAIT".to_string(),
        TCP_LAST_ACK => "LAST_ACK".to_string(),
        TCP_LISTEN => "LISTEN".to_string(),
        TCP_CLOSING => "CLOSING".to_string(),
        TCP_NEW_SYN_RECV => "NEW_SYN_RECV".to_string(),
        n => format!("UNKNOWN({n})"),
    }
}

// TCPI_OPT_* flags from uapi/linux/tcp.h.
const TCPI_OPT_TIMESTAMPS: u8 = 1;
const TCPI_OPT_SACK: u8 = 2;
const TCPI_OPT_WSCALE: u8 = 4;
const TCPI_OPT_ECN: u8 = 8;
const TCPI_OPT_ECN_SEEN: u8 = 16;
const TCPI_OPT_SYN_DATA: u8 = 32;
const TCPI_OPT_USEC_TS: u8 = 64;
const TCPI_OPT_TFO_CHILD: u8 = 128;

const OPTION_FLAGS: [(u8, OptionKind); 8] = [
    (TCPI_OPT_TIMESTAMPS, OptionKind::Timestamps),
    (TCPI_OPT_SACK, OptionKind::Sack),
    (TCPI_OPT_WSCALE, OptionKind::WindowScale),
    (TCPI_OPT_ECN, OptionKind::Ecn),
    (TCPI_OPT_ECN_SEEN, OptionKind::EcnSeen),
    (TCPI_OPT_SYN_DATA, OptionKind::SynData),
    (TCPI_OPT_USEC_TS, OptionKind::UsecTs),
    (TCPI_OPT_TFO_CHILD, OptionKind::TfoChild),
];

// ---------------------------------------------------------------------------
// Normalized record
// ---------------------------------------------------------------------------

/// Kernel duration scalars (rto, ato, rtt, ...) are microseconds.
const TIME_FIELD_UNIT_NS: u64 = 1_000;

fn usec_to_ns(v: u32) -> u64 {
    u64::from(v) * TIME_FIELD_UNIT_NS
}

/// The Linux tcp_info record, unpacked and unit-normalized.
///
/// Duration fields are nanoseconds. Fields younger than kernel 2.6.2 are
/// `Nullable`, valid only when the running kernel's tier covers them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SysInfo {
    pub state: u8,
    pub state_name: String,
    pub ca_state: u8,
    pub retransmits: u8,
    pub probes: u8,
    pub backoff: u8,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tx_options: Vec<TcpOption>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rx_options: Vec<TcpOption>,
    pub tx_wscale: u8,
    pub rx_wscale: u8,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub delivery_rate_app_limited: Nullable<bool>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub fast_open_client_fail: Nullable<u8>,
    /// Retransmission timeout in nanoseconds.
    pub rto: u64,
    /// Delayed-ACK timeout in nanoseconds.
    pub ato: u64,
    pub tx_mss: u32,
    pub rx_mss: u32,
    pub unacked: u32,
    pub sacked: u32,
    pub lost: u32,
    pub retrans: u32,
    pub fackets: u32,
    /// Time since last data segment sent, nanoseconds.
    pub last_tx_at: u64,
    /// Time since last ACK sent, nanoseconds. Not tracked by the kernel.
    pub last_tx_ack_at: u64,
    /// Time since last data segment received, nanoseconds.
    pub last_rx_at: u64,
    /// Time since last ACK received, nanoseconds.
    pub last_rx_ack_at: u64,
    pub pmtu: u32,
    pub rx_ssthresh: u32,
    /// Smoothed RTT in nanoseconds.
    pub rtt: u64,
    pub rtt_var: u64,
    pub tx_ssthresh: u32,
    /// Congestion window in segments.
    pub tx_cwindow: u32,
    pub adv_mss: u32,
    pub reordering: u32,
    /// Receiver-side RTT estimate in nanoseconds.
    pub rx_rtt: u64,
    pub rx_space: u32,
    pub total_retrans: u32,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub pacing_rate: Nullable<u64>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub max_pacing_rate: Nullable<u64>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub bytes_acked: Nullable<u64>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub bytes_received: Nullable<u64>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub segs_out: Nullable<u32>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub segs_in: Nullable<u32>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub not_sent_bytes: Nullable<u32>,
    /// Minimum RTT in nanoseconds.
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub min_rtt: Nullable<u64>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub data_segs_in: Nullable<u32>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub data_segs_out: Nullable<u32>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub delivery_rate: Nullable<u64>,
    /// Time busy sending, microseconds as reported.
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub busy_time: Nullable<u64>,
    /// Time limited by receive window, microseconds as reported.
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub rx_window_limited: Nullable<u64>,
    /// Time limited by send buffer, microseconds as reported.
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub tx_buffer_limited: Nullable<u64>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub delivered: Nullable<u32>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub delivered_ce: Nullable<u32>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub bytes_sent: Nullable<u64>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub bytes_retrans: Nullable<u64>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub dsack_dups: Nullable<u32>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub reord_seen: Nullable<u32>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub rx_out_of_order: Nullable<u32>,
    /// Peer's advertised receive window after scaling, bytes.
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub tx_window: Nullable<u32>,
    /// Local advertised receive window after scaling, bytes.
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub rx_window: Nullable<u32>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub rehash: Nullable<u32>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub total_rto: Nullable<u16>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub total_rto_recoveries: Nullable<u16>,
    /// Total time in RTO recoveries, milliseconds as reported.
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub total_rto_time: Nullable<u32>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cc_algorithm: String,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub cc_vegas_enabled: Nullable<u32>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub cc_vegas_rtt_cnt: Nullable<u32>,
    /// Average Vegas RTT sample in nanoseconds.
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub cc_vegas_rtt: Nullable<u64>,
    /// Minimum Vegas RTT sample in nanoseconds.
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub cc_vegas_rtt_min: Nullable<u64>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub cc_bbr_bw_lo: Nullable<u32>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub cc_bbr_bw_hi: Nullable<u32>,
    /// BBR minimum RTT estimate in nanoseconds.
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub cc_bbr_min_rtt: Nullable<u64>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub cc_bbr_pacing_gain: Nullable<u32>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub cc_bbr_cwindow_gain: Nullable<u32>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub cc_dctcp_enabled: Nullable<bool>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub cc_dctcp_ce_state: Nullable<u16>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub cc_dctcp_alpha: Nullable<u32>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub cc_dctcp_ab_ecn: Nullable<u32>,
    #[serde(skip_serializing_if = "Nullable::is_none")]
    pub cc_dctcp_ab_tot: Nullable<u32>,
}

impl RawTcpInfo {
    /// Unpack into the normalized record, splitting the packed bytes and
    /// marking fields outside the kernel's tier invalid.
    pub fn unpack(&self, caps: &Caps) -> SysInfo {
        let mut out = SysInfo {
            state: self.state,
            state_name: state_name(self.state),
            ca_state: self.ca_state,
            retransmits: self.retransmits,
            probes: self.probes,
            backoff: self.backoff,
            tx_wscale: self.bitfield0 & 0x0f,
            rx_wscale: self.bitfield0 >> 4,
            rto: usec_to_ns(self.rto),
            ato: usec_to_ns(self.ato),
            tx_mss: self.snd_mss,
            rx_mss: self.rcv_mss,
            unacked: self.unacked,
            sacked: self.sacked,
            lost: self.lost,
            retrans: self.retrans,
            fackets: self.fackets,
            last_tx_at: usec_to_ns(self.last_data_sent),
            last_tx_ack_at: usec_to_ns(self.last_ack_sent),
            last_rx_at: usec_to_ns(self.last_data_recv),
            last_rx_ack_at: usec_to_ns(self.last_ack_recv),
            pmtu: self.pmtu,
            rx_ssthresh: self.rcv_ssthresh,
            rtt: usec_to_ns(self.rtt),
            rtt_var: usec_to_ns(self.rttvar),
            tx_ssthresh: self.snd_ssthresh,
            tx_cwindow: self.snd_cwnd,
            adv_mss: self.advmss,
            reordering: self.reordering,
            rx_rtt: usec_to_ns(self.rcv_rtt),
            rx_space: self.rcv_space,
            total_retrans: self.total_retrans,
            ..SysInfo::default()
        };

        // The two packed bits are gated on version alone: their byte has
        // been inside the 2.6.2 prefix all along.
        if caps.supports(KernelVersion::new(4, 9, 0)) {
            out.delivery_rate_app_limited = Nullable::some(self.bitfield1 & 1 == 1);
        }
        if caps.supports(KernelVersion::new(5, 5, 0)) {
            out.fast_open_client_fail = Nullable::some((self.bitfield1 >> 1) & 0x3);
        }

        if caps.has(KernelVersion::new(3, 15, 0)) {
            out.pacing_rate = Nullable::some(self.pacing_rate);
            out.max_pacing_rate = Nullable::some(self.max_pacing_rate);
        }
        if caps.has(KernelVersion::new(4, 1, 0)) {
            out.bytes_acked = Nullable::some(self.bytes_acked);
            out.bytes_received = Nullable::some(self.bytes_received);
        }
        if caps.has(KernelVersion::new(4, 2, 0)) {
            out.segs_out = Nullable::some(self.segs_out);
            out.segs_in = Nullable::some(self.segs_in);
        }
        if caps.has(KernelVersion::new(4, 6, 0)) {
            out.not_sent_bytes = Nullable::some(self.notsent_bytes);
            out.min_rtt = Nullable::some(usec_to_ns(self.min_rtt));
            out.data_segs_in = Nullable::some(self.data_segs_in);
            out.data_segs_out = Nullable::some(self.data_segs_out);
        }
        if caps.has(KernelVersion::new(4, 9, 0)) {
            out.delivery_rate = Nullable::some(self.delivery_rate);
        }
        if caps.has(KernelVersion::new(4, 10, 0)) {
            out.busy_time = Nullable::some(self.busy_time);
            out.rx_window_limited = Nullable::some(self.rwnd_limited);
            out.tx_buffer_limited = Nullable::some(self.sndbuf_limited);
        }
        if caps.has(KernelVersion::new(4, 18, 0)) {
            out.delivered = Nullable::some(self.delivered);
            out.delivered_ce = Nullable::some(self.delivered_ce);
        }
        if caps.has(KernelVersion::new(4, 19, 0)) {
            out.bytes_sent = Nullable::some(self.bytes_sent);
            out.bytes_retrans = Nullable::some(self.bytes_retrans);
            out.dsack_dups = Nullable::some(self.dsack_dups);
            out.reord_seen = Nullable::some(self.reord_seen);
        }
        if caps.has(KernelVersion::new(5, 4, 0)) {
            out.rx_out_of_order = Nullable::some(self.rcv_ooopack);
            out.tx_window = Nullable::some(self.snd_wnd);
        }
        if caps.has(KernelVersion::new(6, 2, 0)) {
            out.rx_window = Nullable::some(self.rcv_wnd);
            out.rehash = Nullable::some(self.rehash);
        }
        if caps.has(KernelVersion::new(6, 7, 0)) {
            out.total_rto = Nullable::some(self.total_rto);
            out.total_rto_recoveries = Nullable::some(self.total_rto_recoveries);
            out.total_rto_time = Nullable::some(self.total_rto_time);
        }

        for (flag, kind) in OPTION_FLAGS {
            if self.options & flag == 0 {
                continue;
            }
            if flag == TCPI_OPT_WSCALE {
                // Window scale carries the negotiated window sizes; zero on
                // kernels that predate the snd_wnd/rcv_wnd fields.
                out.tx_options
                    .push(TcpOption::with_value(kind, u64::from(self.snd_wnd)));
                out.rx_options
                    .push(TcpOption::with_value(kind, u64::from(self.rcv_wnd)));
            } else {
                out.tx_options.push(TcpOption::flag(kind));
                out.rx_options.push(TcpOption::flag(kind));
            }
        }

        out
    }
}

/// Merge the congestion-control algorithm name and its optional
/// algorithm-specific block into the normalized record.
pub fn apply_cc(sys: &mut SysInfo, algorithm: &str, cc: Option<CcInfo>) {
    sys.cc_algorithm = algorithm.to_string();
    match cc {
        Some(CcInfo::Vegas(v)) => {
            sys.cc_vegas_enabled = Nullable::some(v.enabled);
            sys.cc_vegas_rtt_cnt = Nullable::some(v.rttcnt);
            sys.cc_vegas_rtt = Nullable::some(usec_to_ns(v.rtt));
            sys.cc_vegas_rtt_min = Nullable::some(usec_to_ns(v.minrtt));
        }
        Some(CcInfo::Bbr(b)) => {
            sys.cc_bbr_bw_lo = Nullable::some(b.bw_lo);
            sys.cc_bbr_bw_hi = Nullable::some(b.bw_hi);
            sys.cc_bbr_min_rtt = Nullable::some(usec_to_ns(b.min_rtt));
            sys.cc_bbr_pacing_gain = Nullable::some(b.pacing_gain);
            sys.cc_bbr_cwindow_gain = Nullable::some(b.cwnd_gain);
        }
        Some(CcInfo::Dctcp(d)) => {
            sys.cc_dctcp_enabled = Nullable::some(d.enabled != 0);
            sys.cc_dctcp_ce_state = Nullable::some(d.ce_state);
            sys.cc_dctcp_alpha = Nullable::some(d.alpha);
            sys.cc_dctcp_ab_ecn = Nullable::some(d.ab_ecn);
            sys.cc_dctcp_ab_tot = Nullable::some(d.ab_tot);
        }
        None => {}
    }
}

#[cfg(target_os = "linux")]
impl SysInfo {
    /// Project into the platform-agnostic interface record.
    pub fn into_info(self) -> Info {
        Info {
            state: self.state_name.clone(),
            tx_options: self.tx_options.clone(),
            rx_options: self.rx_options.clone(),
            tx_mss: u64::from(self.tx_mss),
            rx_mss: u64::from(self.rx_mss),
            rtt: self.rtt,
            rtt_var: self.rtt_var,
            rto: self.rto,
            ato: self.ato,
            last_tx_at: self.last_tx_at,
            last_rx_at: self.last_rx_at,
            last_tx_ack_at: self.last_tx_ack_at,
            last_rx_ack_at: self.last_rx_ack_at,
            rx_window: u64::from(self.rx_space),
            tx_ssthreshold: u64::from(self.tx_ssthresh),
            rx_ssthreshold: u64::from(self.rx_ssthresh),
            tx_cwindow_bytes: 0,
            tx_cwindow_segs: u64::from(self.tx_cwindow),
            retransmits: u64::from(self.total_retrans),
            sys: self,
        }
    }
}

impl SysInfo {
    /// Compact `key=value` strings for conditions worth surfacing.
    pub fn warnings(&self) -> Vec<String> {
        let mut warns = Vec::new();
        if let Some(v) = self.bytes_retrans.option() {
            if v > 0 {
                warns.push(format!("retransBytes={v}"));
            }
        }
        if self.total_retrans > 0 {
            warns.push(format!("retransTotal={}", self.total_retrans));
        }
        if self.backoff > 0 {
            warns.push(format!("backoff={}", self.backoff));
        }
        if let Some(v) = self.rx_out_of_order.option() {
            if v > 0 {
                warns.push(format!("outOfOrderPackets={v}"));
            }
        }
        if let Some(v) = self.tx_buffer_limited.option() {
            if v > 0 {
                warns.push(format!("txSendBufferLimited={v}"));
            }
        }
        if let Some(v) = self.rx_window_limited.option() {
            if v > 0 {
                warns.push(format!("rxWindowLimited={v}"));
            }
        }
        warns
    }
}

// ---------------------------------------------------------------------------
// Acquisition
// ---------------------------------------------------------------------------

#[cfg(target_os = "linux")]
fn caps() -> Option<&'static Caps> {
    use std::sync::OnceLock;
    static CAPS: OnceLock<Option<Caps>> = OnceLock::new();
    CAPS.get_or_init(|| crate::kernel::detect().ok().map(Caps::for_version))
        .as_ref()
}

/// True iff the running kernel exports tcp_info (Linux >= 2.6.2 with a
/// parseable release string).
#[cfg(target_os = "linux")]
pub fn supported() -> bool {
    caps().is_some_and(|c| c.structure_bytes() > 0)
}

// On 32-bit x86 the direct getsockopt syscall is historically unavailable;
// socket calls go through the multiplexed socketcall(2) entry point with an
// argument vector. Everything else uses getsockopt directly.
#[cfg(all(target_os = "linux", target_arch = "x86"))]
unsafe fn getsockopt_raw(
    fd: SocketHandle,
    level: libc::c_int,
    optname: libc::c_int,
    optval: *mut libc::c_void,
    optlen: *mut libc::socklen_t,
) -> libc::c_int {
    const NET_GETSOCKOPT: libc::c_long = 15;
    let mut args: [libc::c_ulong; 5] = [
        fd as libc::c_ulong,
        level as libc::c_ulong,
        optname as libc::c_ulong,
        optval as usize as libc::c_ulong,
        optlen as usize as libc::c_ulong,
    ];
    libc::syscall(libc::SYS_socketcall, NET_GETSOCKOPT, args.as_mut_ptr()) as libc::c_int
}

#[cfg(all(target_os = "linux", not(target_arch = "x86")))]
unsafe fn getsockopt_raw(
    fd: SocketHandle,
    level: libc::c_int,
    optname: libc::c_int,
    optval: *mut libc::c_void,
    optlen: *mut libc::socklen_t,
) -> libc::c_int {
    libc::getsockopt(fd, level, optname, optval, optlen)
}

/// Read the congestion-control algorithm name for the socket.
#[cfg(target_os = "linux")]
fn congestion_algorithm(fd: SocketHandle) -> Result<String, TcpInfoError> {
    let mut buf = [0u8; 16];
    let mut len = buf.len() as libc::socklen_t;
    let ret = unsafe {
        getsockopt_raw(
            fd,
            libc::SOL_TCP,
            libc::TCP_CONGESTION,
            buf.as_mut_ptr() as *mut libc::c_void,
            &mut len,
        )
    };
    if ret != 0 {
        return Err(TcpInfoError::from_last_os_error());
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(len as usize);
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

#[cfg(target_os = "linux")]
fn fetch_cc_block<T: Default + Copy>(fd: SocketHandle) -> Result<T, TcpInfoError> {
    let mut value = T::default();
    let mut len = std::mem::size_of::<T>() as libc::socklen_t;
    let ret = unsafe {
        getsockopt_raw(
            fd,
            libc::SOL_TCP,
            libc::TCP_CC_INFO,
            &mut value as *mut T as *mut libc::c_void,
            &mut len,
        )
    };
    if ret != 0 {
        return Err(TcpInfoError::from_last_os_error());
    }
    if (len as usize) < std::mem::size_of::<T>() {
        return Err(TcpInfoError::InvalidArgument);
    }
    Ok(value)
}

#[cfg(target_os = "linux")]
fn congestion_info(fd: SocketHandle, algorithm: &str) -> Option<CcInfo> {
    let fetched = match algorithm {
        "vegas" => fetch_cc_block::<TcpVegasInfo>(fd).map(CcInfo::Vegas),
        "bbr" => fetch_cc_block::<TcpBbrInfo>(fd).map(CcInfo::Bbr),
        "dctcp" => fetch_cc_block::<TcpDctcpInfo>(fd).map(CcInfo::Dctcp),
        _ => return None,
    };
    match fetched {
        Ok(cc) => Some(cc),
        Err(e) => {
            log::debug!("TCP_CC_INFO unavailable for {algorithm}: {e}");
            None
        }
    }
}

/// Fetch and normalize tcp_info for a socket.
///
/// The TCP_INFO call is fatal on failure; the congestion-control name and
/// block are best-effort and degrade to an extension-free record.
#[cfg(target_os = "linux")]
pub fn get_tcp_info(fd: SocketHandle) -> Result<SysInfo, TcpInfoError> {
    let caps = caps().ok_or(TcpInfoError::Unsupported)?;
    if caps.structure_bytes() == 0 {
        return Err(TcpInfoError::Unsupported);
    }

    let mut raw = RawTcpInfo::default();
    let mut len = caps.structure_bytes() as libc::socklen_t;
    let ret = unsafe {
        getsockopt_raw(
            fd,
            libc::SOL_TCP,
            libc::TCP_INFO,
            &mut raw as *mut RawTcpInfo as *mut libc::c_void,
            &mut len,
        )
    };
    if ret != 0 {
        return Err(TcpInfoError::from_last_os_error());
    }

    // The kernel reports how many bytes it populated; never trust fields
    // past that prefix.
    let caps = caps.truncate(len as usize);
    let mut sys = raw.unpack(&caps);

    match congestion_algorithm(fd) {
        Ok(algorithm) => {
            let cc = congestion_info(fd, &algorithm);
            apply_cc(&mut sys, &algorithm, cc);
        }
        Err(e) => log::debug!("TCP_CONGESTION unavailable: {e}"),
    }

    Ok(sys)
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
        gauge!("tcpinfo_state", "Connection state, see include/net/tcp_states.h.", |s| {
            Some(f64::from(s.state))
        }),
        gauge!("tcpinfo_ca_state", "Loss recovery state machine, see include/net/tcp.h.", |s| {
            Some(f64::from(s.ca_state))
        }),
        gauge!("tcpinfo_retransmits", "RTO-based retransmissions at this sequence.", |s| {
            Some(f64::from(s.retransmits))
        }),
        gauge!("tcpinfo_probes", "Unanswered zero window probes.", |s| {
            Some(f64::from(s.probes))
        }),
        gauge!("tcpinfo_backoff", "Exponential timeout backoff counter.", |s| {
            Some(f64::from(s.backoff))
        }),
        gauge!("tcpinfo_snd_wscale", "Window scaling of send-half of connection (bit shift).", |s| {
            Some(f64::from(s.tx_wscale))
        }),
        gauge!("tcpinfo_rcv_wscale", "Window scaling of receive-half of connection (bit shift).", |s| {
            Some(f64::from(s.rx_wscale))
        }),
        gauge!(
            "tcpinfo_delivery_rate_app_limited",
            "Rate measurements reflect non-network bottlenecks (1 = true).",
            |s| s.delivery_rate_app_limited.option().map(|v| v as u8 as f64)
        ),
        gauge!(
            "tcpinfo_fastopen_client_fail",
            "Reason TCP fastopen failed: 0 unspecified, 1 no cookie sent, 2 SYN-ACK did not ack data, 3 same after timeout.",
            |s| s.fast_open_client_fail.option().map(f64::from)
        ),
        gauge!("tcpinfo_rto", "Retransmission timeout in nanoseconds.", |s| {
            Some(s.rto as f64)
        }),
        gauge!("tcpinfo_ato", "Delayed ACK timeout in nanoseconds.", |s| {
            Some(s.ato as f64)
        }),
        gauge!("tcpinfo_snd_mss", "Current maximum segment size for sending.", |s| {
            Some(f64::from(s.tx_mss))
        }),
        gauge!("tcpinfo_rcv_mss", "Maximum observed segment size from the remote host.", |s| {
            Some(f64::from(s.rx_mss))
        }),
        gauge!("tcpinfo_unacked", "Segments between snd.nxt and snd.una.", |s| {
            Some(f64::from(s.unacked))
        }),
        gauge!("tcpinfo_sacked", "Scoreboard segments marked SACKED.", |s| {
            Some(f64::from(s.sacked))
        }),
        gauge!("tcpinfo_lost", "Scoreboard segments marked lost.", |s| {
            Some(f64::from(s.lost))
        }),
        gauge!("tcpinfo_retrans", "Scoreboard segments marked retransmitted.", |s| {
            Some(f64::from(s.retrans))
        }),
        counter!("tcpinfo_fackets", "Forward acknowledgment counter (unused by modern kernels).", |s| {
            Some(f64::from(s.fackets))
        }),
        gauge!("tcpinfo_last_data_sent", "Time since last data segment sent, nanoseconds.", |s| {
            Some(s.last_tx_at as f64)
        }),
        gauge!("tcpinfo_last_ack_sent", "Time since last ACK sent, nanoseconds. Not tracked.", |s| {
            Some(s.last_tx_ack_at as f64)
        }),
        gauge!("tcpinfo_last_data_recv", "Time since last data segment received, nanoseconds.", |s| {
            Some(s.last_rx_at as f64)
        }),
        gauge!("tcpinfo_last_ack_recv", "Time since last ACK received, nanoseconds.", |s| {
            Some(s.last_rx_ack_at as f64)
        }),
        gauge!("tcpinfo_pmtu", "Maximum IP transmission unit for this path.", |s| {
            Some(f64::from(s.pmtu))
        }),
        gauge!("tcpinfo_rcv_ssthresh", "Current window clamp.", |s| {
            Some(f64::from(s.rx_ssthresh))
        }),
        gauge!("tcpinfo_rtt", "Smoothed round-trip time in nanoseconds.", |s| {
            Some(s.rtt as f64)
        }),
        gauge!("tcpinfo_rttvar", "RTT variance in nanoseconds.", |s| {
            Some(s.rtt_var as f64)
        }),
        gauge!("tcpinfo_snd_ssthresh", "Slow start threshold.", |s| {
            Some(f64::from(s.tx_ssthresh))
        }),
        gauge!("tcpinfo_snd_cwnd", "Congestion window in segments.", |s| {
            Some(f64::from(s.tx_cwindow))
        }),
        gauge!("tcpinfo_advmss", "Advertised maximum segment size.", |s| {
            Some(f64::from(s.adv_mss))
        }),
        gauge!("tcpinfo_reordering", "Maximum observed reordering distance.", |s| {
            Some(f64::from(s.reordering))
        }),
        gauge!("tcpinfo_rcv_rtt", "Receiver side RTT estimate in nanoseconds.", |s| {
            Some(s.rx_rtt as f64)
        }),
        gauge!("tcpinfo_rcv_space", "Space reserved for the receive queue.", |s| {
            Some(f64::from(s.rx_space))
        }),
        counter!("tcpinfo_total_retrans", "Total segments containing retransmitted data.", |s| {
            Some(f64::from(s.total_retrans))
        }),
        gauge!("tcpinfo_pacing_rate", "Current pacing rate.", |s| {
            s.pacing_rate.option().map(|v| v as f64)
        }),
        gauge!("tcpinfo_max_pacing_rate", "Settable pacing rate clamp.", |s| {
            s.max_pacing_rate.option().map(|v| v as f64)
        }),
        gauge!("tcpinfo_bytes_acked", "Data bytes for which cumulative acknowledgments were received.", |s| {
            s.bytes_acked.option().map(|v| v as f64)
        }),
        counter!("tcpinfo_bytes_received", "Data bytes for which cumulative acknowledgments were sent.", |s| {
            s.bytes_received.option().map(|v| v as f64)
        }),
        gauge!("tcpinfo_segs_out", "Segments transmitted, including pure ACKs.", |s| {
            s.segs_out.option().map(f64::from)
        }),
        gauge!("tcpinfo_segs_in", "Segments received, including pure ACKs.", |s| {
            s.segs_in.option().map(f64::from)
        }),
        gauge!("tcpinfo_notsent_bytes", "Bytes queued in the send buffer but not yet sent.", |s| {
            s.not_sent_bytes.option().map(f64::from)
        }),
        gauge!("tcpinfo_min_rtt", "Minimum RTT in nanoseconds.", |s| {
            s.min_rtt.option().map(|v| v as f64)
        }),
        gauge!("tcpinfo_data_segs_in", "Received segments carrying data.", |s| {
            s.data_segs_in.option().map(f64::from)
        }),
        gauge!("tcpinfo_data_segs_out", "Transmitted segments carrying data.", |s| {
            s.data_segs_out.option().map(f64::from)
        }),
        gauge!("tcpinfo_delivery_rate", "Observed maximum delivery rate.", |s| {
            s.delivery_rate.option().map(|v| v as f64)
        }),
        gauge!("tcpinfo_busy_time", "Time in usecs with outstanding data.", |s| {
            s.busy_time.option().map(|v| v as f64)
        }),
        gauge!("tcpinfo_rwnd_limited", "Time in usecs limited by receive window.", |s| {
            s.rx_window_limited.option().map(|v| v as f64)
        }),
        gauge!("tcpinfo_sndbuf_limited", "Time in usecs limited by send buffer space.", |s| {
            s.tx_buffer_limited.option().map(|v| v as f64)
        }),
        gauge!("tcpinfo_delivered", "Data segments delivered, including retransmits.", |s| {
            s.delivered.option().map(f64::from)
        }),
        gauge!("tcpinfo_delivered_ce", "ECE-marked data segments delivered.", |s| {
            s.delivered_ce.option().map(f64::from)
        }),
        gauge!("tcpinfo_bytes_sent", "Payload bytes sent, including retransmissions.", |s| {
            s.bytes_sent.option().map(|v| v as f64)
        }),
        gauge!("tcpinfo_bytes_retrans", "Bytes retransmitted.", |s| {
            s.bytes_retrans.option().map(|v| v as f64)
        }),
        gauge!("tcpinfo_dsack_dups", "Duplicate segments reported by DSACK.", |s| {
            s.dsack_dups.option().map(f64::from)
        }),
        counter!("tcpinfo_reord_seen", "Received ACKs that were out of order.", |s| {
            s.reord_seen.option().map(f64::from)
        }),
        counter!("tcpinfo_rcv_ooopack", "Out-of-order packets received.", |s| {
            s.rx_out_of_order.option().map(f64::from)
        }),
        gauge!("tcpinfo_snd_wnd", "Peer's advertised receive window after scaling, bytes.", |s| {
            s.tx_window.option().map(f64::from)
        }),
        gauge!("tcpinfo_rcv_wnd", "Local advertised receive window after scaling, bytes.", |s| {
            s.rx_window.option().map(f64::from)
        }),
        gauge!("tcpinfo_rehash", "PLB or timeout triggered rehash attempts.", |s| {
            s.rehash.option().map(f64::from)
        }),
        counter!("tcpinfo_total_rto", "Total RTO timeouts, including SYN and recurring.", |s| {
            s.total_rto.option().map(f64::from)
        }),
        counter!("tcpinfo_total_rto_recoveries", "Total RTO recoveries, including unfinished.", |s| {
            s.total_rto_recoveries.option().map(f64::from)
        }),
        counter!("tcpinfo_total_rto_time", "Total time in RTO recoveries, milliseconds.", |s| {
            s.total_rto_time.option().map(f64::from)
        }),
        gauge!("tcpinfo_cc_vegas_enabled", "Whether TCP Vegas is enabled for this connection.", |s| {
            s.cc_vegas_enabled.option().map(f64::from)
        }),
        gauge!("tcpinfo_cc_vegas_rtt_cnt", "Number of RTT samples for TCP Vegas.", |s| {
            s.cc_vegas_rtt_cnt.option().map(f64::from)
        }),
        gauge!("tcpinfo_cc_vegas_rtt", "Average Vegas RTT sample in nanoseconds.", |s| {
            s.cc_vegas_rtt.option().map(|v| v as f64)
        }),
        gauge!("tcpinfo_cc_vegas_rtt_min", "Minimum Vegas RTT sample in nanoseconds.", |s| {
            s.cc_vegas_rtt_min.option().map(|v| v as f64)
        }),
        gauge!("tcpinfo_cc_bbr_bw_lo", "BBR estimated bandwidth lower bound.", |s| {
            s.cc_bbr_bw_lo.option().map(f64::from)
        }),
        gauge!("tcpinfo_cc_bbr_bw_hi", "BBR estimated bandwidth upper bound.", |s| {
            s.cc_bbr_bw_hi.option().map(f64::from)
        }),
        gauge!("tcpinfo_cc_bbr_min_rtt", "BBR minimum RTT estimate in nanoseconds.", |s| {
            s.cc_bbr_min_rtt.option().map(|v| v as f64)
        }),
        gauge!("tcpinfo_cc_bbr_pacing_gain", "BBR pacing gain.", |s| {
            s.cc_bbr_pacing_gain.option().map(f64::from)
        }),
        gauge!("tcpinfo_cc_bbr_cwnd_gain", "BBR congestion window gain.", |s| {
            s.cc_bbr_cwindow_gain.option().map(f64::from)
        }),
        gauge!("tcpinfo_cc_dctcp_enabled", "Whether DCTCP is enabled for this connection.", |s| {
            s.cc_dctcp_enabled.option().map(|v| v as u8 as f64)
        }),
        gauge!("tcpinfo_cc_dctcp_ce_state", "DCTCP congestion experienced state.", |s| {
            s.cc_dctcp_ce_state.option().map(f64::from)
        }),
        gauge!("tcpinfo_cc_dctcp_alpha", "DCTCP alpha parameter.", |s| {
            s.cc_dctcp_alpha.option().map(f64::from)
        }),
        gauge!("tcpinfo_cc_dctcp_ab_ecn", "DCTCP AB ECN count.", |s| {
            s.cc_dctcp_ab_ecn.option().map(f64::from)
        }),
        gauge!("tcpinfo_cc_dctcp_ab_tot", "DCTCP AB total count.", |s| {
            s.cc_dctcp_ab_tot.option().map(f64::from)
        }),
    ];
    METRICS
}
