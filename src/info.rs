// Platform-agnostic snapshot types.
//
// Every platform's raw kernel record is unpacked into a platform-specific
// `sys::SysInfo` and then projected into the `Info` interface record defined
// here. `Info` is the shape upstream code consumes: nanosecond durations,
// u64 byte counts, and a stable camelCase key set when serialized.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::sys::SysInfo;

// ---------------------------------------------------------------------------
// Nullable scalars
// ---------------------------------------------------------------------------

/// A (valid, value) pair distinguishing "zero because unreported" from
/// "zero because measured zero".
///
/// Kernel fields that only exist from a certain kernel version (or platform)
/// onward are carried as `Nullable`; everything else is a plain scalar.
/// Invalid values are omitted from serialized output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Nullable<T> {
    pub valid: bool,
    pub value: T,
}

impl<T> Nullable<T> {
    pub fn some(value: T) -> Self {
        Self { valid: true, value }
    }

    pub fn none() -> Self
    where
        T: Default,
    {
        Self {
            valid: false,
            value: T::default(),
        }
    }

    pub fn is_none(&self) -> bool {
        !self.valid
    }

    /// The value as an `Option`, `None` when invalid.
    pub fn option(&self) -> Option<T>
    where
        T: Copy,
    {
        self.valid.then_some(self.value)
    }
}

impl<T: Serialize> Serialize for Nullable<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.valid {
            self.value.serialize(serializer)
        } else {
            serializer.serialize_none()
        }
    }
}

impl<'de, T: Deserialize<'de> + Default> Deserialize<'de> for Nullable<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<T>::deserialize(deserializer)? {
            Some(value) => Nullable::some(value),
            None => Nullable::none(),
        })
    }
}

// ---------------------------------------------------------------------------
// Option tags
// ---------------------------------------------------------------------------

/// Symbolic names for negotiated TCP options.
///
/// Linux exposes the full set; xnu only the first four; Windows none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Timestamps,
    Sack,
    WindowScale,
    Ecn,
    EcnSeen,
    SynData,
    UsecTs,
    TfoChild,
}

impl OptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionKind::Timestamps => "Timestamps",
            OptionKind::Sack => "SACK",
            OptionKind::WindowScale => "WindowScale",
            OptionKind::Ecn => "ECN",
            OptionKind::EcnSeen => "ECNSeen",
            OptionKind::SynData => "SYNData",
            OptionKind::UsecTs => "UsecTS",
            OptionKind::TfoChild => "TFOChild",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "Timestamps" => OptionKind::Timestamps,
            "SACK" => OptionKind::Sack,
            "WindowScale" => OptionKind::WindowScale,
            "ECN" => OptionKind::Ecn,
            "ECNSeen" => OptionKind::EcnSeen,
            "SYNData" => OptionKind::SynData,
            "UsecTS" => OptionKind::UsecTs,
            "TFOChild" => OptionKind::TfoChild,
            _ => return None,
        })
    }
}

/// One decoded TCP option: a kind plus a numeric payload.
///
/// A zero payload means "flag present, no scalar". Serializes as `Kind`
/// when the payload is zero and `Kind:HH` (two-digit hex) otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpOption {
    pub kind: OptionKind,
    pub value: u64,
}

impl TcpOption {
    pub fn flag(kind: OptionKind) -> Self {
        Self { kind, value: 0 }
    }

    pub fn with_value(kind: OptionKind, value: u64) -> Self {
        Self { kind, value }
    }
}

impl std::fmt::Display for TcpOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.value == 0 {
            write!(f, "{}", self.kind.as_str())
        } else {
            write!(f, "{}:{:02x}", self.kind.as_str(), self.value)
        }
    }
}

impl std::str::FromStr for TcpOption {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, value) = match s.split_once(':') {
            Some((kind, hex)) => {
                let value = u64::from_str_radix(hex, 16)
                    .map_err(|e| format!("bad option payload {hex:?}: {e}"))?;
                (kind, value)
            }
            None => (s, 0),
        };
        let kind = OptionKind::from_str(kind).ok_or_else(|| format!("unknown option {kind:?}"))?;
        Ok(TcpOption { kind, value })
    }
}

impl Serialize for TcpOption {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TcpOption {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Interface record
// ---------------------------------------------------------------------------

/// One platform-agnostic TCP endpoint snapshot.
///
/// All durations are nanoseconds; all byte counts are u64. Fields a platform
/// does not report are zero; the platform-specific `sys` sub-record is the
/// place to check exact provenance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Info {
    /// Symbolic connection state, `UNKNOWN(n)` if the platform reports a
    /// state outside its own table.
    pub state: String,
    #[serde(rename = "txOptions", default, skip_serializing_if = "Vec::is_empty")]
    pub tx_options: Vec<TcpOption>,
    #[serde(rename = "rxOptions", default, skip_serializing_if = "Vec::is_empty")]
    pub rx_options: Vec<TcpOption>,
    #[serde(rename = "txMSS")]
    pub tx_mss: u64,
    #[serde(rename = "rxMSS")]
    pub rx_mss: u64,
    /// Smoothed round-trip time in nanoseconds.
    pub rtt: u64,
    #[serde(rename = "rttVar")]
    pub rtt_var: u64,
    /// Retransmission timeout in nanoseconds.
    pub rto: u64,
    /// Delayed-ACK timeout in nanoseconds (Linux only, 0 elsewhere).
    pub ato: u64,
    #[serde(rename = "lastTxAt")]
    pub last_tx_at: u64,
    #[serde(rename = "lastRxAt")]
    pub last_rx_at: u64,
    #[serde(rename = "lastTxAckAt")]
    pub last_tx_ack_at: u64,
    #[serde(rename = "lastRxAckAt")]
    pub last_rx_ack_at: u64,
    #[serde(rename = "rxWindow")]
    pub rx_window: u64,
    #[serde(rename = "txSSThreshold")]
    pub tx_ssthreshold: u64,
    #[serde(rename = "rxSSThreshold")]
    pub rx_ssthreshold: u64,
    /// Congestion window in bytes (Darwin and Windows; 0 on Linux).
    #[serde(rename = "txCWindowBytes")]
    pub tx_cwindow_bytes: u64,
    /// Congestion window in segments (Linux; 0 elsewhere).
    #[serde(rename = "txCWindowSegs")]
    pub tx_cwindow_segs: u64,
    pub retransmits: u64,
    /// The platform-specific record this projection was made from.
    #[serde(rename = "sysInfo")]
    pub sys: SysInfo,
}

impl Info {
    /// Serialize to the stable name -> value map form.
    pub fn to_map(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }

    /// Compact `key=value` strings for conditions worth surfacing, combining
    /// the cross-platform retransmit count with the platform record's own
    /// warning list.
    pub fn warnings(&self) -> Vec<String> {
        let mut warns = Vec::new();
        if self.retransmits > 0 {
            warns.push(format!("retransmits={}", self.retransmits));
        }
        warns.extend(self.sys.warnings());
        warns
    }
}
