//! Interface-record serialization: stable key set, option tag strings, and
//! the round-trip law (all present fields recovered, absent fields stay
//! absent). These tests run on every platform.

use sockscope::{Info, OptionKind, SysInfo, TcpOption};

fn sample_info() -> Info {
    Info {
        state: "ESTABLISHED".to_string(),
        tx_options: vec![
            TcpOption::flag(OptionKind::Timestamps),
            TcpOption::with_value(OptionKind::WindowScale, 7),
        ],
        rx_options: vec![TcpOption::with_value(OptionKind::WindowScale, 0x2000)],
        tx_mss: 1448,
        rx_mss: 536,
        rtt: 30_000_000,
        rtt_var: 5_000_000,
        rto: 201_000_000,
        ato: 40_000_000,
        last_tx_at: 1_000_000,
        last_rx_at: 2_000_000,
        last_tx_ack_at: 3_000_000,
        last_rx_ack_at: 4_000_000,
        rx_window: 65535,
        tx_ssthreshold: 2_147_483_647,
        rx_ssthreshold: 65535,
        tx_cwindow_bytes: 0,
        tx_cwindow_segs: 10,
        retransmits: 2,
        sys: SysInfo::default(),
    }
}

// ---------------------------------------------------------------------------
// TC-S-1: the serialized record uses the stable camelCase key set
// ---------------------------------------------------------------------------

#[test]
fn info_key_set() {
    let value = serde_json::to_value(sample_info()).unwrap();
    let map = value.as_object().unwrap();
    for key in [
        "state",
        "txOptions",
        "rxOptions",
        "txMSS",
        "rxMSS",
        "rtt",
        "rttVar",
        "rto",
        "ato",
        "lastTxAt",
        "lastRxAt",
        "lastTxAckAt",
        "lastRxAckAt",
        "rxWindow",
        "txSSThreshold",
        "rxSSThreshold",
        "txCWindowBytes",
        "txCWindowSegs",
        "retransmits",
        "sysInfo",
    ] {
        assert!(map.contains_key(key), "missing key {key}");
    }
    assert_eq!(map["txMSS"], serde_json::json!(1448));
    assert_eq!(map["rtt"], serde_json::json!(30_000_000));
}

// ---------------------------------------------------------------------------
// TC-S-2: option tags serialize as Kind or Kind:HH strings
// ---------------------------------------------------------------------------

#[test]
fn option_tag_strings() {
    let value = serde_json::to_value(sample_info()).unwrap();
    assert_eq!(
        value["txOptions"],
        serde_json::json!(["Timestamps", "WindowScale:07"])
    );
    assert_eq!(value["rxOptions"], serde_json::json!(["WindowScale:2000"]));
}

// ---------------------------------------------------------------------------
// TC-S-3: empty option sequences are omitted entirely
// ---------------------------------------------------------------------------

#[test]
fn empty_options_are_omitted() {
    let info = Info {
        state: "CLOSE".to_string(),
        ..Info::default()
    };
    let value = serde_json::to_value(&info).unwrap();
    let map = value.as_object().unwrap();
    assert!(!map.contains_key("txOptions"));
    assert!(!map.contains_key("rxOptions"));
}

// ---------------------------------------------------------------------------
// TC-S-4: round trip recovers all present fields
// ---------------------------------------------------------------------------

#[test]
fn info_round_trip() {
    let info = sample_info();
    let json = serde_json::to_string(&info).unwrap();
    let back: Info = serde_json::from_str(&json).unwrap();
    assert_eq!(back, info);
}

// ---------------------------------------------------------------------------
// TC-S-5: to_map matches the serde view
// ---------------------------------------------------------------------------

#[test]
fn to_map_matches_serde() {
    let info = sample_info();
    let map = info.to_map();
    let value = serde_json::to_value(&info).unwrap();
    assert_eq!(serde_json::Value::Object(map), value);
}
