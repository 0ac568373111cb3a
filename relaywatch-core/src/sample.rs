//! The normalized record schema - one `Sample` per collection cycle
//!
//! Every field is independently optional: a failed sub-query leaves the
//! field absent (or carried over from the previous cycle by the
//! normalizer), never zeroed. A `Sample` is immutable once handed to the
//! recorder.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use time::OffsetDateTime;

/// Which physical uplink currently carries outbound traffic.
///
/// Always one of these three values - never a raw interface name or a
/// percentage, so the field stays stable across device types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WanSource {
    Cellular,
    Ethernet,
    Unknown,
}

impl WanSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            WanSource::Cellular => "Cellular",
            WanSource::Ethernet => "Ethernet",
            WanSource::Unknown => "Unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Cellular" => Some(WanSource::Cellular),
            "Ethernet" => Some(WanSource::Ethernet),
            "Unknown" => Some(WanSource::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for WanSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device-reported WAN link state (not the same thing as `WanSource`:
/// both interfaces can report "connected" while only one routes traffic).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WanStatus {
    Connected,
    Disconnected,
}

impl WanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WanStatus::Connected => "Connected",
            WanStatus::Disconnected => "Disconnected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Connected" => Some(WanStatus::Connected),
            "Disconnected" => Some(WanStatus::Disconnected),
            _ => None,
        }
    }
}

/// Result of the local ping probe for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingResult {
    pub dest: String,
    pub source_ip: Option<String>,
    pub active_interface: Option<String>,
    pub success: bool,
    pub latency_ms: Option<u32>,
}

impl PingResult {
    /// A probe that never ran (collector starting up, probe disabled).
    pub fn failed(dest: &str) -> Self {
        Self {
            dest: dest.to_string(),
            source_ip: None,
            active_interface: None,
            success: false,
            latency_ms: None,
        }
    }
}

/// Cellular signal quality. Signed integers in their native unit
/// (dBm for RSRP/RSSI, dB for RSRQ/SINR) - no conversion or scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SignalMetrics {
    pub rsrp: Option<i32>,
    pub rsrq: Option<i32>,
    pub sinr: Option<i32>,
    pub rssi: Option<i32>,
}

/// Network identity: carrier, radio technology, band and cell identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub carrier: Option<String>,
    pub technology: Option<String>,
    pub band: Option<String>,
    pub bandwidth: Option<String>,
    pub ecgi: Option<String>,
    pub pci: Option<String>,
}

/// Connection state. `wan_source` is always present: the resolver yields
/// a value every cycle (`Unknown` when nothing is decidable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub wan_status: Option<WanStatus>,
    pub wan_source: WanSource,
    pub device_ipv4: Option<String>,
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self {
            wan_status: None,
            wan_source: WanSource::Unknown,
            device_ipv4: None,
        }
    }
}

/// SIM identity of the active slot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SimInfo {
    pub apn: Option<String>,
    pub iccid: Option<String>,
    pub sim_status: Option<String>,
    pub active_slot: Option<u8>,
}

/// Router/modem identity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub model: Option<String>,
    pub manufacturer: Option<String>,
    pub firmware: Option<String>,
    pub imei: Option<String>,
    pub serial: Option<String>,
}

/// LAN clients reported by the device (HTTP-scrape devices only).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectedDevices {
    pub count: Option<u32>,
    pub names: Option<String>,
}

/// One timestamped, normalized collection-cycle record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub ping: PingResult,
    pub public_ip: Option<String>,
    pub signal: SignalMetrics,
    pub network: NetworkInfo,
    pub connection: ConnectionInfo,
    pub sim: SimInfo,
    pub device: DeviceInfo,
    pub connected_devices: ConnectedDevices,
    /// Operator-defined named values, passed through untouched. Rendered
    /// as trailing TSV columns so device quirks never widen the fixed
    /// schema.
    pub extras: BTreeMap<String, String>,
}

impl Sample {
    /// A record with nothing but a timestamp and a failed probe - what a
    /// cycle looks like when the device is unreachable on first contact.
    pub fn empty(timestamp: OffsetDateTime, ping_dest: &str) -> Self {
        Self {
            timestamp,
            ping: PingResult::failed(ping_dest),
            public_ip: None,
            signal: SignalMetrics::default(),
            network: NetworkInfo::default(),
            connection: ConnectionInfo::default(),
            sim: SimInfo::default(),
            device: DeviceInfo::default(),
            connected_devices: ConnectedDevices::default(),
            extras: BTreeMap::new(),
        }
    }

    /// Value of a tracked field, as the string the change engine compares.
    /// `None` means the field is absent in this sample.
    pub fn tracked_value(&self, field: crate::changes::TrackedField) -> Option<String> {
        use crate::changes::TrackedField::*;
        match field {
            WanSource => Some(self.connection.wan_source.as_str().to_string()),
            PublicIp => self.public_ip.clone(),
            DeviceIpv4 => self.connection.device_ipv4.clone(),
            Carrier => self.network.carrier.clone(),
            Apn => self.sim.apn.clone(),
            Iccid => self.sim.iccid.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wan_source_round_trips_through_str() {
        for src in [WanSource::Cellular, WanSource::Ethernet, WanSource::Unknown] {
            assert_eq!(WanSource::parse(src.as_str()), Some(src));
        }
        assert_eq!(WanSource::parse("mob1s1a1"), None);
    }

    #[test]
    fn empty_sample_has_no_cellular_data() {
        let s = Sample::empty(OffsetDateTime::UNIX_EPOCH, "8.8.8.8");
        assert!(!s.ping.success);
        assert_eq!(s.signal.rsrp, None);
        assert_eq!(s.connection.wan_source, WanSource::Unknown);
        assert!(s.extras.is_empty());
    }
}
