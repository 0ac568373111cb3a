//! Metric normalizer - raw device output to `Sample` fields
//!
//! Owns the per-field last-known-good cache: when a single extraction
//! fails, the field keeps the prior cycle's value; when the whole
//! snapshot is missing, every cellular-derived field stays put while
//! ping/probe fields (which are independent) still update. Absent is
//! absent - no field is ever filled with a sentinel that looks like a
//! real reading.
//!
//! Normalization is idempotent: the same snapshot against the same
//! cache yields bit-identical output.

use crate::adapters::RawSnapshot;
use crate::config::DeviceType;
use regex::Regex;
use relaywatch_core::resolver::{
    parse_interface_status, parse_policy, parse_route_device, WanSignals,
};
use relaywatch_core::sample::{
    ConnectedDevices, ConnectionInfo, DeviceInfo, NetworkInfo, PingResult, Sample, SignalMetrics,
    SimInfo, WanStatus,
};
use serde_json::Value;
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Everything one snapshot yielded for the cellular-derived fields.
/// Same shape as the cache so merging is field-by-field `or`.
#[derive(Debug, Clone, Default, PartialEq)]
struct CellFields {
    signal: SignalMetrics,
    network: NetworkInfo,
    sim: SimInfo,
    device: DeviceInfo,
    wan_status: Option<WanStatus>,
    device_ipv4: Option<String>,
    connected_devices: ConnectedDevices,
    extras: BTreeMap<String, String>,
}

pub struct Normalizer {
    device_type: DeviceType,
    cell_interface: String,
    cache: CellFields,
    consecutive_stale: u32,
}

impl Normalizer {
    pub fn new(device_type: DeviceType, cell_interface: &str) -> Self {
        Self {
            device_type,
            cell_interface: cell_interface.to_string(),
            cache: CellFields::default(),
            consecutive_stale: 0,
        }
    }

    /// Cycles in a row in which the device yielded nothing at all.
    /// The recorder logs a degradation warning past a threshold.
    pub fn consecutive_stale(&self) -> u32 {
        self.consecutive_stale
    }

    /// Builds the cycle's record. `snapshot` is `None` when the adapter
    /// failed outright; probe fields and public IP update regardless.
    pub fn normalize(
        &mut self,
        timestamp: OffsetDateTime,
        snapshot: Option<&RawSnapshot>,
        ping: PingResult,
        public_ip: Option<String>,
    ) -> Sample {
        let fresh = snapshot.map(|s| self.extract(s)).unwrap_or_default();
        // model/manufacturer are constants per device type, so ignore the
        // device block when judging whether the fetch yielded anything
        let full_miss = snapshot.is_none()
            || (fresh.signal == SignalMetrics::default()
                && fresh.network == NetworkInfo::default()
                && fresh.sim == SimInfo::default());
        if full_miss {
            self.consecutive_stale += 1;
        } else {
            self.consecutive_stale = 0;
        }

        let merged = merge(fresh, &self.cache);
        self.cache = merged.clone();

        Sample {
            timestamp,
            ping,
            public_ip,
            signal: merged.signal,
            network: merged.network,
            // wan_source is the resolver's job; the coordinator fills it in
            connection: ConnectionInfo {
                wan_status: merged.wan_status,
                wan_source: relaywatch_core::sample::WanSource::Unknown,
                device_ipv4: merged.device_ipv4,
            },
            sim: merged.sim,
            device: merged.device,
            connected_devices: merged.connected_devices,
            extras: merged.extras,
        }
    }

    /// Everything the WAN resolver needs, extracted from the snapshot.
    pub fn wan_signals(&self, snapshot: Option<&RawSnapshot>) -> WanSignals {
        let mut signals = WanSignals::default();
        let Some(s) = snapshot else {
            return signals;
        };

        if let Some(mwan) = s.raw("mwan3_status") {
            signals.policy = parse_policy(&mwan);
            signals.iface_status = parse_interface_status(&mwan);
        }
        if let Some(route) = s.raw("route") {
            signals.route_dev = parse_route_device(&route);
        }

        // no mwan3: fall back to the ubus per-interface up flags
        if signals.iface_status.is_empty() {
            if let Some(up) = s.object("wan_status").and_then(|o| obj_up(&o)) {
                signals.iface_status.insert("wan".to_string(), up);
            }
            if let Some(up) = self.cell_status_object(s).and_then(|o| obj_up(&o)) {
                signals.iface_status.insert(self.cell_interface.clone(), up);
            }
        }

        // scrape-only devices report a single WAN technology; represent
        // it as interface flags so the normal decision procedure applies
        if signals.policy.is_none()
            && signals.route_dev.is_none()
            && signals.iface_status.is_empty()
        {
            if let Some(tech) = s.raw("technology") {
                let ethernet = tech.eq_ignore_ascii_case("ethernet");
                signals.iface_status.insert("wan".to_string(), ethernet);
                signals.iface_status.insert("mob1s1a1".to_string(), !ethernet);
            }
        }
        signals
    }

    fn extract(&self, s: &RawSnapshot) -> CellFields {
        match self.device_type {
            DeviceType::Rutm50 => self.extract_rutm50(s),
            DeviceType::Fx3110 => self.extract_fx3110(s),
        }
    }

    fn extract_rutm50(&self, s: &RawSnapshot) -> CellFields {
        let modem = s.object("modem_info");
        let mcache = modem.as_ref().and_then(|m| m.get("cache")).cloned();
        let quality = s.raw("signal_quality");
        let quality = quality.as_deref();

        let signal = SignalMetrics {
            rsrp: cache_int(&mcache, "rsrp_value").or_else(|| grab_int(quality, "RSRP")),
            rsrq: cache_int(&mcache, "rsrq_value").or_else(|| grab_int(quality, "RSRQ")),
            sinr: cache_int(&mcache, "sinr_value")
                .or_else(|| grab_int(quality, "SINR"))
                .or_else(|| grab_int(quality, "SNR")),
            rssi: cache_int(&mcache, "rssi_value").or_else(|| grab_int(quality, "RSSI")),
        };

        let network = NetworkInfo {
            carrier: s
                .raw("operator")
                .or_else(|| cache_str(&mcache, "provider_name"))
                .or_else(|| cache_str(&mcache, "operator")),
            technology: s.raw("technology").or_else(|| cache_str(&mcache, "net_mode_str")),
            band: s.raw("band").or_else(|| cache_str(&mcache, "band_str")),
            bandwidth: carrier_aggregation_bandwidth(&mcache),
            ecgi: grab_str(quality, "Cell ID").or_else(|| grab_str(quality, "ECGI")),
            pci: grab_str(quality, "PCI"),
        };

        let wan_obj = s.object("wan_status");
        let cell_obj = self.cell_status_object(s);
        let wan_up = wan_obj.as_ref().and_then(obj_up);
        let cell_up = cell_obj.as_ref().and_then(obj_up);
        let mwan = s.raw("mwan3_status");

        // connected when any usable source says traffic can flow
        let wan_status = match (&mwan, wan_up, cell_up) {
            (None, None, None) => None,
            (mwan, wan_up, cell_up) => {
                let mwan_up = mwan
                    .as_deref()
                    .map(|text| {
                        parse_policy(text).map(|p| p.full_allocation().is_some()).unwrap_or(false)
                            || parse_interface_status(text).values().any(|up| *up)
                    })
                    .unwrap_or(false);
                if mwan_up || wan_up == Some(true) || cell_up == Some(true) {
                    Some(WanStatus::Connected)
                } else {
                    Some(WanStatus::Disconnected)
                }
            }
        };

        let device_ipv4 = wan_obj
            .as_ref()
            .and_then(obj_ipv4)
            .or_else(|| cell_obj.as_ref().and_then(obj_ipv4));

        let active_slot = s.raw("active_sim").and_then(|v| v.trim().parse::<u8>().ok());
        let apn = s.raw("apn").or_else(|| match active_slot {
            Some(2) => s.raw("apn_sim2"),
            _ => s.raw("apn_sim1"),
        });

        let sim = SimInfo {
            apn,
            iccid: s.raw("iccid"),
            sim_status: s.raw("sim_status"),
            active_slot,
        };

        let modem_manuf = modem
            .as_ref()
            .and_then(|m| m.get("manuf"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty());
        let device = DeviceInfo {
            model: Some("RUTM50".to_string()),
            manufacturer: Some(match modem_manuf {
                Some(m) => format!("Teltonika/{m}"),
                None => "Teltonika".to_string(),
            }),
            firmware: cache_str(&mcache, "firmware"),
            imei: cache_str(&mcache, "imei"),
            serial: cache_str(&mcache, "serial_num"),
        };

        CellFields {
            signal,
            network,
            sim,
            device,
            wan_status,
            device_ipv4,
            connected_devices: ConnectedDevices::default(),
            extras: s.extras.clone(),
        }
    }

    fn extract_fx3110(&self, s: &RawSnapshot) -> CellFields {
        let signal = SignalMetrics {
            rsrp: s.raw("rsrp").as_deref().and_then(leading_int),
            rsrq: s.raw("rsrq").as_deref().and_then(leading_int),
            sinr: s.raw("snr").as_deref().and_then(leading_int),
            rssi: None, // the FX web UI does not expose RSSI
        };

        let network = NetworkInfo {
            carrier: s.raw("carrier"),
            technology: s.raw("technology"),
            band: s.raw("band"),
            bandwidth: s.raw("bandwidth"),
            ecgi: s.raw("ecgi"),
            pci: s.raw("pci"),
        };

        let wan_status = s.raw("wan_status_text").map(|text| {
            let lower = text.to_ascii_lowercase();
            if lower.contains("disconnect") || !lower.contains("connect") {
                WanStatus::Disconnected
            } else {
                WanStatus::Connected
            }
        });

        let sim = SimInfo {
            apn: s.raw("apn"),
            iccid: s.raw("iccid"),
            sim_status: s.raw("sim_status"),
            active_slot: None,
        };

        let connected_devices = ConnectedDevices {
            count: s.raw("conn_dev_count").and_then(|v| v.parse().ok()),
            names: s.raw("conn_dev_names"),
        };

        CellFields {
            signal,
            network,
            sim,
            device: DeviceInfo {
                model: Some("FX3110".to_string()),
                manufacturer: Some("Inseego".to_string()),
                firmware: None,
                imei: None,
                serial: None,
            },
            wan_status,
            device_ipv4: s.raw("device_ipv4"),
            connected_devices,
            extras: s.extras.clone(),
        }
    }

    fn cell_status_object(&self, s: &RawSnapshot) -> Option<Value> {
        s.object("cell_status")
            .or_else(|| {
                let obj = s.object("cell1_status")?;
                if obj_up(&obj) == Some(true) {
                    Some(obj)
                } else {
                    s.object("cell2_status").or(Some(obj))
                }
            })
            .or_else(|| s.object("cell2_status"))
    }
}

/// Fresh values win; cached values fill the holes. Extras union the
/// same way, key by key.
fn merge(fresh: CellFields, cache: &CellFields) -> CellFields {
    let mut extras = cache.extras.clone();
    extras.extend(fresh.extras);
    CellFields {
        signal: SignalMetrics {
            rsrp: fresh.signal.rsrp.or(cache.signal.rsrp),
            rsrq: fresh.signal.rsrq.or(cache.signal.rsrq),
            sinr: fresh.signal.sinr.or(cache.signal.sinr),
            rssi: fresh.signal.rssi.or(cache.signal.rssi),
        },
        network: NetworkInfo {
            carrier: fresh.network.carrier.or_else(|| cache.network.carrier.clone()),
            technology: fresh.network.technology.or_else(|| cache.network.technology.clone()),
            band: fresh.network.band.or_else(|| cache.network.band.clone()),
            bandwidth: fresh.network.bandwidth.or_else(|| cache.network.bandwidth.clone()),
            ecgi: fresh.network.ecgi.or_else(|| cache.network.ecgi.clone()),
            pci: fresh.network.pci.or_else(|| cache.network.pci.clone()),
        },
        sim: SimInfo {
            apn: fresh.sim.apn.or_else(|| cache.sim.apn.clone()),
            iccid: fresh.sim.iccid.or_else(|| cache.sim.iccid.clone()),
            sim_status: fresh.sim.sim_status.or_else(|| cache.sim.sim_status.clone()),
            active_slot: fresh.sim.active_slot.or(cache.sim.active_slot),
        },
        device: DeviceInfo {
            model: fresh.device.model.or_else(|| cache.device.model.clone()),
            manufacturer: fresh.device.manufacturer.or_else(|| cache.device.manufacturer.clone()),
            firmware: fresh.device.firmware.or_else(|| cache.device.firmware.clone()),
            imei: fresh.device.imei.or_else(|| cache.device.imei.clone()),
            serial: fresh.device.serial.or_else(|| cache.device.serial.clone()),
        },
        wan_status: fresh.wan_status.or(cache.wan_status),
        device_ipv4: fresh.device_ipv4.or_else(|| cache.device_ipv4.clone()),
        connected_devices: ConnectedDevices {
            count: fresh.connected_devices.count.or(cache.connected_devices.count),
            names: fresh
                .connected_devices
                .names
                .or_else(|| cache.connected_devices.names.clone()),
        },
        extras,
    }
}

fn obj_up(obj: &Value) -> Option<bool> {
    obj.get("up").and_then(Value::as_bool)
}

fn obj_ipv4(obj: &Value) -> Option<String> {
    obj.get("ipv4-address")?
        .as_array()?
        .first()?
        .get("address")?
        .as_str()
        .map(str::to_string)
        .filter(|v| !v.is_empty())
}

fn cache_str(mcache: &Option<Value>, key: &str) -> Option<String> {
    let v = mcache.as_ref()?.get(key)?;
    match v {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                Some(s.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn cache_int(mcache: &Option<Value>, key: &str) -> Option<i32> {
    let v = mcache.as_ref()?.get(key)?;
    match v {
        Value::Number(n) => n.as_i64().map(|n| n as i32),
        Value::String(s) => leading_int(s),
        _ => None,
    }
}

/// `gsmctl -E` reports aggregated carriers; the primary one's bandwidth
/// is the useful number.
fn carrier_aggregation_bandwidth(mcache: &Option<Value>) -> Option<String> {
    let first = mcache.as_ref()?.get("ca_info")?.as_array()?.first()?;
    let v = first.get("bandwidth")?;
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// "LABEL: -90" out of free-text command output, case-insensitive.
fn grab_int(text: Option<&str>, label: &str) -> Option<i32> {
    grab_str(text, label).and_then(|v| v.parse().ok())
}

fn grab_str(text: Option<&str>, label: &str) -> Option<String> {
    let text = text?;
    let pattern = format!(r"(?i){}\s*:\s*(-?\d+)", regex::escape(label));
    let re = Regex::new(&pattern).ok()?;
    re.captures(text).map(|cap| cap[1].to_string())
}

/// First whitespace token as a signed integer ("-96" or "-96 dBm").
fn leading_int(text: &str) -> Option<i32> {
    text.split_whitespace().next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    fn ping_ok() -> PingResult {
        PingResult {
            dest: "8.8.8.8".to_string(),
            source_ip: Some("192.168.1.50".to_string()),
            active_interface: Some("eth0".to_string()),
            success: true,
            latency_ms: Some(18),
        }
    }

    fn script_snapshot() -> RawSnapshot {
        RawSnapshot {
            doc: Some(json!({
                "modem_info": {
                    "manuf": "Quectel",
                    "cache": {
                        "rsrp_value": -90,
                        "rsrq_value": -11,
                        "sinr_value": 13,
                        "rssi_value": -60,
                        "provider_name": "Telia",
                        "net_mode_str": "5G NSA",
                        "band_str": "n78",
                        "firmware": "RG520NEUDCR03A05M8G",
                        "imei": "860000000000001",
                        "serial_num": "SN12345",
                        "ca_info": [{"bandwidth": "100 MHz"}]
                    }
                },
                "mwan3_status": "interface wan is online\ninterface mob1s1a1 is online\nbalanced:\n wan (100%)",
                "wan_status": {"up": true, "ipv4-address": [{"address": "198.51.100.20"}]},
                "cell1_status": {"up": false},
                "active_sim": "1",
                "apn_sim1": "internet.apn",
                "iccid": "8946071234567890123",
                "sim_status": "inserted"
            })),
            fragments: BTreeMap::new(),
            extras: BTreeMap::new(),
        }
    }

    #[test]
    fn extracts_script_mode_document() {
        let mut normalizer = Normalizer::new(DeviceType::Rutm50, "mob1s1a1");
        let snapshot = script_snapshot();
        let sample = normalizer.normalize(
            datetime!(2025-06-01 12:00:00 UTC),
            Some(&snapshot),
            ping_ok(),
            Some("203.0.113.7".to_string()),
        );

        assert_eq!(sample.signal.rsrp, Some(-90));
        assert_eq!(sample.signal.rssi, Some(-60));
        assert_eq!(sample.network.carrier.as_deref(), Some("Telia"));
        assert_eq!(sample.network.band.as_deref(), Some("n78"));
        assert_eq!(sample.network.bandwidth.as_deref(), Some("100 MHz"));
        assert_eq!(sample.connection.wan_status, Some(WanStatus::Connected));
        assert_eq!(sample.connection.device_ipv4.as_deref(), Some("198.51.100.20"));
        assert_eq!(sample.sim.apn.as_deref(), Some("internet.apn"));
        assert_eq!(sample.sim.active_slot, Some(1));
        assert_eq!(sample.device.manufacturer.as_deref(), Some("Teltonika/Quectel"));
        assert_eq!(sample.device.serial.as_deref(), Some("SN12345"));
        assert_eq!(normalizer.consecutive_stale(), 0);
    }

    #[test]
    fn wan_signals_prefer_policy_and_carry_route() {
        let normalizer = Normalizer::new(DeviceType::Rutm50, "mob1s1a1");
        let mut snapshot = script_snapshot();
        snapshot
            .fragments
            .insert("route".to_string(), "8.8.8.8 dev mob1s1a1 src 10.0.0.2".to_string());

        let signals = normalizer.wan_signals(Some(&snapshot));
        assert_eq!(signals.policy.as_ref().unwrap().full_allocation(), Some("wan"));
        assert_eq!(signals.route_dev.as_deref(), Some("mob1s1a1"));
        assert_eq!(signals.iface_status.get("wan"), Some(&true));
    }

    #[test]
    fn per_command_fragments_parse_like_the_script() {
        let mut fragments = BTreeMap::new();
        fragments.insert(
            "signal_quality".to_string(),
            "RSSI: -61\nRSRP: -92\nRSRQ: -12\nSINR: 11\nCell ID: 123456789\nPCI: 201".to_string(),
        );
        fragments.insert("operator".to_string(), "Telia".to_string());
        fragments.insert("active_sim".to_string(), "2".to_string());
        fragments.insert("apn".to_string(), "m2m.apn".to_string());
        let snapshot = RawSnapshot {
            doc: None,
            fragments,
            extras: BTreeMap::new(),
        };

        let mut normalizer = Normalizer::new(DeviceType::Rutm50, "mob1s2a1");
        let sample = normalizer.normalize(
            datetime!(2025-06-01 12:00:00 UTC),
            Some(&snapshot),
            ping_ok(),
            None,
        );
        assert_eq!(sample.signal.rsrp, Some(-92));
        assert_eq!(sample.signal.sinr, Some(11));
        assert_eq!(sample.network.ecgi.as_deref(), Some("123456789"));
        assert_eq!(sample.network.pci.as_deref(), Some("201"));
        assert_eq!(sample.sim.apn.as_deref(), Some("m2m.apn"));
        assert_eq!(sample.sim.active_slot, Some(2));
    }

    #[test]
    fn failed_fetch_retains_prior_values_and_counts_stale() {
        let mut normalizer = Normalizer::new(DeviceType::Rutm50, "mob1s1a1");
        let snapshot = script_snapshot();
        normalizer.normalize(
            datetime!(2025-06-01 12:00:00 UTC),
            Some(&snapshot),
            ping_ok(),
            None,
        );

        let mut failed_ping = ping_ok();
        failed_ping.success = false;
        failed_ping.latency_ms = None;
        let stale = normalizer.normalize(
            datetime!(2025-06-01 12:00:05 UTC),
            None,
            failed_ping,
            None,
        );

        // cellular fields carried forward, probe fields fresh
        assert_eq!(stale.signal.rsrp, Some(-90));
        assert_eq!(stale.sim.iccid.as_deref(), Some("8946071234567890123"));
        assert!(!stale.ping.success);
        assert_eq!(stale.ping.latency_ms, None);
        assert_eq!(normalizer.consecutive_stale(), 1);

        // recovery resets the counter
        normalizer.normalize(
            datetime!(2025-06-01 12:00:10 UTC),
            Some(&snapshot),
            ping_ok(),
            None,
        );
        assert_eq!(normalizer.consecutive_stale(), 0);
    }

    #[test]
    fn first_cycle_unreachable_has_absent_fields_not_sentinels() {
        let mut normalizer = Normalizer::new(DeviceType::Rutm50, "mob1s1a1");
        let mut failed_ping = ping_ok();
        failed_ping.success = false;
        failed_ping.latency_ms = None;
        let sample = normalizer.normalize(
            datetime!(2025-06-01 12:00:00 UTC),
            None,
            failed_ping,
            None,
        );
        assert_eq!(sample.signal.rsrp, None);
        assert_eq!(sample.network.carrier, None);
        assert_eq!(sample.device.model, None);
        assert_eq!(normalizer.consecutive_stale(), 1);
    }

    #[test]
    fn normalization_is_idempotent() {
        let mut normalizer = Normalizer::new(DeviceType::Rutm50, "mob1s1a1");
        let snapshot = script_snapshot();
        let ts = datetime!(2025-06-01 12:00:00 UTC);
        let first = normalizer.normalize(ts, Some(&snapshot), ping_ok(), None);
        let second = normalizer.normalize(ts, Some(&snapshot), ping_ok(), None);
        assert_eq!(first, second);
    }

    #[test]
    fn fx3110_scrape_fields_normalize() {
        let mut fragments = BTreeMap::new();
        for (k, v) in [
            ("rsrp", "-96"),
            ("rsrq", "-11"),
            ("snr", "9"),
            ("carrier", "T-Mobile"),
            ("technology", "5G"),
            ("band", "n41"),
            ("wan_status_text", "Connected"),
            ("device_ipv4", "10.22.4.7"),
            ("conn_dev_count", "3"),
            ("conn_dev_names", "phone,laptop,tv"),
        ] {
            fragments.insert(k.to_string(), v.to_string());
        }
        let snapshot = RawSnapshot {
            doc: None,
            fragments,
            extras: BTreeMap::new(),
        };

        let mut normalizer = Normalizer::new(DeviceType::Fx3110, "mob1s1a1");
        let sample = normalizer.normalize(
            datetime!(2025-06-01 12:00:00 UTC),
            Some(&snapshot),
            ping_ok(),
            None,
        );
        assert_eq!(sample.signal.rsrp, Some(-96));
        assert_eq!(sample.signal.rssi, None);
        assert_eq!(sample.device.model.as_deref(), Some("FX3110"));
        assert_eq!(sample.connection.wan_status, Some(WanStatus::Connected));
        assert_eq!(sample.connected_devices.count, Some(3));

        // a cellular technology synthesizes single-uplink S1 flags
        let signals = normalizer.wan_signals(Some(&snapshot));
        assert_eq!(signals.iface_status.get("wan"), Some(&false));
        assert_eq!(signals.iface_status.get("mob1s1a1"), Some(&true));

        // an ethernet technology flips them
        let mut eth = snapshot.clone();
        eth.fragments.insert("technology".to_string(), "ethernet".to_string());
        let signals = normalizer.wan_signals(Some(&eth));
        assert_eq!(signals.iface_status.get("wan"), Some(&true));
        assert_eq!(signals.iface_status.get("mob1s1a1"), Some(&false));
    }
}
