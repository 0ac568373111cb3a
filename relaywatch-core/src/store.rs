//! Append-only TSV sample store
//!
//! One header line naming the columns, then one line per `Sample`, in
//! temporal order. Absent fields render as empty strings and parse back
//! as absent - never as a zero-like value. New columns are only ever
//! appended at the end of the row so historical parsers keep working.
//!
//! Writer discipline: each record is serialized into a single buffer and
//! written with one `write_all` + flush, so a reader either sees the
//! whole line or no line. The reader ignores a trailing line without a
//! newline terminator.

use crate::sample::{
    ConnectedDevices, ConnectionInfo, DeviceInfo, NetworkInfo, PingResult, Sample, SignalMetrics,
    SimInfo, WanSource, WanStatus,
};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::PrimitiveDateTime;

/// Wall-clock format used in the Timestamp column.
const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'_>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]");

/// Fixed column set, in historical order. Operator extras follow as
/// trailing columns.
pub const FIXED_COLUMNS: [&str; 31] = [
    "Timestamp",
    "SourceIP",
    "ActiveInterface",
    "DestIP",
    "Success",
    "Latency_ms",
    "PublicIP",
    "WanStatus",
    "WanSource",
    "SimStatus",
    "Tech",
    "Band",
    "Bandwidth",
    "DeviceIPv4",
    "Carrier",
    "APN",
    "ICCID",
    "ECGI",
    "PCI",
    "RSRP",
    "RSRQ",
    "SNR",
    "RSSI",
    "Model",
    "Manufacturer",
    "Firmware",
    "IMEI",
    "Serial",
    "ActiveSim",
    "ConnDevCount",
    "ConnDevNames",
];

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sample log has no header line")]
    MissingHeader,
    #[error("sample log header does not match configuration (found: {found})")]
    HeaderMismatch { found: String },
}

/// Append-only writer over the TSV log.
#[derive(Debug)]
pub struct SampleStore {
    path: PathBuf,
    extra_columns: Vec<String>,
}

impl SampleStore {
    /// Opens the store for appending. Writes the header line if the file
    /// is new or empty; refuses to append to a log whose header does not
    /// match the configured schema (an operator must rotate the log when
    /// changing extra columns).
    pub fn open(path: impl Into<PathBuf>, extra_columns: Vec<String>) -> Result<Self, StoreError> {
        let store = Self {
            path: path.into(),
            extra_columns,
        };
        if let Some(parent) = store.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&store.path)?;
        if file.metadata()?.len() == 0 {
            let mut line = store.header_line();
            line.push('\n');
            file.write_all(line.as_bytes())?;
            file.flush()?;
        } else {
            let found = first_line(&store.path)?.ok_or(StoreError::MissingHeader)?;
            if found != store.header_line() {
                return Err(StoreError::HeaderMismatch { found });
            }
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header_line(&self) -> String {
        let mut cols: Vec<&str> = FIXED_COLUMNS.to_vec();
        for extra in &self.extra_columns {
            cols.push(extra.as_str());
        }
        cols.join("\t")
    }

    /// Appends one record. A failure here is reported to the caller,
    /// never swallowed: a silent storage failure is indistinguishable
    /// from an idle device.
    pub fn append(&self, sample: &Sample) -> Result<(), StoreError> {
        let mut line = self.render_row(sample);
        line.push('\n');
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    fn render_row(&self, s: &Sample) -> String {
        let mut fields: Vec<String> = Vec::with_capacity(FIXED_COLUMNS.len() + self.extra_columns.len());
        fields.push(
            s.timestamp
                .format(TIMESTAMP_FORMAT)
                .unwrap_or_else(|_| String::new()),
        );
        fields.push(opt_str(&s.ping.source_ip));
        fields.push(opt_str(&s.ping.active_interface));
        fields.push(clean(&s.ping.dest));
        fields.push(if s.ping.success { "true" } else { "false" }.to_string());
        fields.push(opt_num(s.ping.latency_ms));
        fields.push(opt_str(&s.public_ip));
        fields.push(s.connection.wan_status.map(|w| w.as_str()).unwrap_or("").to_string());
        fields.push(s.connection.wan_source.as_str().to_string());
        fields.push(opt_str(&s.sim.sim_status));
        fields.push(opt_str(&s.network.technology));
        fields.push(opt_str(&s.network.band));
        fields.push(opt_str(&s.network.bandwidth));
        fields.push(opt_str(&s.connection.device_ipv4));
        fields.push(opt_str(&s.network.carrier));
        fields.push(opt_str(&s.sim.apn));
        fields.push(opt_str(&s.sim.iccid));
        fields.push(opt_str(&s.network.ecgi));
        fields.push(opt_str(&s.network.pci));
        fields.push(opt_num(s.signal.rsrp));
        fields.push(opt_num(s.signal.rsrq));
        fields.push(opt_num(s.signal.sinr));
        fields.push(opt_num(s.signal.rssi));
        fields.push(opt_str(&s.device.model));
        fields.push(opt_str(&s.device.manufacturer));
        fields.push(opt_str(&s.device.firmware));
        fields.push(opt_str(&s.device.imei));
        fields.push(opt_str(&s.device.serial));
        fields.push(opt_num(s.sim.active_slot));
        fields.push(opt_num(s.connected_devices.count));
        fields.push(opt_str(&s.connected_devices.names));
        for extra in &self.extra_columns {
            fields.push(s.extras.get(extra).map(|v| clean(v)).unwrap_or_default());
        }
        fields.join("\t")
    }

    /// Reads back up to `max` of the most recent records, parsed against
    /// the file's own header so logs written with older or richer column
    /// sets stay readable. Malformed rows and a torn trailing line are
    /// skipped.
    pub fn read_tail(path: &Path, max: usize) -> Result<Vec<Sample>, StoreError> {
        let content = std::fs::read_to_string(path)?;
        let mut lines = complete_lines(&content);
        let header = lines.next().ok_or(StoreError::MissingHeader)?;
        let columns: Vec<&str> = header.split('\t').collect();
        if columns.first() != Some(&"Timestamp") {
            return Err(StoreError::MissingHeader);
        }
        let rows: Vec<&str> = lines.collect();
        let start = rows.len().saturating_sub(max);
        let mut samples = Vec::with_capacity(rows.len() - start);
        for row in &rows[start..] {
            if let Some(sample) = parse_row(&columns, row) {
                samples.push(sample);
            }
        }
        Ok(samples)
    }
}

/// Lines that were fully written (newline-terminated). A record still
/// being appended is invisible to readers.
fn complete_lines(content: &str) -> impl Iterator<Item = &str> {
    content
        .split_inclusive('\n')
        .filter(|l| l.ends_with('\n'))
        .map(|l| l.trim_end_matches(['\n', '\r']))
}

fn first_line(path: &Path) -> Result<Option<String>, StoreError> {
    let content = std::fs::read_to_string(path)?;
    let first = complete_lines(&content).next().map(|l| l.to_string());
    Ok(first)
}

fn opt_str(v: &Option<String>) -> String {
    v.as_deref().map(clean).unwrap_or_default()
}

fn opt_num<T: ToString>(v: Option<T>) -> String {
    v.map(|n| n.to_string()).unwrap_or_default()
}

/// Tabs and newlines inside device-reported strings would corrupt the
/// row structure; collapse them to spaces.
fn clean(v: &str) -> String {
    if v.contains(['\t', '\n', '\r']) {
        v.replace(['\t', '\n', '\r'], " ")
    } else {
        v.to_string()
    }
}

fn parse_row(columns: &[&str], row: &str) -> Option<Sample> {
    let values: Vec<&str> = row.split('\t').collect();
    let get = |name: &str| -> Option<&str> {
        columns
            .iter()
            .position(|c| *c == name)
            .and_then(|i| values.get(i))
            .copied()
            .filter(|v| !v.is_empty())
    };

    let ts_raw = get("Timestamp")?;
    let timestamp = PrimitiveDateTime::parse(ts_raw, TIMESTAMP_FORMAT)
        .ok()?
        .assume_utc();

    let sample = Sample {
        timestamp,
        ping: PingResult {
            dest: get("DestIP").unwrap_or_default().to_string(),
            source_ip: get("SourceIP").map(str::to_string),
            active_interface: get("ActiveInterface").map(str::to_string),
            success: get("Success").map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false),
            latency_ms: get("Latency_ms").and_then(|v| v.parse().ok()),
        },
        public_ip: get("PublicIP").map(str::to_string),
        signal: SignalMetrics {
            rsrp: parse_signed(get("RSRP")),
            rsrq: parse_signed(get("RSRQ")),
            sinr: parse_signed(get("SNR")),
            rssi: parse_signed(get("RSSI")),
        },
        network: NetworkInfo {
            carrier: get("Carrier").map(str::to_string),
            technology: get("Tech").map(str::to_string),
            band: get("Band").map(str::to_string),
            bandwidth: get("Bandwidth").map(str::to_string),
            ecgi: get("ECGI").map(str::to_string),
            pci: get("PCI").map(str::to_string),
        },
        connection: ConnectionInfo {
            wan_status: get("WanStatus").and_then(WanStatus::parse),
            wan_source: get("WanSource")
                .and_then(WanSource::parse)
                .unwrap_or(WanSource::Unknown),
            device_ipv4: get("DeviceIPv4").map(str::to_string),
        },
        sim: SimInfo {
            apn: get("APN").map(str::to_string),
            iccid: get("ICCID").map(str::to_string),
            sim_status: get("SimStatus").map(str::to_string),
            active_slot: get("ActiveSim").and_then(|v| v.parse().ok()),
        },
        device: DeviceInfo {
            model: get("Model").map(str::to_string),
            manufacturer: get("Manufacturer").map(str::to_string),
            firmware: get("Firmware").map(str::to_string),
            imei: get("IMEI").map(str::to_string),
            serial: get("Serial").map(str::to_string),
        },
        connected_devices: ConnectedDevices {
            count: get("ConnDevCount").and_then(|v| v.parse().ok()),
            names: get("ConnDevNames").map(str::to_string),
        },
        extras: {
            let mut extras = BTreeMap::new();
            for (i, col) in columns.iter().enumerate().skip(FIXED_COLUMNS.len()) {
                if let Some(v) = values.get(i).copied().filter(|v| !v.is_empty()) {
                    extras.insert(col.to_string(), v.to_string());
                }
            }
            extras
        },
    };
    Some(sample)
}

/// Legacy logs render signal values as "-90 dBm"; take the first token.
fn parse_signed(v: Option<&str>) -> Option<i32> {
    v.and_then(|s| s.split_whitespace().next())
        .and_then(|t| t.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use time::OffsetDateTime;

    fn sample_at(ts: OffsetDateTime) -> Sample {
        let mut s = Sample::empty(ts, "8.8.8.8");
        s.ping.success = true;
        s.ping.latency_ms = Some(23);
        s.ping.source_ip = Some("192.168.1.50".into());
        s.ping.active_interface = Some("eth0".into());
        s.public_ip = Some("203.0.113.7".into());
        s.signal.rsrp = Some(-90);
        s.signal.rsrq = Some(-12);
        s.signal.sinr = Some(14);
        s.network.carrier = Some("Telia".into());
        s.network.technology = Some("5G NSA".into());
        s.network.band = Some("n78".into());
        s.connection.wan_status = Some(WanStatus::Connected);
        s.connection.wan_source = WanSource::Cellular;
        s.connection.device_ipv4 = Some("10.64.12.3".into());
        s.sim.apn = Some("internet".into());
        s.sim.iccid = Some("8946071234567890123".into());
        s.sim.active_slot = Some(1);
        s.device.model = Some("RUTM50".into());
        s.device.manufacturer = Some("Teltonika".into());
        s.extras.insert("uptime".into(), "1234".into());
        s
    }

    #[test]
    fn round_trips_written_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.tsv");
        let store = SampleStore::open(&path, vec!["uptime".into()]).unwrap();

        let a = sample_at(datetime!(2025-06-01 12:00:00.000 UTC));
        let mut b = sample_at(datetime!(2025-06-01 12:00:05.250 UTC));
        b.signal.rsrp = None; // absent, not zero
        b.extras.clear();

        store.append(&a).unwrap();
        store.append(&b).unwrap();

        let read = SampleStore::read_tail(&path, 100).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[0], a);
        assert_eq!(read[1], b);
        assert_eq!(read[1].signal.rsrp, None);
    }

    #[test]
    fn absent_fields_stay_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.tsv");
        let store = SampleStore::open(&path, vec![]).unwrap();
        let s = Sample::empty(datetime!(2025-06-01 12:00:00.000 UTC), "8.8.8.8");
        store.append(&s).unwrap();

        let read = SampleStore::read_tail(&path, 10).unwrap();
        assert_eq!(read[0].signal, SignalMetrics::default());
        assert_eq!(read[0].ping.latency_ms, None);
        assert_eq!(read[0].public_ip, None);
        // wan_source is always present, even when unresolvable
        assert_eq!(read[0].connection.wan_source, WanSource::Unknown);
    }

    #[test]
    fn torn_trailing_line_is_invisible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.tsv");
        let store = SampleStore::open(&path, vec![]).unwrap();
        store.append(&sample_at(datetime!(2025-06-01 12:00:00.000 UTC))).unwrap();

        // simulate a writer crash mid-record
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"2025-06-01 12:00:05.000\t192.168").unwrap();
        drop(file);

        let read = SampleStore::read_tail(&path, 10).unwrap();
        assert_eq!(read.len(), 1);
    }

    #[test]
    fn refuses_mismatched_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.tsv");
        SampleStore::open(&path, vec!["uptime".into()]).unwrap();
        let err = SampleStore::open(&path, vec!["temperature".into()]).unwrap_err();
        assert!(matches!(err, StoreError::HeaderMismatch { .. }));
    }

    #[test]
    fn reads_legacy_dbm_suffixed_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.tsv");
        let header = FIXED_COLUMNS.join("\t");
        let mut row = vec![""; FIXED_COLUMNS.len()];
        row[0] = "2025-06-01 12:00:00.000";
        row[3] = "8.8.8.8";
        row[4] = "True"; // python-era logs capitalize booleans
        row[8] = "Cellular";
        row[19] = "-91 dBm";
        std::fs::write(&path, format!("{}\n{}\n", header, row.join("\t"))).unwrap();

        let read = SampleStore::read_tail(&path, 10).unwrap();
        assert_eq!(read.len(), 1);
        assert!(read[0].ping.success);
        assert_eq!(read[0].signal.rsrp, Some(-91));
        assert_eq!(read[0].connection.wan_source, WanSource::Cellular);
    }
}
