//! Change detection over tracked Sample fields
//!
//! Compares each cycle to the previous one. Equality is exact, and an
//! event fires only when BOTH sides are present: a field carried forward
//! by the stale cache (or simply absent) is a cache hit, not a
//! transition back to its old value.

use crate::sample::Sample;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Fields watched for discrete transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedField {
    WanSource,
    PublicIp,
    DeviceIpv4,
    Carrier,
    Apn,
    Iccid,
}

impl TrackedField {
    pub const ALL: [TrackedField; 6] = [
        TrackedField::WanSource,
        TrackedField::PublicIp,
        TrackedField::DeviceIpv4,
        TrackedField::Carrier,
        TrackedField::Apn,
        TrackedField::Iccid,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TrackedField::WanSource => "wan_source",
            TrackedField::PublicIp => "public_ip",
            TrackedField::DeviceIpv4 => "device_ipv4",
            TrackedField::Carrier => "carrier",
            TrackedField::Apn => "apn",
            TrackedField::Iccid => "iccid",
        }
    }
}

/// One observed transition of a tracked field. Read-only once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub timestamp: String,
    pub field: &'static str,
    pub old_value: String,
    pub new_value: String,
}

/// Default bound on the number of retained change events.
pub const DEFAULT_RETAINED: usize = 20;

/// Diffs adjacent samples and returns the most recent `retain` events,
/// oldest first. An A -> B -> A sequence across consecutive samples
/// yields both transitions.
pub fn detect_changes(samples: &[Sample], retain: usize) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    for pair in samples.windows(2) {
        let (prev, curr) = (&pair[0], &pair[1]);
        for field in TrackedField::ALL {
            let old = prev.tracked_value(field);
            let new = curr.tracked_value(field);
            if let (Some(old), Some(new)) = (old, new) {
                if old != new {
                    events.push(ChangeEvent {
                        timestamp: format_ts(curr.timestamp),
                        field: field.name(),
                        old_value: old,
                        new_value: new,
                    });
                }
            }
        }
    }
    if events.len() > retain {
        events.drain(..events.len() - retain);
    }
    events
}

fn format_ts(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::WanSource;
    use time::Duration;

    fn samples_with_apn(apns: &[Option<&str>]) -> Vec<Sample> {
        let mut out = Vec::new();
        for (i, apn) in apns.iter().enumerate() {
            let ts = OffsetDateTime::UNIX_EPOCH + Duration::seconds(5 * i as i64);
            let mut s = Sample::empty(ts, "8.8.8.8");
            s.sim.apn = apn.map(str::to_string);
            out.push(s);
        }
        out
    }

    #[test]
    fn a_b_a_yields_exactly_two_events() {
        let samples = samples_with_apn(&[Some("A"), Some("A"), Some("B"), Some("B"), Some("A")]);
        let events = detect_changes(&samples, DEFAULT_RETAINED);
        assert_eq!(events.len(), 2);
        assert_eq!((events[0].old_value.as_str(), events[0].new_value.as_str()), ("A", "B"));
        assert_eq!((events[1].old_value.as_str(), events[1].new_value.as_str()), ("B", "A"));
        assert!(events.iter().all(|e| e.field == "apn"));
    }

    #[test]
    fn absent_value_is_a_cache_hit_not_a_transition() {
        let samples = samples_with_apn(&[Some("A"), None, Some("A")]);
        let events = detect_changes(&samples, DEFAULT_RETAINED);
        assert!(events.is_empty());
    }

    #[test]
    fn wan_source_unknown_is_a_real_value() {
        let mut samples = samples_with_apn(&[None, None]);
        samples[0].connection.wan_source = WanSource::Unknown;
        samples[1].connection.wan_source = WanSource::Ethernet;
        let events = detect_changes(&samples, DEFAULT_RETAINED);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].field, "wan_source");
        assert_eq!(events[0].old_value, "Unknown");
        assert_eq!(events[0].new_value, "Ethernet");
    }

    #[test]
    fn retention_keeps_the_most_recent_events() {
        let mut apns = Vec::new();
        for i in 0..30 {
            apns.push(if i % 2 == 0 { "even" } else { "odd" });
        }
        let samples = samples_with_apn(&apns.iter().map(|a| Some(*a)).collect::<Vec<_>>());
        let events = detect_changes(&samples, 5);
        assert_eq!(events.len(), 5);
        // the last transition of the sequence is the last event kept
        assert_eq!(events.last().unwrap().new_value, "odd");
    }
}
