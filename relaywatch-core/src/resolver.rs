//! WAN source resolver
//!
//! Decides, once per cycle, which physical uplink actually forwards
//! traffic. Three signal sources disagree in practice:
//!
//! - S1: per-interface "connected" flags - unreliable, both uplinks can
//!   report connected while only one routes traffic
//! - S2: the multi-WAN failover policy table (mwan3) - authoritative
//!   when present, it reflects policy-driven forwarding
//! - S3: a direct route lookup toward a reference destination
//!
//! Priority is strictly S2 > S3 > S1. Interface-status flags alone used
//! to report "Cellular" while public-IP evidence showed Ethernet was
//! carrying the traffic, which is why S2 wins whenever it is usable.

use crate::sample::WanSource;
use regex::Regex;
use std::collections::BTreeMap;

/// Maps device interface names (mob1s1a1, wan, eth0.2, ...) onto the
/// stable {Cellular, Ethernet} classification. Exact entries come from
/// configuration; unknown names fall back to name-prefix heuristics.
#[derive(Debug, Clone)]
pub struct InterfaceMap {
    map: BTreeMap<String, WanSource>,
}

impl Default for InterfaceMap {
    fn default() -> Self {
        let mut map = BTreeMap::new();
        map.insert("wan".to_string(), WanSource::Ethernet);
        map.insert("mob1s1a1".to_string(), WanSource::Cellular);
        map.insert("mob1s2a1".to_string(), WanSource::Cellular);
        Self { map }
    }
}

impl InterfaceMap {
    pub fn new(map: BTreeMap<String, WanSource>) -> Self {
        Self { map }
    }

    pub fn classify(&self, iface: &str) -> WanSource {
        if let Some(src) = self.map.get(iface) {
            return *src;
        }
        let lower = iface.to_ascii_lowercase();
        if lower.contains("mob") || lower.starts_with("wwan") || lower.starts_with("qmi") {
            WanSource::Cellular
        } else if lower.starts_with("eth")
            || lower.starts_with("en")
            || lower.contains("lan")
            || lower.contains("wan")
        {
            WanSource::Ethernet
        } else {
            WanSource::Unknown
        }
    }
}

/// Parsed mwan3 policy allocations: interface -> percentage of new
/// connections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyTable {
    allocations: Vec<(String, u32)>,
}

impl PolicyTable {
    /// The interface holding exactly 100% of new connections, if any.
    /// Mid-transition splits (e.g. 70/30) have no single holder.
    pub fn full_allocation(&self) -> Option<&str> {
        self.allocations
            .iter()
            .find(|(_, pct)| *pct == 100)
            .map(|(iface, _)| iface.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }
}

/// Parses `mwan3 status` policy lines like "mob1s1a1 (100%)" or
/// "wan (100%)". Works on both multiline and flattened output. Returns
/// `None` when no allocation is found at all (S2 unusable).
pub fn parse_policy(text: &str) -> Option<PolicyTable> {
    let re = Regex::new(r"(?m)(?:^|\s)(\w+)\s*\((\d+)%\)").ok()?;
    let mut allocations = Vec::new();
    for cap in re.captures_iter(text) {
        let iface = cap[1].to_string();
        if let Ok(pct) = cap[2].parse::<u32>() {
            allocations.push((iface, pct));
        }
    }
    if allocations.is_empty() {
        None
    } else {
        Some(PolicyTable { allocations })
    }
}

/// Parses `mwan3 status` interface lines like
/// "interface wan is online" into name -> connected flags.
pub fn parse_interface_status(text: &str) -> BTreeMap<String, bool> {
    let mut status = BTreeMap::new();
    if let Ok(re) = Regex::new(r"(?im)^\s*interface\s+(\S+)\s+is\s+(\w+)") {
        for cap in re.captures_iter(text) {
            let up = matches!(cap[2].to_ascii_lowercase().as_str(), "online" | "up");
            status.insert(cap[1].to_string(), up);
        }
    }
    status
}

/// Extracts the egress device from `ip route get <dest>` output.
pub fn parse_route_device(text: &str) -> Option<String> {
    let re = Regex::new(r"\bdev\s+(\S+)").ok()?;
    re.captures(text).map(|cap| cap[1].to_string())
}

/// Everything one cycle observed that bears on the WAN source question.
#[derive(Debug, Clone, Default)]
pub struct WanSignals {
    /// S2: failover policy allocations, when `mwan3 status` was
    /// available and parseable.
    pub policy: Option<PolicyTable>,
    /// S3: egress device of a route lookup toward the reference
    /// destination.
    pub route_dev: Option<String>,
    /// S1: per-interface connected flags.
    pub iface_status: BTreeMap<String, bool>,
}

/// The resolver itself. Owns the retained value used to damp noise:
/// when a cycle is undecidable the previous cycle's answer is reported
/// rather than oscillating through `Unknown`.
#[derive(Debug)]
pub struct WanResolver {
    map: InterfaceMap,
    last: Option<WanSource>,
}

impl WanResolver {
    pub fn new(map: InterfaceMap) -> Self {
        Self { map, last: None }
    }

    /// Runs the decision procedure for one cycle.
    ///
    /// 1. S2: an interface with exactly 100% allocation wins.
    /// 2. S3: classify the route egress device.
    /// 3. S1: exactly one connected interface - pick it.
    /// 4. Still undecidable: previous cycle's value, or `Unknown` on the
    ///    very first cycle.
    pub fn resolve(&mut self, signals: &WanSignals) -> WanSource {
        let candidate = self.decide(signals);
        if candidate != WanSource::Unknown {
            self.last = Some(candidate);
            candidate
        } else {
            self.last.unwrap_or(WanSource::Unknown)
        }
    }

    fn decide(&self, signals: &WanSignals) -> WanSource {
        if let Some(policy) = &signals.policy {
            if let Some(iface) = policy.full_allocation() {
                let src = self.map.classify(iface);
                if src != WanSource::Unknown {
                    return src;
                }
            }
        }
        if let Some(dev) = &signals.route_dev {
            let src = self.map.classify(dev);
            if src != WanSource::Unknown {
                return src;
            }
        }
        let connected: Vec<&String> = signals
            .iface_status
            .iter()
            .filter(|(_, up)| **up)
            .map(|(iface, _)| iface)
            .collect();
        if connected.len() == 1 {
            return self.map.classify(connected[0]);
        }
        WanSource::Unknown
    }

    /// Last resolved value, if any cycle has decided yet.
    pub fn last(&self) -> Option<WanSource> {
        self.last
    }
}
