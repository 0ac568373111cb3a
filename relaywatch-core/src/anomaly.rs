//! Anomaly detection over a trailing sample window
//!
//! Computed on demand, never persisted. The window's older half forms
//! the baseline average; every sample in the newer half is checked
//! against it:
//!
//! - SignalDrop:   RSRP <= baseline - rsrp_threshold
//! - LatencySpike: latency >= baseline + latency_threshold
//! - PingFailure:  ping.success == false
//!
//! Severity is two-tier on purpose: Critical iff the breach magnitude
//! reaches twice the configured threshold, otherwise Warning. The
//! doubling rule is a deliberate simplification, not a statistical
//! model - keep it literal.

use crate::sample::Sample;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;

/// Minimum number of samples before anomaly detection says anything.
const MIN_SAMPLES: usize = 10;

/// Bound on the number of reported events, most recent kept.
const MAX_EVENTS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    SignalDrop,
    LatencySpike,
    PingFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyEvent {
    pub timestamp: String,
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub observed: Option<f64>,
    pub baseline: Option<f64>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct AnomalyConfig {
    /// dB below the baseline RSRP average that counts as a drop.
    pub rsrp_threshold: i32,
    /// ms above the baseline latency average that counts as a spike.
    pub latency_threshold: u32,
    /// Trailing window size in samples.
    pub window: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            rsrp_threshold: 10,
            latency_threshold: 50,
            window: 100,
        }
    }
}

/// Critical iff the breach magnitude reaches 2x the threshold.
pub fn severity_for(breach: f64, threshold: f64) -> Severity {
    if breach >= 2.0 * threshold {
        Severity::Critical
    } else {
        Severity::Warning
    }
}

/// Checks a single RSRP reading against the baseline average. Returns
/// the severity and breach magnitude when the drop threshold is reached.
pub fn check_rsrp(current: i32, baseline: f64, threshold: i32) -> Option<(Severity, f64)> {
    let breach = baseline - current as f64;
    if breach >= threshold as f64 {
        Some((severity_for(breach, threshold as f64), breach))
    } else {
        None
    }
}

/// Checks a single latency reading against the baseline average.
pub fn check_latency(current: u32, baseline: f64, threshold: u32) -> Option<(Severity, f64)> {
    let breach = current as f64 - baseline;
    if breach >= threshold as f64 {
        Some((severity_for(breach, threshold as f64), breach))
    } else {
        None
    }
}

/// Scans the trailing window for anomalies. Baseline averages come from
/// the older half of the window; the newer half is evaluated.
pub fn detect_anomalies(samples: &[Sample], cfg: &AnomalyConfig) -> Vec<AnomalyEvent> {
    if samples.len() < MIN_SAMPLES {
        return Vec::new();
    }
    let start = samples.len().saturating_sub(cfg.window);
    let window = &samples[start..];
    let half = window.len() / 2;
    let (baseline_part, check_part) = window.split_at(half);

    let baseline_rsrp = average(baseline_part.iter().filter_map(|s| s.signal.rsrp.map(f64::from)));
    let baseline_latency =
        average(baseline_part.iter().filter_map(|s| s.ping.latency_ms.map(f64::from)));

    let mut events = Vec::new();
    for sample in check_part {
        let ts = sample.timestamp.format(&Rfc3339).unwrap_or_default();

        if let (Some(avg), Some(rsrp)) = (baseline_rsrp, sample.signal.rsrp) {
            if let Some((severity, _breach)) = check_rsrp(rsrp, avg, cfg.rsrp_threshold) {
                events.push(AnomalyEvent {
                    timestamp: ts.clone(),
                    kind: AnomalyKind::SignalDrop,
                    severity,
                    observed: Some(f64::from(rsrp)),
                    baseline: Some(avg),
                    message: format!("RSRP dropped to {} dBm (avg: {:.1} dBm)", rsrp, avg),
                });
            }
        }

        if let (Some(avg), Some(latency)) = (baseline_latency, sample.ping.latency_ms) {
            if let Some((severity, _breach)) = check_latency(latency, avg, cfg.latency_threshold) {
                events.push(AnomalyEvent {
                    timestamp: ts.clone(),
                    kind: AnomalyKind::LatencySpike,
                    severity,
                    observed: Some(f64::from(latency)),
                    baseline: Some(avg),
                    message: format!("Latency spiked to {} ms (avg: {:.1} ms)", latency, avg),
                });
            }
        }

        if !sample.ping.success {
            events.push(AnomalyEvent {
                timestamp: ts,
                kind: AnomalyKind::PingFailure,
                severity: Severity::Critical,
                observed: None,
                baseline: None,
                message: format!("Ping to {} failed", sample.ping.dest),
            });
        }
    }

    if events.len() > MAX_EVENTS {
        events.drain(..events.len() - MAX_EVENTS);
    }
    events
}

fn average(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for v in values {
        sum += v;
        count += 1;
    }
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}
