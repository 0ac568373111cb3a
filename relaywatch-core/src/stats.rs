//! Aggregate statistics over a sample window, for the dashboard.

use crate::sample::Sample;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MinAvgMax {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
}

impl MinAvgMax {
    fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for &v in values {
            min = min.min(v);
            max = max.max(v);
            sum += v;
        }
        Self {
            min,
            avg: sum / values.len() as f64,
            max,
        }
    }
}

/// Summary over a recent window: ping success rate, latency and RSRP
/// spread, plus the current network identity.
#[derive(Debug, Clone, Serialize)]
pub struct WindowStats {
    pub total_samples: usize,
    pub success_rate: f64,
    pub latency: MinAvgMax,
    pub rsrp: MinAvgMax,
    pub current_carrier: Option<String>,
    pub current_technology: Option<String>,
    pub current_band: Option<String>,
}

/// `None` when the window is empty.
pub fn compute_stats(samples: &[Sample]) -> Option<WindowStats> {
    let last = samples.last()?;

    let successes = samples.iter().filter(|s| s.ping.success).count();
    let latencies: Vec<f64> = samples
        .iter()
        .filter_map(|s| s.ping.latency_ms.map(f64::from))
        .collect();
    let rsrps: Vec<f64> = samples
        .iter()
        .filter_map(|s| s.signal.rsrp.map(f64::from))
        .collect();

    Some(WindowStats {
        total_samples: samples.len(),
        success_rate: successes as f64 / samples.len() as f64 * 100.0,
        latency: MinAvgMax::from_values(&latencies),
        rsrp: MinAvgMax::from_values(&rsrps),
        current_carrier: last.network.carrier.clone(),
        current_technology: last.network.technology.clone(),
        current_band: last.network.band.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::{Duration, OffsetDateTime};

    #[test]
    fn computes_spread_over_present_values_only() {
        let mut samples = Vec::new();
        for (i, (lat, rsrp)) in [(Some(10), Some(-85)), (None, None), (Some(30), Some(-95))]
            .iter()
            .enumerate()
        {
            let ts = OffsetDateTime::UNIX_EPOCH + Duration::seconds(5 * i as i64);
            let mut s = Sample::empty(ts, "8.8.8.8");
            s.ping.success = lat.is_some();
            s.ping.latency_ms = *lat;
            s.signal.rsrp = *rsrp;
            s.network.carrier = Some("Telia".into());
            samples.push(s);
        }

        let stats = compute_stats(&samples).unwrap();
        assert_eq!(stats.total_samples, 3);
        assert_eq!(stats.latency.min, 10.0);
        assert_eq!(stats.latency.avg, 20.0);
        assert_eq!(stats.latency.max, 30.0);
        assert_eq!(stats.rsrp.min, -95.0);
        assert_eq!(stats.rsrp.max, -85.0);
        assert!((stats.success_rate - 66.666).abs() < 0.01);
        assert_eq!(stats.current_carrier.as_deref(), Some("Telia"));
    }

    #[test]
    fn empty_window_has_no_stats() {
        assert!(compute_stats(&[]).is_none());
    }
}
