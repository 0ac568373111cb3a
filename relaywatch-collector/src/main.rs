//! Relaywatch collector - WAN uplink monitoring daemon
//!
//! Polls a cellular router (SSH or HTTP scraping) and the local network
//! on a fixed interval, normalizes the output into one record per
//! cycle, resolves which uplink actually carries traffic, and appends
//! everything to the TSV sample log served by relaywatch-api.

mod adapters;
mod config;
mod normalizer;
mod probe;
mod recorder;
mod status;

use adapters::{DeviceAdapter, FetchError};
use anyhow::{Context, Result};
use config::CollectorConfig;
use normalizer::Normalizer;
use probe::NetworkProbe;
use recorder::Recorder;
use relaywatch_core::resolver::{InterfaceMap, WanResolver};
use relaywatch_core::store::SampleStore;
use status::{CollectorStatus, StatusFile};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::signal;
use tokio::time::{interval, Instant};
use tracing::{error, info, warn};

/// The coordinator: one collection cycle per interval tick, strictly
/// sequential so record order equals temporal order.
struct Collector {
    config: CollectorConfig,
    adapter: DeviceAdapter,
    probe: NetworkProbe,
    normalizer: Normalizer,
    resolver: WanResolver,
    recorder: Recorder,
    status_file: StatusFile,
    status: CollectorStatus,
    last_public_ip: Option<String>,
    next_public_ip_refresh: Instant,
}

impl Collector {
    fn new(config: CollectorConfig) -> Result<Self> {
        let adapter = DeviceAdapter::from_config(&config)?;
        let probe = NetworkProbe::new(
            &config.network.ping_target,
            config.network.bind_interface.clone(),
            config.network.public_ip_urls.clone(),
        )?;
        let normalizer = Normalizer::new(
            config.device_type,
            &config.devices.rutm50.cell_interface,
        );
        let resolver = WanResolver::new(InterfaceMap::new(config.wan.interface_map.clone()));
        let store = SampleStore::open(&config.monitor.log_file, config.extra_column_names())
            .with_context(|| {
                format!("failed to open sample log {}", config.monitor.log_file.display())
            })?;
        let status_file = StatusFile::new(&config.monitor.status_file);

        info!(
            "collector initialized - device: {:?}, log: {}",
            config.device_type,
            config.monitor.log_file.display()
        );

        Ok(Self {
            config,
            adapter,
            probe,
            normalizer,
            resolver,
            recorder: Recorder::new(store),
            status_file,
            status: CollectorStatus::starting(),
            last_public_ip: None,
            next_public_ip_refresh: Instant::now(),
        })
    }

    async fn run(&mut self) -> Result<()> {
        info!(
            "starting collection loop, interval {}s",
            self.config.monitor.interval_secs
        );
        let mut timer = interval(Duration::from_secs(self.config.monitor.interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if let Err(e) = self.cycle().await {
                        // a failed append must reach the operator, not vanish
                        error!("cycle failed: {e:#}");
                        self.status.last_append_ok = false;
                        self.status.last_error = Some(format!("{e:#}"));
                        if let Err(we) = self.status_file.write(&mut self.status) {
                            warn!("failed to write status file: {we}");
                        }
                    }
                }
                _ = signal::ctrl_c() => {
                    info!("shutdown signal received, finishing current cycle");
                    break;
                }
            }
        }

        self.status.running = false;
        self.status_file
            .write(&mut self.status)
            .context("failed to write final status")?;
        info!("collector stopped after {} cycles", self.status.cycles);
        Ok(())
    }

    /// One full cycle: fetch -> probe -> normalize -> resolve -> append.
    /// The normalizer never runs before the adapter call has completed
    /// (success or timeout), and the append completes or fails before
    /// the next cycle starts.
    async fn cycle(&mut self) -> Result<()> {
        let timestamp = OffsetDateTime::now_utc();

        // public IP lookups hit external services, so they run on their
        // own cadence; the last good value carries forward in between
        if Instant::now() >= self.next_public_ip_refresh {
            if let Some(ip) = self.probe.public_ip().await {
                self.last_public_ip = Some(ip);
            }
            self.next_public_ip_refresh =
                Instant::now() + Duration::from_secs(self.config.network.public_ip_refresh_secs);
        }

        let snapshot = match self.adapter.fetch_raw().await {
            Ok(snapshot) => {
                self.status.device_auth_failed = false;
                Some(snapshot)
            }
            Err(e) if e.is_transient() => {
                warn!("device fetch failed, reusing cached values: {e}");
                None
            }
            Err(e @ FetchError::Auth(_)) => {
                error!("device rejected our credentials - fix the configuration: {e}");
                self.status.device_auth_failed = true;
                None
            }
            Err(e) => {
                warn!("device response unusable: {e}");
                None
            }
        };

        let ping = self.probe.run().await;
        let mut sample = self.normalizer.normalize(
            timestamp,
            snapshot.as_ref(),
            ping,
            self.last_public_ip.clone(),
        );
        let signals = self.normalizer.wan_signals(snapshot.as_ref());
        sample.connection.wan_source = self.resolver.resolve(&signals);

        self.recorder
            .append(&sample, self.normalizer.consecutive_stale())
            .context("failed to append sample")?;

        self.status.cycles += 1;
        self.status.last_append_ok = true;
        self.status.last_error = None;
        self.status.consecutive_stale_cycles = self.normalizer.consecutive_stale();
        if let Err(e) = self.status_file.write(&mut self.status) {
            warn!("failed to write status file: {e}");
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().init();

    info!("Relaywatch collector v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = config::load_config().await;
    let mut collector = Collector::new(config).context("failed to initialize collector")?;
    collector.run().await.context("collector loop failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::RawSnapshot;
    use crate::config::DeviceType;
    use relaywatch_core::changes::{detect_changes, DEFAULT_RETAINED};
    use relaywatch_core::sample::{PingResult, WanSource};
    use serde_json::json;
    use time::macros::datetime;

    /// Cycle 1: device unreachable. Cycle 2: device answers with a 100%
    /// ethernet allocation. The log must show absent cellular fields,
    /// then Ethernet, and exactly one wan_source change event.
    #[test]
    fn two_cycle_outage_recovery_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.tsv");
        let store = SampleStore::open(&path, vec![]).unwrap();
        let mut recorder = Recorder::new(store);
        let mut normalizer = Normalizer::new(DeviceType::Rutm50, "mob1s1a1");
        let mut resolver = WanResolver::new(InterfaceMap::default());

        // cycle 1: unreachable device, failed ping
        let ping1 = PingResult::failed("8.8.8.8");
        let mut sample1 =
            normalizer.normalize(datetime!(2025-06-01 12:00:00 UTC), None, ping1, None);
        let signals1 = normalizer.wan_signals(None);
        sample1.connection.wan_source = resolver.resolve(&signals1);
        recorder.append(&sample1, normalizer.consecutive_stale()).unwrap();

        assert_eq!(sample1.signal.rsrp, None);
        assert_eq!(sample1.connection.wan_source, WanSource::Unknown);

        // cycle 2: device reachable, policy says ethernet carries traffic
        let snapshot = RawSnapshot {
            doc: Some(json!({
                "modem_info": {"cache": {"rsrp_value": -90}},
                "mwan3_status": "interface wan is online\nbalanced:\n wan (100%)"
            })),
            fragments: Default::default(),
            extras: Default::default(),
        };
        let ping2 = PingResult {
            dest: "8.8.8.8".to_string(),
            source_ip: Some("192.168.1.50".to_string()),
            active_interface: Some("eth0".to_string()),
            success: true,
            latency_ms: Some(21),
        };
        let mut sample2 = normalizer.normalize(
            datetime!(2025-06-01 12:00:05 UTC),
            Some(&snapshot),
            ping2,
            None,
        );
        let signals2 = normalizer.wan_signals(Some(&snapshot));
        sample2.connection.wan_source = resolver.resolve(&signals2);
        recorder.append(&sample2, normalizer.consecutive_stale()).unwrap();

        assert_eq!(sample2.signal.rsrp, Some(-90));
        assert_eq!(sample2.connection.wan_source, WanSource::Ethernet);

        // read back through the store and diff
        let samples = SampleStore::read_tail(&path, 100).unwrap();
        assert_eq!(samples.len(), 2);
        let events = detect_changes(&samples, DEFAULT_RETAINED);
        let wan_events: Vec<_> = events.iter().filter(|e| e.field == "wan_source").collect();
        assert_eq!(wan_events.len(), 1);
        assert_eq!(wan_events[0].old_value, "Unknown");
        assert_eq!(wan_events[0].new_value, "Ethernet");
    }
}
