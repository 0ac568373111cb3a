//! Collector configuration
//!
//! YAML file (path from `RELAYWATCH_CONFIG`, default `relaywatch.yaml`)
//! with environment variable overrides for container deployments.
//! Missing file means defaults plus whatever the environment provides.

use relaywatch_core::sample::WanSource;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Teltonika RUT-series over SSH (gsmctl / mwan3 / ubus).
    Rutm50,
    /// Inseego FX-series over HTTP scraping.
    Fx3110,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub device_type: DeviceType,
    pub monitor: MonitorConf,
    pub network: NetworkConf,
    pub devices: DevicesConf,
    pub wan: WanConf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConf {
    /// Seconds between collection cycles.
    pub interval_secs: u64,
    pub log_file: PathBuf,
    pub status_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConf {
    /// Ping destination, also the WAN resolver's reference destination.
    pub ping_target: String,
    pub bind_interface: Option<String>,
    pub public_ip_urls: Vec<String>,
    /// Seconds between public IP lookups (they hit external services).
    pub public_ip_refresh_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DevicesConf {
    pub rutm50: Rutm50Conf,
    pub fx3110: Fx3110Conf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Rutm50Conf {
    pub ssh: SshConf,
    pub cell_interface: String,
    pub collector_script: ScriptConf,
    /// Operator-defined commands whose raw output flows into the log as
    /// trailing columns, untouched.
    pub extra_commands: Vec<ExtraCommand>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SshConf {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub password: Option<String>,
    pub key: Option<String>,
    pub strict_host_key: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScriptConf {
    /// One SSH session per cycle instead of ~12 when the collector
    /// script is installed on the router.
    pub enabled: bool,
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtraCommand {
    pub name: String,
    pub command: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Fx3110Conf {
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WanConf {
    /// Interface name -> {Cellular, Ethernet} for the resolver.
    pub interface_map: BTreeMap<String, WanSource>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            device_type: DeviceType::Fx3110,
            monitor: MonitorConf::default(),
            network: NetworkConf::default(),
            devices: DevicesConf::default(),
            wan: WanConf::default(),
        }
    }
}

impl Default for MonitorConf {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            log_file: PathBuf::from("./logs/relaywatch.tsv"),
            status_file: PathBuf::from("./logs/collector_status.json"),
        }
    }
}

impl Default for NetworkConf {
    fn default() -> Self {
        Self {
            ping_target: "8.8.8.8".to_string(),
            bind_interface: None,
            public_ip_urls: vec![
                "https://ifconfig.me/ip".to_string(),
                "https://api.ipify.org".to_string(),
                "https://checkip.amazonaws.com".to_string(),
            ],
            public_ip_refresh_secs: 300,
        }
    }
}

impl Default for Rutm50Conf {
    fn default() -> Self {
        Self {
            ssh: SshConf::default(),
            cell_interface: "mob1s1a1".to_string(),
            collector_script: ScriptConf::default(),
            extra_commands: Vec::new(),
        }
    }
}

impl Default for SshConf {
    fn default() -> Self {
        Self {
            host: String::new(),
            user: "root".to_string(),
            port: 22,
            password: None,
            key: None,
            strict_host_key: "accept-new".to_string(),
            timeout_secs: 5,
        }
    }
}

impl Default for ScriptConf {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "/tmp/relaywatch_collector.sh".to_string(),
        }
    }
}

impl Default for Fx3110Conf {
    fn default() -> Self {
        Self {
            base_url: "http://192.168.1.1".to_string(),
        }
    }
}

impl Default for WanConf {
    fn default() -> Self {
        let mut interface_map = BTreeMap::new();
        interface_map.insert("wan".to_string(), WanSource::Ethernet);
        interface_map.insert("mob1s1a1".to_string(), WanSource::Cellular);
        interface_map.insert("mob1s2a1".to_string(), WanSource::Cellular);
        Self { interface_map }
    }
}

/// Loads the YAML config, then applies environment overrides.
pub async fn load_config() -> CollectorConfig {
    let path = std::env::var("RELAYWATCH_CONFIG").unwrap_or_else(|_| "relaywatch.yaml".into());
    let mut config = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        if txt.trim().is_empty() {
            CollectorConfig::default()
        } else {
            serde_yaml::from_str(&txt).unwrap_or_else(|e| {
                warn!("invalid config {path}: {e}, using defaults");
                CollectorConfig::default()
            })
        }
    } else {
        warn!("no {path}, using defaults and environment");
        CollectorConfig::default()
    };
    apply_env_overrides(&mut config);
    config
}

/// Legacy environment variables keep working for Docker deployments.
fn apply_env_overrides(config: &mut CollectorConfig) {
    if let Ok(v) = std::env::var("RELAYWATCH_DEVICE_TYPE") {
        match v.trim().to_ascii_lowercase().as_str() {
            "rutm50" => config.device_type = DeviceType::Rutm50,
            "fx3110" => config.device_type = DeviceType::Fx3110,
            other => warn!("unknown RELAYWATCH_DEVICE_TYPE '{other}', keeping configured value"),
        }
    }
    if let Ok(v) = std::env::var("RELAYWATCH_DEST") {
        config.network.ping_target = v;
    }
    if let Ok(v) = std::env::var("RELAYWATCH_BIND_INTERFACE") {
        config.network.bind_interface = Some(v);
    }
    if let Ok(v) = std::env::var("RELAYWATCH_PUBLIC_IP_REFRESH") {
        if let Ok(secs) = v.parse() {
            config.network.public_ip_refresh_secs = secs;
        }
    }
    if let Ok(v) = std::env::var("RELAYWATCH_INTERVAL") {
        if let Ok(secs) = v.parse() {
            config.monitor.interval_secs = secs;
        }
    }
    if let Ok(v) = std::env::var("RELAYWATCH_LOG_FILE") {
        config.monitor.log_file = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("RELAYWATCH_STATUS_FILE") {
        config.monitor.status_file = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("RELAYWATCH_SSH_HOST") {
        config.devices.rutm50.ssh.host = v;
    }
    if let Ok(v) = std::env::var("RELAYWATCH_SSH_USER") {
        config.devices.rutm50.ssh.user = v;
    }
    if let Ok(v) = std::env::var("RELAYWATCH_SSH_PORT") {
        if let Ok(port) = v.parse() {
            config.devices.rutm50.ssh.port = port;
        }
    }
    if let Ok(v) = std::env::var("RELAYWATCH_SSH_PASSWORD") {
        config.devices.rutm50.ssh.password = Some(v);
    }
    if let Ok(v) = std::env::var("RELAYWATCH_SSH_KEY") {
        config.devices.rutm50.ssh.key = Some(v);
    }
    if let Ok(v) = std::env::var("RELAYWATCH_BASE_URL") {
        config.devices.fx3110.base_url = v;
    }
}

impl CollectorConfig {
    /// Names of the trailing extra columns, in config order.
    pub fn extra_column_names(&self) -> Vec<String> {
        match self.device_type {
            DeviceType::Rutm50 => self
                .devices
                .rutm50
                .extra_commands
                .iter()
                .map(|e| e.name.clone())
                .collect(),
            DeviceType::Fx3110 => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = CollectorConfig::default();
        assert_eq!(config.monitor.interval_secs, 5);
        assert_eq!(config.network.ping_target, "8.8.8.8");
        assert_eq!(config.devices.rutm50.ssh.port, 22);
        assert!(!config.devices.rutm50.collector_script.enabled);
    }

    #[test]
    fn parses_yaml_with_partial_sections() {
        let yaml = r#"
device_type: rutm50
monitor:
  interval_secs: 10
devices:
  rutm50:
    ssh:
      host: 192.168.1.1
      password: secret
    extra_commands:
      - name: uptime
        command: cat /proc/uptime
wan:
  interface_map:
    wan: Ethernet
    mob1s1a1: Cellular
"#;
        let config: CollectorConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.device_type, DeviceType::Rutm50);
        assert_eq!(config.monitor.interval_secs, 10);
        // unspecified fields keep their defaults
        assert_eq!(config.monitor.log_file, PathBuf::from("./logs/relaywatch.tsv"));
        assert_eq!(config.devices.rutm50.ssh.host, "192.168.1.1");
        assert_eq!(config.devices.rutm50.ssh.user, "root");
        assert_eq!(config.extra_column_names(), vec!["uptime".to_string()]);
        assert_eq!(
            config.wan.interface_map.get("wan"),
            Some(&WanSource::Ethernet)
        );
    }
}
