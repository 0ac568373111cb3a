//! Device adapters - how raw data leaves the router
//!
//! One capability interface, two variants selected once at startup:
//! - `RemoteShellAdapter`: SSH command execution (Teltonika RUT-series)
//! - `HttpScrapeAdapter`: web UI scraping (Inseego FX-series)
//!
//! Adapters return raw, device-native responses; the normalizer turns
//! them into `Sample` fields. Failures carry enough information for the
//! normalizer to pick between cached-value reuse (timeout, unreachable)
//! and loud misconfiguration reporting (auth).

mod http_scrape;
mod remote_shell;

pub use http_scrape::HttpScrapeAdapter;
pub use remote_shell::RemoteShellAdapter;

use crate::config::{CollectorConfig, DeviceType};
use anyhow::Result;
use std::collections::BTreeMap;

/// Why a fetch produced nothing usable.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Device did not answer in time - transient, reuse cached values.
    #[error("fetch timed out: {0}")]
    Timeout(String),
    /// Connection refused / host down - transient, reuse cached values.
    #[error("device unreachable: {0}")]
    Unreachable(String),
    /// Credentials rejected - permanent misconfiguration, surface
    /// loudly instead of silently degrading forever.
    #[error("device rejected authentication: {0}")]
    Auth(String),
    /// The device answered garbage.
    #[error("unparseable device response: {0}")]
    Parse(String),
}

impl FetchError {
    /// Transient failures degrade to cached values; anything else is a
    /// configuration problem the operator must see.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Timeout(_) | FetchError::Unreachable(_))
    }
}

/// Raw, device-native output of one collection cycle.
///
/// `doc` holds a structured JSON document when the device produced one
/// (collector-script mode); `fragments` holds named free-text pieces
/// (command outputs, scraped page elements). `extras` are operator
/// command outputs, verbatim.
#[derive(Debug, Clone, Default)]
pub struct RawSnapshot {
    pub doc: Option<serde_json::Value>,
    pub fragments: BTreeMap<String, String>,
    pub extras: BTreeMap<String, String>,
}

impl RawSnapshot {
    /// Named raw text: the JSON document's string field first, then the
    /// free-text fragments. Empty strings count as absent.
    pub fn raw(&self, key: &str) -> Option<String> {
        if let Some(doc) = &self.doc {
            if let Some(v) = doc.get(key) {
                let s = match v {
                    serde_json::Value::String(s) => s.trim().to_string(),
                    serde_json::Value::Number(n) => n.to_string(),
                    _ => String::new(),
                };
                if !s.is_empty() {
                    return Some(s);
                }
            }
        }
        self.fragments
            .get(key)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Named JSON object: a structured field of the document, or a
    /// fragment that parses as JSON (ubus output in per-command mode).
    pub fn object(&self, key: &str) -> Option<serde_json::Value> {
        if let Some(doc) = &self.doc {
            if let Some(v) = doc.get(key) {
                if v.is_object() {
                    return Some(v.clone());
                }
            }
        }
        self.fragments
            .get(key)
            .and_then(|s| serde_json::from_str(s).ok())
            .filter(serde_json::Value::is_object)
    }
}

/// The device adapter, picked once from configuration.
pub enum DeviceAdapter {
    RemoteShell(RemoteShellAdapter),
    HttpScrape(HttpScrapeAdapter),
}

impl DeviceAdapter {
    pub fn from_config(config: &CollectorConfig) -> Result<Self> {
        match config.device_type {
            DeviceType::Rutm50 => Ok(DeviceAdapter::RemoteShell(RemoteShellAdapter::new(
                &config.devices.rutm50,
                &config.network.ping_target,
            )?)),
            DeviceType::Fx3110 => Ok(DeviceAdapter::HttpScrape(HttpScrapeAdapter::new(
                &config.devices.fx3110.base_url,
            )?)),
        }
    }

    /// Runs all device-side queries for one cycle.
    pub async fn fetch_raw(&self) -> Result<RawSnapshot, FetchError> {
        match self {
            DeviceAdapter::RemoteShell(adapter) => adapter.fetch().await,
            DeviceAdapter::HttpScrape(adapter) => adapter.fetch().await,
        }
    }
}
