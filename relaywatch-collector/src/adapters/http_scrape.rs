//! HTTP-scrape adapter for Inseego FX-series routers
//!
//! The FX web UI has no API worth the name; metrics are scraped from
//! the status page by HTML element id. The connected-devices list comes
//! from a JSON endpoint the dashboard itself polls.

use super::{FetchError, RawSnapshot};
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Status-page element ids and the fragment keys they populate.
const PAGE_FIELDS: [(&str, &str); 14] = [
    ("rsrp", "internetStatusRSRP"),
    ("rsrq", "internetStatusRSRQ"),
    ("snr", "snr"),
    ("carrier", "networkName"),
    ("technology", "technology"),
    ("band", "band"),
    ("bandwidth", "bandwidth"),
    ("wan_status_text", "internetStatus"),
    ("device_ipv4", "internetStatusIPAddress"),
    ("apn", "internetAPN"),
    ("iccid", "internetInfoICCID"),
    ("sim_status", "simStatus"),
    ("ecgi", "internetStatusECGI"),
    ("pci", "pci"),
];

/// Cap on device names carried into the log.
const MAX_DEVICE_NAMES: usize = 5;

pub struct HttpScrapeAdapter {
    status_url: String,
    devices_url: String,
    client: reqwest::Client,
}

impl HttpScrapeAdapter {
    pub fn new(base_url: &str) -> Result<Self> {
        let base = base_url.trim_end_matches('/');
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .user_agent("relaywatch/1.0")
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            status_url: format!("{base}/"),
            devices_url: format!("{base}/apps_home/devicesrefresh/"),
            client,
        })
    }

    pub async fn fetch(&self) -> Result<RawSnapshot, FetchError> {
        let html = self.fetch_text(&self.status_url).await?;
        let mut fragments = BTreeMap::new();
        for (key, element_id) in PAGE_FIELDS {
            if let Some(value) = extract_by_id(&html, element_id) {
                fragments.insert(key.to_string(), value);
            }
        }

        // best effort: the devices endpoint 404s on some firmware
        match self.fetch_text(&self.devices_url).await {
            Ok(body) => {
                if let Some((count, names)) = parse_connected_devices(&body) {
                    fragments.insert("conn_dev_count".to_string(), count);
                    if !names.is_empty() {
                        fragments.insert("conn_dev_names".to_string(), names);
                    }
                }
            }
            Err(e) => debug!("connected devices fetch failed: {e}"),
        }

        Ok(RawSnapshot {
            doc: None,
            fragments,
            extras: BTreeMap::new(),
        })
    }

    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(format!("GET {url}"))
            } else {
                FetchError::Unreachable(format!("GET {url}: {e}"))
            }
        })?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(FetchError::Auth(format!("GET {url} -> {status}")));
        }
        if !status.is_success() {
            return Err(FetchError::Unreachable(format!("GET {url} -> {status}")));
        }
        response
            .text()
            .await
            .map_err(|e| FetchError::Parse(format!("GET {url}: {e}")))
    }
}

/// Inner text of the element carrying the given id. The pages are
/// machine-generated and regular enough that a regex beats a DOM parser.
fn extract_by_id(html: &str, element_id: &str) -> Option<String> {
    let pattern = format!(r#"(?i)id="{}"\s*[^>]*>\s*([^<]*)\s*<"#, regex::escape(element_id));
    let re = Regex::new(&pattern).ok()?;
    let value = re.captures(html)?.get(1)?.as_str().trim().to_string();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Pulls `(count, "name1,name2,...")` out of the devicesrefresh JSON.
fn parse_connected_devices(body: &str) -> Option<(String, String)> {
    let data: serde_json::Value = serde_json::from_str(body).ok()?;
    let count = data.get("wifiDevicesCount")?.to_string();
    let devices = data
        .get("connectedDevicesList")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let mut names: Vec<String> = devices
        .iter()
        .map(|d| {
            let name = d.get("name").and_then(|v| v.as_str()).unwrap_or("").trim();
            let hostname = d.get("hostname").and_then(|v| v.as_str()).unwrap_or("").trim();
            let display = if !name.is_empty() { name } else { hostname };
            if display.is_empty() { "Unknown" } else { display }.to_string()
        })
        .collect();

    if names.len() > MAX_DEVICE_NAMES {
        let more = names.len() - MAX_DEVICE_NAMES;
        names.truncate(MAX_DEVICE_NAMES);
        names.push(format!("+{more} more"));
    }
    Some((count, names.join(",")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS_PAGE: &str = r#"
<div class="row"><span id="networkName" class="value"> T-Mobile </span></div>
<div><span id="internetStatusRSRP">-96</span><span id="internetStatusRSRQ">-11</span></div>
<div><span id="snr">9</span></div>
<div><span id="internetStatus">Connected</span></div>
<div><span id="technology">5G</span><span id="band">n41</span></div>
<div><span id="internetStatusIPAddress">10.22.4.7</span></div>
<div><span id="internetAPN"></span></div>
"#;

    #[test]
    fn extracts_inner_text_by_element_id() {
        assert_eq!(extract_by_id(STATUS_PAGE, "networkName").as_deref(), Some("T-Mobile"));
        assert_eq!(extract_by_id(STATUS_PAGE, "internetStatusRSRP").as_deref(), Some("-96"));
        assert_eq!(extract_by_id(STATUS_PAGE, "internetStatus").as_deref(), Some("Connected"));
        // empty element is absent, not Some("")
        assert_eq!(extract_by_id(STATUS_PAGE, "internetAPN"), None);
        assert_eq!(extract_by_id(STATUS_PAGE, "doesNotExist"), None);
    }

    #[test]
    fn connected_devices_are_capped() {
        let body = r#"{"wifiDevicesCount": 7, "connectedDevicesList": [
            {"name": "phone"}, {"name": "", "hostname": "laptop"}, {"name": "tv"},
            {"name": "tablet"}, {"name": "printer"}, {"name": "cam1"}, {"name": ""}
        ]}"#;
        let (count, names) = parse_connected_devices(body).unwrap();
        assert_eq!(count, "7");
        assert_eq!(names, "phone,laptop,tv,tablet,printer,+2 more");
    }
}
