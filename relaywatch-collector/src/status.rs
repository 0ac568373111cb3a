//! Collector status file
//!
//! A small JSON document rewritten every cycle, read by the API's
//! health endpoint. This is how a permanent misconfiguration (auth
//! rejected) stays visible instead of hiding behind stale-value
//! retention, and how consumers tell "quiet device" from "collector
//! dead".

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorStatus {
    pub updated: String,
    pub running: bool,
    pub cycles: u64,
    pub last_append_ok: bool,
    pub device_auth_failed: bool,
    pub consecutive_stale_cycles: u32,
    pub last_error: Option<String>,
}

impl CollectorStatus {
    pub fn starting() -> Self {
        Self {
            updated: now_rfc3339(),
            running: true,
            cycles: 0,
            last_append_ok: true,
            device_auth_failed: false,
            consecutive_stale_cycles: 0,
            last_error: None,
        }
    }
}

pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Write-then-rename so the API never reads a torn document.
    pub fn write(&self, status: &mut CollectorStatus) -> std::io::Result<()> {
        status.updated = now_rfc3339();
        let body = serde_json::to_vec_pretty(status)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &self.path)
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}
