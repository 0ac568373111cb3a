//! Local network probe
//!
//! Connectivity checks that run on the monitoring host itself,
//! independent of the device adapter: ping with latency, the egress
//! interface a route lookup would pick, the local source IP, and the
//! public IP as seen by external services.

use regex::Regex;
use relaywatch_core::resolver::parse_route_device;
use relaywatch_core::sample::PingResult;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const PING_TIMEOUT: Duration = Duration::from_secs(5);
const ROUTE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct NetworkProbe {
    ping_target: String,
    bind_interface: Option<String>,
    public_ip_urls: Vec<String>,
    client: reqwest::Client,
}

impl NetworkProbe {
    pub fn new(
        ping_target: &str,
        bind_interface: Option<String>,
        public_ip_urls: Vec<String>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .user_agent("relaywatch/1.0")
            .build()?;
        Ok(Self {
            ping_target: ping_target.to_string(),
            bind_interface,
            public_ip_urls,
            client,
        })
    }

    /// One ping plus the route/source-IP lookups for the cycle.
    pub async fn run(&self) -> PingResult {
        let (success, latency_ms) = self.ping_once().await;
        PingResult {
            dest: self.ping_target.clone(),
            source_ip: self.source_ip(),
            active_interface: self.active_interface().await,
            success,
            latency_ms,
        }
    }

    async fn ping_once(&self) -> (bool, Option<u32>) {
        let mut cmd = Command::new("ping");
        cmd.arg("-c").arg("1");
        if let Some(iface) = &self.bind_interface {
            cmd.arg("-I").arg(iface);
        }
        cmd.arg(&self.ping_target);

        let output = match tokio::time::timeout(PING_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                debug!("ping spawn failed: {e}");
                return (false, None);
            }
            Err(_) => return (false, None),
        };

        if !output.status.success() {
            return (false, None);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        (true, parse_latency_ms(&stdout))
    }

    /// Which interface the local kernel would use to reach the target.
    async fn active_interface(&self) -> Option<String> {
        let result = tokio::time::timeout(
            ROUTE_TIMEOUT,
            Command::new("ip").args(["route", "get", &self.ping_target]).output(),
        )
        .await
        .ok()?
        .ok()?;
        if !result.status.success() {
            return None;
        }
        parse_route_device(&String::from_utf8_lossy(&result.stdout))
    }

    /// The local address the kernel picks toward the target. A connect
    /// on a UDP socket never sends a packet; it only resolves routing.
    fn source_ip(&self) -> Option<String> {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect(format!("{}:80", self.ping_target)).ok()?;
        Some(socket.local_addr().ok()?.ip().to_string())
    }

    /// Public IP over a fallback URL list; first sane answer wins.
    pub async fn public_ip(&self) -> Option<String> {
        for url in &self.public_ip_urls {
            match self.client.get(url).send().await {
                Ok(response) => {
                    if let Ok(body) = response.text().await {
                        let ip = body.trim().to_string();
                        if looks_like_ip(&ip) {
                            return Some(ip);
                        }
                    }
                }
                Err(e) => debug!("public IP lookup via {url} failed: {e}"),
            }
        }
        None
    }
}

fn parse_latency_ms(ping_output: &str) -> Option<u32> {
    let re = Regex::new(r"time[=<]\s*(\d+(?:\.\d+)?)\s*ms").ok()?;
    let cap = re.captures(ping_output)?;
    cap[1].parse::<f64>().ok().map(|ms| ms as u32)
}

fn looks_like_ip(candidate: &str) -> bool {
    if candidate.is_empty() {
        return false;
    }
    if candidate.contains(':') {
        return true; // IPv6
    }
    Regex::new(r"^\d{1,3}(\.\d{1,3}){3}$")
        .map(|re| re.is_match(candidate))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_latency_from_ping_output() {
        let out = "64 bytes from 8.8.8.8: icmp_seq=1 ttl=116 time=18.3 ms";
        assert_eq!(parse_latency_ms(out), Some(18));
        let out = "64 bytes from 8.8.8.8: icmp_seq=1 ttl=116 time<1 ms";
        assert_eq!(parse_latency_ms(out), Some(1));
        assert_eq!(parse_latency_ms("request timed out"), None);
    }

    #[test]
    fn validates_public_ip_shapes() {
        assert!(looks_like_ip("203.0.113.7"));
        assert!(looks_like_ip("2001:db8::1"));
        assert!(!looks_like_ip(""));
        assert!(!looks_like_ip("<html>error</html>"));
    }
}
