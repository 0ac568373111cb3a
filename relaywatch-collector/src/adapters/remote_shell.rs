//! Remote-shell adapter for Teltonika RUT-series routers
//!
//! Executes gsmctl / mwan3 / ubus / uci queries over the system `ssh`
//! binary (password auth goes through `sshpass`). Two modes:
//! - per-command: ~12 SSH sessions per cycle, works on a stock router
//! - collector script: one SSH session running a script on the router
//!   that emits a single JSON document with every metric

use super::{FetchError, RawSnapshot};
use crate::config::{ExtraCommand, Rutm50Conf};
use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

pub struct RemoteShellAdapter {
    host: String,
    user: String,
    port: u16,
    password: Option<String>,
    key: Option<String>,
    strict_host_key: String,
    timeout: Duration,
    cell_interface: String,
    script_enabled: bool,
    script_path: String,
    extra_commands: Vec<ExtraCommand>,
    reference_dest: String,
}

impl RemoteShellAdapter {
    pub fn new(conf: &Rutm50Conf, reference_dest: &str) -> Result<Self> {
        if conf.ssh.host.is_empty() {
            bail!("rutm50 device selected but ssh.host is not configured");
        }
        Ok(Self {
            host: conf.ssh.host.clone(),
            user: conf.ssh.user.clone(),
            port: conf.ssh.port,
            password: conf.ssh.password.clone(),
            key: conf.ssh.key.clone(),
            strict_host_key: conf.ssh.strict_host_key.clone(),
            timeout: Duration::from_secs(conf.ssh.timeout_secs),
            cell_interface: conf.cell_interface.clone(),
            script_enabled: conf.collector_script.enabled,
            script_path: conf.collector_script.path.clone(),
            extra_commands: conf.extra_commands.clone(),
            reference_dest: reference_dest.to_string(),
        })
    }

    pub async fn fetch(&self) -> Result<RawSnapshot, FetchError> {
        let mut snapshot = if self.script_enabled {
            self.fetch_via_script().await?
        } else {
            self.fetch_per_command().await?
        };
        for extra in &self.extra_commands {
            if let Some(out) = self.ssh_exec_safe(&extra.command).await {
                snapshot.extras.insert(extra.name.clone(), out);
            }
        }
        Ok(snapshot)
    }

    /// One SSH session; the on-router script emits a JSON document.
    async fn fetch_via_script(&self) -> Result<RawSnapshot, FetchError> {
        let out = self.ssh_exec(&self.script_path).await?;
        let doc: serde_json::Value = serde_json::from_str(&out)
            .map_err(|e| FetchError::Parse(format!("collector script output: {e}")))?;
        let mut snapshot = RawSnapshot {
            doc: Some(doc),
            ..Default::default()
        };
        // the script has no route section; ask the router kernel directly
        if let Some(route) = self
            .ssh_exec_safe(&format!("ip route get {}", self.reference_dest))
            .await
        {
            snapshot.fragments.insert("route".to_string(), route);
        }
        Ok(snapshot)
    }

    /// Legacy mode: one SSH session per query. The first query
    /// propagates hard failures (timeout, auth) so a dead or
    /// misconfigured router fails the cycle with the real reason; the
    /// rest degrade per-field.
    async fn fetch_per_command(&self) -> Result<RawSnapshot, FetchError> {
        let mut fragments = BTreeMap::new();
        fragments.insert("signal_quality".to_string(), self.ssh_exec("gsmctl -q").await?);

        let queries: [(&str, String); 9] = [
            ("operator", "gsmctl -o".into()),
            ("technology", "gsmctl -t".into()),
            ("band", "gsmctl -b".into()),
            ("active_sim", "gsmctl -L".into()),
            ("iccid", "gsmctl -J".into()),
            ("sim_status", "gsmctl -z".into()),
            ("modem_info", "gsmctl -E".into()),
            ("mwan3_status", "mwan3 status".into()),
            ("route", format!("ip route get {}", self.reference_dest)),
        ];
        for (key, command) in queries {
            if let Some(out) = self.ssh_exec_safe(&command).await {
                fragments.insert(key.to_string(), out);
            }
        }

        for (key, iface) in [("wan_status", "wan"), ("cell_status", self.cell_interface.as_str())] {
            let command = format!("ubus call network.interface.{iface} status");
            if let Some(out) = self.ssh_exec_safe(&command).await {
                fragments.insert(key.to_string(), out);
            }
        }

        // APN lives under the interface of the active SIM slot
        let apn_iface = match fragments.get("active_sim").map(String::as_str) {
            Some("1") => "mob1s1a1",
            Some("2") => "mob1s2a1",
            _ => self.cell_interface.as_str(),
        };
        if let Some(out) = self
            .ssh_exec_safe(&format!("uci get network.{apn_iface}.apn"))
            .await
        {
            fragments.insert("apn".to_string(), out);
        }

        Ok(RawSnapshot {
            doc: None,
            fragments,
            extras: BTreeMap::new(),
        })
    }

    /// Builds the ssh argv exactly as an operator would type it:
    /// `[sshpass -p ***] ssh -p PORT -o StrictHostKeyChecking=... -o
    /// ConnectTimeout=... [-i KEY -o BatchMode=yes] user@host COMMAND`
    fn build_command(&self, remote_command: &str) -> (String, Vec<String>) {
        let mut args: Vec<String> = vec![
            "-p".into(),
            self.port.to_string(),
            "-o".into(),
            format!("StrictHostKeyChecking={}", self.strict_host_key),
            "-o".into(),
            format!("ConnectTimeout={}", self.timeout.as_secs()),
        ];
        if let Some(key) = &self.key {
            args.push("-i".into());
            args.push(key.clone());
            args.push("-o".into());
            args.push("BatchMode=yes".into());
        }
        args.push(format!("{}@{}", self.user, self.host));
        args.push(remote_command.to_string());

        match (&self.password, &self.key) {
            (Some(password), None) => {
                let mut full = vec!["-p".to_string(), password.clone(), "ssh".to_string()];
                full.extend(args);
                ("sshpass".to_string(), full)
            }
            _ => ("ssh".to_string(), args),
        }
    }

    async fn ssh_exec(&self, remote_command: &str) -> Result<String, FetchError> {
        let (program, args) = self.build_command(remote_command);
        debug!("ssh {}@{}: {}", self.user, self.host, remote_command);

        let output = tokio::time::timeout(
            self.timeout + Duration::from_secs(2),
            Command::new(&program).args(&args).output(),
        )
        .await
        .map_err(|_| FetchError::Timeout(format!("ssh to {} exceeded deadline", self.host)))?
        .map_err(|e| FetchError::Unreachable(format!("failed to spawn {program}: {e}")))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(classify_ssh_failure(&stderr))
    }

    async fn ssh_exec_safe(&self, remote_command: &str) -> Option<String> {
        match self.ssh_exec(remote_command).await {
            Ok(out) if !out.is_empty() => Some(out),
            Ok(_) => None,
            Err(e) => {
                debug!("ssh query failed ({remote_command}): {e}");
                None
            }
        }
    }
}

fn classify_ssh_failure(stderr: &str) -> FetchError {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("permission denied") || lower.contains("authentication") {
        FetchError::Auth(stderr.to_string())
    } else if lower.contains("timed out") {
        FetchError::Timeout(stderr.to_string())
    } else if stderr.is_empty() {
        FetchError::Unreachable("ssh command failed".to_string())
    } else {
        FetchError::Unreachable(stderr.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SshConf;

    fn adapter(password: Option<&str>, key: Option<&str>) -> RemoteShellAdapter {
        let conf = Rutm50Conf {
            ssh: SshConf {
                host: "192.168.1.1".into(),
                password: password.map(str::to_string),
                key: key.map(str::to_string),
                ..SshConf::default()
            },
            ..Rutm50Conf::default()
        };
        RemoteShellAdapter::new(&conf, "8.8.8.8").unwrap()
    }

    #[test]
    fn key_auth_uses_batch_mode() {
        let (program, args) = adapter(None, Some("/home/pi/.ssh/id_ed25519")).build_command("gsmctl -q");
        assert_eq!(program, "ssh");
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"root@192.168.1.1".to_string()));
        assert_eq!(args.last().unwrap(), "gsmctl -q");
    }

    #[test]
    fn password_auth_goes_through_sshpass() {
        let (program, args) = adapter(Some("hunter2"), None).build_command("mwan3 status");
        assert_eq!(program, "sshpass");
        assert_eq!(&args[..3], &["-p".to_string(), "hunter2".to_string(), "ssh".to_string()]);
        assert!(!args.contains(&"BatchMode=yes".to_string()));
    }

    #[test]
    fn key_wins_over_password() {
        let (program, _) = adapter(Some("hunter2"), Some("/key")).build_command("uptime");
        assert_eq!(program, "ssh");
    }

    #[test]
    fn auth_failures_are_not_transient() {
        let err = classify_ssh_failure("root@192.168.1.1: Permission denied (publickey,password).");
        assert!(matches!(err, FetchError::Auth(_)));
        assert!(!err.is_transient());

        let err = classify_ssh_failure("ssh: connect to host 192.168.1.1 port 22: Connection timed out");
        assert!(matches!(err, FetchError::Timeout(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn missing_host_is_rejected_at_startup() {
        let conf = Rutm50Conf::default();
        assert!(RemoteShellAdapter::new(&conf, "8.8.8.8").is_err());
    }
}
