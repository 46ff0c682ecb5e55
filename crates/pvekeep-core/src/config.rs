//! pvekeep.toml configuration parser.
//!
//! Every section is optional. Values from the file are overridden by the
//! `PVE_*` environment variables, which the daemon in turn lets CLI flags
//! override.

use std::path::Path;
use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::types::NodeSelector;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeeperConfig {
    pub proxmox: ProxmoxConfig,
    pub scheduler: SchedulerConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxmoxConfig {
    /// Hostname, `host:port`, or a full `http(s)://` base URL.
    pub host: String,
    pub user: String,
    pub token_name: String,
    pub token_value: String,
    pub verify_ssl: bool,
    pub request_timeout: String,
}

impl Default for ProxmoxConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            user: "apiuser@pam".to_string(),
            token_name: "apitoken".to_string(),
            token_value: String::new(),
            verify_ssl: false,
            request_timeout: "10s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub sweep_interval: String,
    /// Node to manage; the first listed node when absent.
    pub node: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: "60s".to_string(),
            node: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub listen: String,
    /// Offset used when rendering deadlines for humans, e.g. "+08:00".
    pub display_utc_offset: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8920".to_string(),
            display_utc_offset: "+08:00".to_string(),
        }
    }
}

impl KeeperConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: KeeperConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PVE_HOST") {
            self.proxmox.host = v;
        }
        if let Some(v) = lookup("PVE_USER") {
            self.proxmox.user = v;
        }
        if let Some(v) = lookup("PVE_TOKEN_NAME") {
            self.proxmox.token_name = v;
        }
        if let Some(v) = lookup("PVE_TOKEN_VALUE") {
            self.proxmox.token_value = v;
        }
        if let Some(v) = lookup("PVE_VERIFY_SSL") {
            self.proxmox.verify_ssl = parse_flag(&v);
        }
        if let Some(v) = lookup("PVEKEEP_NODE") {
            self.scheduler.node = Some(v);
        }
    }

    /// Check that the config is complete enough to start the daemon.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.proxmox.host.trim().is_empty() {
            anyhow::bail!("proxmox.host is not set (config file or PVE_HOST)");
        }
        if self.proxmox.token_value.trim().is_empty() {
            anyhow::bail!("proxmox.token_value is not set (config file or PVE_TOKEN_VALUE)");
        }
        match parse_duration(&self.scheduler.sweep_interval) {
            Some(d) if !d.is_zero() => {}
            _ => anyhow::bail!(
                "invalid scheduler.sweep_interval: {:?}",
                self.scheduler.sweep_interval
            ),
        }
        if parse_duration(&self.proxmox.request_timeout).is_none() {
            anyhow::bail!(
                "invalid proxmox.request_timeout: {:?}",
                self.proxmox.request_timeout
            );
        }
        self.display_offset()?;
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        parse_duration(&self.scheduler.sweep_interval).unwrap_or(Duration::from_secs(60))
    }

    pub fn request_timeout(&self) -> Duration {
        parse_duration(&self.proxmox.request_timeout).unwrap_or(Duration::from_secs(10))
    }

    pub fn node_selector(&self) -> NodeSelector {
        NodeSelector::from_option(self.scheduler.node.as_deref())
    }

    pub fn display_offset(&self) -> anyhow::Result<FixedOffset> {
        parse_utc_offset(&self.api.display_utc_offset).ok_or_else(|| {
            anyhow::anyhow!(
                "invalid api.display_utc_offset: {:?}",
                self.api.display_utc_offset
            )
        })
    }
}

fn parse_flag(s: &str) -> bool {
    matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "t")
}

/// Parse a duration string like "5s", "500ms", "2m", or a bare number of
/// seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Parse a UTC offset: "Z", "UTC", "+08:00", "-05:30", "+0800" or "+8".
pub fn parse_utc_offset(s: &str) -> Option<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };

    let (hours, minutes) = if let Some((h, m)) = rest.split_once(':') {
        (h, m)
    } else if rest.len() == 4 {
        rest.split_at(2)
    } else {
        (rest, "0")
    };

    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if !(0..=23).contains(&hours) || !(0..=59).contains(&minutes) {
        return None;
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
