//! Shared types used across pvekeep crates.
//!
//! The node and VM records mirror what the Proxmox VE API reports. Every
//! numeric field defaults to zero so partially populated responses (stopped
//! VMs carry no `uptime`, offline nodes no `cpu`) still decode.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Proxmox VM identifier.
pub type VmId = u32;

// ── Node ──────────────────────────────────────────────────────────

/// Summary of a hypervisor node as returned by `GET /nodes`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeInfo {
    pub node: String,
    /// "online" / "offline" / "unknown".
    pub status: String,
    /// CPU usage as a fraction (0.0–1.0).
    pub cpu: f64,
    pub maxcpu: u32,
    pub mem: u64,
    pub maxmem: u64,
    pub disk: u64,
    pub maxdisk: u64,
    /// Seconds since the node booted.
    pub uptime: u64,
}

// ── VM ────────────────────────────────────────────────────────────

/// Power state of a VM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmPowerState {
    Running,
    Stopped,
    #[default]
    #[serde(other)]
    Unknown,
}

/// A VM as listed by `GET /nodes/{node}/qemu` or reported by
/// `GET /nodes/{node}/qemu/{vmid}/status/current`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmInfo {
    pub vmid: VmId,
    pub name: Option<String>,
    pub status: VmPowerState,
    /// CPU usage as a fraction (0.0–1.0).
    pub cpu: f64,
    pub cpus: u32,
    pub mem: u64,
    pub maxmem: u64,
    pub disk: u64,
    pub maxdisk: u64,
    /// Bytes received since start.
    pub netin: u64,
    /// Bytes sent since start.
    pub netout: u64,
    /// Elapsed runtime in seconds; 0 when stopped.
    pub uptime: u64,
}

impl VmInfo {
    pub fn is_running(&self) -> bool {
        self.status == VmPowerState::Running
    }

    /// Display name, falling back to `VM {vmid}`.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("VM {}", self.vmid))
    }
}

// ── Actions ───────────────────────────────────────────────────────

/// An action string that names no known operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid action: {0}")]
pub struct InvalidAction(pub String);

/// User-issued power operation on a VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    Start,
    Stop,
    Shutdown,
    Reboot,
}

impl PowerAction {
    /// The Proxmox status endpoint segment for this action.
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerAction::Start => "start",
            PowerAction::Stop => "stop",
            PowerAction::Shutdown => "shutdown",
            PowerAction::Reboot => "reboot",
        }
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerAction {
    type Err = InvalidAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(PowerAction::Start),
            "stop" => Ok(PowerAction::Stop),
            "shutdown" => Ok(PowerAction::Shutdown),
            "reboot" => Ok(PowerAction::Reboot),
            other => Err(InvalidAction(other.to_string())),
        }
    }
}

/// Adjustment to a VM's auto-shutdown deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoShutdownAction {
    /// Push the deadline back by a fixed step.
    Delay,
    /// Recompute the deadline from the VM's current uptime.
    Reset,
}

impl AutoShutdownAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoShutdownAction::Delay => "delay",
            AutoShutdownAction::Reset => "reset",
        }
    }
}

impl fmt::Display for AutoShutdownAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AutoShutdownAction {
    type Err = InvalidAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delay" => Ok(AutoShutdownAction::Delay),
            "reset" => Ok(AutoShutdownAction::Reset),
            other => Err(InvalidAction(other.to_string())),
        }
    }
}

// ── Node selection ────────────────────────────────────────────────

/// Which hypervisor node VM operations are issued against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NodeSelector {
    /// The first node in the order `GET /nodes` returns them.
    #[default]
    FirstListed,
    /// A node by name.
    Named(String),
}

impl NodeSelector {
    pub fn from_option(name: Option<&str>) -> Self {
        match name.map(str::trim) {
            Some(n) if !n.is_empty() => NodeSelector::Named(n.to_string()),
            _ => NodeSelector::FirstListed,
        }
    }
}

impl fmt::Display for NodeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeSelector::FirstListed => f.write_str("<first listed>"),
            NodeSelector::Named(n) => f.write_str(n),
        }
    }
}
