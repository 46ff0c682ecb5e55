//! Presentation views.
//!
//! The controller deals in raw gateway data and absolute UTC deadlines; this
//! module turns them into what the panel shows: percentages, `"Xh Ym"`
//! uptimes, and deadlines in the configured display offset.

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::Serialize;

use pvekeep_core::{NodeInfo, VmId, VmPowerState};
use pvekeep_scheduler::policy::DEFAULT_DELAY_HOURS;
use pvekeep_scheduler::{ShutdownEntry, TrackedVm};

/// Seconds east of UTC for the default display offset (UTC+8).
pub const DEFAULT_DISPLAY_OFFSET_SECS: i32 = 8 * 3600;

/// How timestamps are rendered for humans.
#[derive(Debug, Clone, Copy)]
pub struct DisplayOptions {
    pub offset: FixedOffset,
}

impl DisplayOptions {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            offset: FixedOffset::east_opt(DEFAULT_DISPLAY_OFFSET_SECS).expect("offset in range"),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NodeView {
    pub node: String,
    pub status: String,
    pub cpu_percent: f64,
    pub cpu_cores: u32,
    pub mem_used: u64,
    pub mem_total: u64,
    pub mem_percent: f64,
    pub disk_used: u64,
    pub disk_total: u64,
    pub disk_percent: f64,
    pub uptime: u64,
    pub uptime_formatted: String,
}

impl NodeView {
    pub fn from_node(node: NodeInfo) -> Self {
        Self {
            cpu_percent: round1(node.cpu * 100.0),
            cpu_cores: node.maxcpu,
            mem_used: node.mem,
            mem_total: node.maxmem,
            mem_percent: percent(node.mem, node.maxmem),
            disk_used: node.disk,
            disk_total: node.maxdisk,
            disk_percent: percent(node.disk, node.maxdisk),
            uptime: node.uptime,
            uptime_formatted: format_uptime(node.uptime),
            node: node.node,
            status: node.status,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VmView {
    pub vmid: VmId,
    pub name: String,
    pub status: VmPowerState,
    pub cpus: u32,
    pub cpu_percent: f64,
    pub mem: u64,
    pub maxmem: u64,
    pub mem_percent: f64,
    pub uptime: u64,
    pub uptime_formatted: String,
    /// RFC 3339 UTC deadline, absent when untracked.
    pub auto_shutdown: Option<String>,
    pub auto_shutdown_formatted: Option<String>,
    pub auto_shutdown_delay: f64,
}

impl VmView {
    pub fn from_tracked(tracked: TrackedVm, display: &DisplayOptions) -> Self {
        let TrackedVm { vm, auto_shutdown } = tracked;
        Self {
            vmid: vm.vmid,
            name: vm.display_name(),
            status: vm.status,
            cpus: vm.cpus,
            cpu_percent: round1(vm.cpu * 100.0),
            mem: vm.mem,
            maxmem: vm.maxmem,
            mem_percent: percent(vm.mem, vm.maxmem),
            uptime: vm.uptime,
            uptime_formatted: format_uptime(vm.uptime),
            auto_shutdown: auto_shutdown.map(|e| rfc3339(e.deadline)),
            auto_shutdown_formatted: auto_shutdown.map(|e| format_deadline(e.deadline, display)),
            auto_shutdown_delay: auto_shutdown
                .map(|e| e.total_delay_hours)
                .unwrap_or(DEFAULT_DELAY_HOURS),
        }
    }
}

/// Response body for delay and reset.
#[derive(Debug, Serialize)]
pub struct AutoShutdownView {
    pub vmid: VmId,
    pub action: String,
    pub deadline: String,
    pub deadline_formatted: String,
    pub total_delay_hours: f64,
}

impl AutoShutdownView {
    pub fn new(vmid: VmId, action: &str, entry: ShutdownEntry, display: &DisplayOptions) -> Self {
        Self {
            vmid,
            action: action.to_string(),
            deadline: rfc3339(entry.deadline),
            deadline_formatted: format_deadline(entry.deadline, display),
            total_delay_hours: entry.total_delay_hours,
        }
    }
}

/// Response body for power actions.
#[derive(Debug, Serialize)]
pub struct PowerView {
    pub vmid: VmId,
    pub action: String,
    pub upid: String,
}

/// `"Xh Ym"`, minutes truncated.
pub fn format_uptime(secs: u64) -> String {
    format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
}

/// `YYYY-MM-DD HH:MM` in the display offset.
pub fn format_deadline(deadline: DateTime<Utc>, display: &DisplayOptions) -> String {
    deadline
        .with_timezone(&display.offset)
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round1(used as f64 / total as f64 * 100.0)
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}
