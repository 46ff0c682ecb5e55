//! Delay policy: how long a VM may run before it is shut down.
//!
//! ```text
//! h = elapsed runtime in hours
//!
//! h <  6  → 6h
//! h >= 6  → next whole hour after h, plus one hour, plus ten minutes
//!           = floor(h) + 2 + 10/60
//! ```
//!
//! Reset and bootstrap anchor the deadline to when the VM actually started
//! (`now - elapsed + delay`), so a VM that has already been up for seven
//! hours gets a deadline about two hours out, not nine. An explicit delay
//! adds a fixed six hours on top of whatever deadline is current.

use chrono::{DateTime, Duration, Utc};

use crate::registry::ShutdownEntry;

/// Grace period for a freshly started VM, and the floor for short uptimes.
pub const DEFAULT_DELAY_HOURS: f64 = 6.0;

/// Added by each explicit delay action.
pub const DELAY_STEP_HOURS: f64 = 6.0;

/// Uptime (hours) at which the long-running branch kicks in.
pub const LONG_RUNNING_HOURS: f64 = 6.0;

const GRACE_HOURS: f64 = 10.0 / 60.0;

/// Auto-shutdown delay in hours for a VM that has been running for
/// `elapsed_secs` seconds.
pub fn compute_delay(elapsed_secs: u64) -> f64 {
    let h = elapsed_secs as f64 / 3600.0;
    if h < LONG_RUNNING_HOURS {
        DEFAULT_DELAY_HOURS
    } else {
        h.floor() + 1.0 + 1.0 + GRACE_HOURS
    }
}

/// Entry for a VM a user just started.
pub fn fresh_entry(now: DateTime<Utc>) -> ShutdownEntry {
    ShutdownEntry {
        deadline: now + hours(DEFAULT_DELAY_HOURS),
        total_delay_hours: DEFAULT_DELAY_HOURS,
    }
}

/// Entry anchored to the VM's start time. Used by reset and bootstrap.
pub fn anchored_entry(elapsed_secs: u64, now: DateTime<Utc>) -> ShutdownEntry {
    let delay = compute_delay(elapsed_secs);
    ShutdownEntry {
        deadline: now - Duration::seconds(elapsed_secs as i64) + hours(delay),
        total_delay_hours: delay,
    }
}

/// Push `current` back by one delay step; with no entry, start one at
/// `now + 6h`.
pub fn apply_delay(current: Option<&ShutdownEntry>, now: DateTime<Utc>) -> ShutdownEntry {
    match current {
        Some(entry) => ShutdownEntry {
            deadline: entry.deadline + hours(DELAY_STEP_HOURS),
            total_delay_hours: entry.total_delay_hours + DELAY_STEP_HOURS,
        },
        None => ShutdownEntry {
            deadline: now + hours(DELAY_STEP_HOURS),
            total_delay_hours: DELAY_STEP_HOURS,
        },
    }
}

/// Fractional hours as a millisecond-precision duration.
pub fn hours(h: f64) -> Duration {
    Duration::milliseconds((h * 3_600_000.0).round() as i64)
}
