//! Periodic auto-shutdown sweep.
//!
//! Every tick the scheduler collects the registry entries whose deadline has
//! passed, resolves the target node once, lists its VMs, and issues a
//! graceful shutdown for each expired VM that is still running. Entries for
//! VMs that are gone or already stopped are dropped without a call. A VM's
//! entry is removed only if it was not replaced while the sweep ran;
//! transient failures stay in the registry and are retried on the next tick.
//!
//! ```text
//! tick ──► bootstrap (until it succeeds once)
//!      ──► registry.due(now) ──► empty? ──yes──► done
//!                                   │
//!                                   ▼
//!                    select_node + list_vms ──err──► keep all, log
//!                                   │
//!              not running ──► drop entry
//!                                   │
//!                 JoinSet { gateway.shutdown(node, vmid) } per VM
//!                                   │
//!        ok ──► remove entry   not found ──► drop entry   err ──► keep entry
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use pvekeep_core::{NodeSelector, VmId};
use pvekeep_gateway::{ActionGateway, GatewayError};

use crate::error::ControlResult;
use crate::node::select_node;
use crate::registry::{Reconciliation, ShutdownRegistry};

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// VMs whose shutdown was accepted; their entries are gone.
    pub shut_down: Vec<VmId>,
    /// Expired VMs still tracked, to be retried next tick.
    pub failed: Vec<VmId>,
    /// Expired entries removed because the VM is missing or not running.
    pub dropped: Vec<VmId>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.shut_down.is_empty() && self.failed.is_empty() && self.dropped.is_empty()
    }

    fn all_failed(failed: Vec<VmId>) -> Self {
        Self {
            failed,
            ..Self::default()
        }
    }
}

enum Outcome {
    ShutDown,
    Dropped,
    Failed,
}

pub struct ShutdownScheduler {
    gateway: Arc<dyn ActionGateway>,
    registry: ShutdownRegistry,
    selector: NodeSelector,
    interval: Duration,
}

impl ShutdownScheduler {
    pub fn new(
        gateway: Arc<dyn ActionGateway>,
        registry: ShutdownRegistry,
        selector: NodeSelector,
        interval: Duration,
    ) -> Self {
        Self {
            gateway,
            registry,
            selector,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn registry(&self) -> &ShutdownRegistry {
        &self.registry
    }

    /// Reconcile the registry with the node: adopt every VM already
    /// running, so machines started outside pvekeep (or before a restart)
    /// still get a deadline, and drop entries for VMs that are not.
    pub async fn bootstrap(&self) -> ControlResult<Reconciliation> {
        let node = select_node(self.gateway.as_ref(), &self.selector).await?;
        let listed_at = self.registry.watermark();
        let vms = self.gateway.list_vms(&node.node).await?;
        let rec = self.registry.reconcile(&vms, listed_at, Utc::now());
        info!(
            node = %node.node,
            running = vms.iter().filter(|vm| vm.is_running()).count(),
            adopted = rec.adopted.len(),
            dropped = rec.dropped.len(),
            "bootstrap scan complete"
        );
        Ok(rec)
    }

    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    /// Shut down every VM whose deadline is at or before `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let due = self.registry.due(now);
        if due.is_empty() {
            debug!(tracked = self.registry.len(), "sweep: nothing expired");
            return SweepReport::default();
        }
        let due_ids = || due.iter().map(|(vmid, _)| *vmid).collect::<Vec<_>>();

        let node = match select_node(self.gateway.as_ref(), &self.selector).await {
            Ok(node) => node.node,
            Err(e) => {
                error!(
                    error = %e,
                    expired = due.len(),
                    "sweep: cannot resolve node, entries kept for next tick"
                );
                return SweepReport::all_failed(due_ids());
            }
        };

        let running: HashSet<VmId> = match self.gateway.list_vms(&node).await {
            Ok(vms) => vms
                .iter()
                .filter(|vm| vm.is_running())
                .map(|vm| vm.vmid)
                .collect(),
            Err(e) => {
                error!(
                    %node,
                    error = %e,
                    expired = due.len(),
                    "sweep: cannot list VMs, entries kept for next tick"
                );
                return SweepReport::all_failed(due_ids());
            }
        };

        let mut report = SweepReport::default();
        let mut tasks = JoinSet::new();
        for (vmid, generation) in due {
            if !running.contains(&vmid) {
                if self.registry.remove_if_generation(vmid, generation) {
                    info!(vmid, %node, "VM not running, auto-shutdown entry dropped");
                    report.dropped.push(vmid);
                }
                continue;
            }

            let gateway = Arc::clone(&self.gateway);
            let registry = self.registry.clone();
            let node = node.clone();
            tasks.spawn(async move {
                match gateway.shutdown(&node, vmid).await {
                    Ok(upid) => {
                        registry.remove_if_generation(vmid, generation);
                        info!(vmid, %node, %upid, "auto-shutdown issued");
                        (vmid, Outcome::ShutDown)
                    }
                    Err(GatewayError::VmNotFound { .. }) => {
                        registry.remove_if_generation(vmid, generation);
                        warn!(vmid, %node, "VM vanished before shutdown, entry dropped");
                        (vmid, Outcome::Dropped)
                    }
                    Err(e) => {
                        error!(vmid, %node, error = %e, "auto-shutdown failed, will retry");
                        (vmid, Outcome::Failed)
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((vmid, Outcome::ShutDown)) => report.shut_down.push(vmid),
                Ok((vmid, Outcome::Dropped)) => report.dropped.push(vmid),
                Ok((vmid, Outcome::Failed)) => report.failed.push(vmid),
                Err(e) => error!(error = %e, "auto-shutdown task aborted"),
            }
        }
        report.shut_down.sort_unstable();
        report.failed.sort_unstable();
        report.dropped.sort_unstable();

        info!(
            shut_down = report.shut_down.len(),
            failed = report.failed.len(),
            dropped = report.dropped.len(),
            "sweep complete"
        );
        report
    }

    /// Run the sweep loop until `shutdown` flips.
    ///
    /// The first tick fires immediately. Bootstrap is attempted on every
    /// tick until it succeeds once.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            node = %self.selector,
            "auto-shutdown scheduler started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut bootstrapped = false;

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    if !bootstrapped {
                        match self.bootstrap().await {
                            Ok(_) => bootstrapped = true,
                            Err(e) => warn!(error = %e, "bootstrap scan failed, retrying next tick"),
                        }
                    }
                    self.sweep().await;
                }
                _ = shutdown.changed() => {
                    break;
                }
            }
        }
        info!("auto-shutdown scheduler shutting down");
    }
}
