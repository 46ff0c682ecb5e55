//! Request-side VM control.
//!
//! Each operation resolves the node, calls the gateway, and only then
//! touches the registry. A failed gateway call leaves the registry exactly
//! as it was.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use pvekeep_core::{AutoShutdownAction, NodeInfo, NodeSelector, PowerAction, VmId, VmInfo};
use pvekeep_gateway::ActionGateway;

use crate::error::ControlResult;
use crate::node::select_node;
use crate::policy;
use crate::registry::{ShutdownEntry, ShutdownRegistry};

/// A VM as the hypervisor reports it, with its auto-shutdown entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedVm {
    pub vm: VmInfo,
    pub auto_shutdown: Option<ShutdownEntry>,
}

#[derive(Clone)]
pub struct VmController {
    gateway: Arc<dyn ActionGateway>,
    registry: ShutdownRegistry,
    selector: NodeSelector,
}

impl VmController {
    pub fn new(
        gateway: Arc<dyn ActionGateway>,
        registry: ShutdownRegistry,
        selector: NodeSelector,
    ) -> Self {
        Self {
            gateway,
            registry,
            selector,
        }
    }

    pub fn registry(&self) -> &ShutdownRegistry {
        &self.registry
    }

    /// Summary of the selected node.
    pub async fn node(&self) -> ControlResult<NodeInfo> {
        select_node(self.gateway.as_ref(), &self.selector).await
    }

    /// Every VM on the node, sorted by id. The registry is reconciled on
    /// the way through: running VMs with no entry are adopted, and entries
    /// for VMs that are stopped or gone are dropped.
    pub async fn list_vms(&self) -> ControlResult<Vec<TrackedVm>> {
        let node = self.node().await?;
        let listed_at = self.registry.watermark();
        let mut vms = self.gateway.list_vms(&node.node).await?;
        vms.sort_unstable_by_key(|vm| vm.vmid);

        let rec = self.registry.reconcile(&vms, listed_at, Utc::now());
        if !rec.adopted.is_empty() {
            info!(node = %node.node, adopted = ?rec.adopted, "adopted running VMs");
        }
        if !rec.dropped.is_empty() {
            info!(node = %node.node, dropped = ?rec.dropped, "dropped entries for VMs not running");
        }

        Ok(vms
            .into_iter()
            .map(|vm| TrackedVm {
                auto_shutdown: self.registry.get(vm.vmid),
                vm,
            })
            .collect())
    }

    /// Issue a power action. On success a start begins a fresh six-hour
    /// window, a stop or shutdown drops tracking, and a reboot leaves the
    /// entry alone.
    pub async fn power(&self, vmid: VmId, action: PowerAction) -> ControlResult<String> {
        let node = self.node().await?;
        let upid = self.gateway.power(&node.node, vmid, action).await?;

        match action {
            PowerAction::Start => {
                let entry = policy::fresh_entry(Utc::now());
                self.registry.upsert(vmid, entry);
                info!(vmid, node = %node.node, deadline = %entry.deadline, "VM started");
            }
            PowerAction::Stop | PowerAction::Shutdown => {
                self.registry.remove(vmid);
                info!(vmid, node = %node.node, %action, "VM powered off");
            }
            PowerAction::Reboot => {
                info!(vmid, node = %node.node, "VM rebooted");
            }
        }
        Ok(upid)
    }

    /// Delay pushes the deadline back six hours (starting a window if the
    /// VM was untracked). Reset re-derives the deadline from the VM's
    /// current uptime.
    pub async fn adjust_auto_shutdown(
        &self,
        vmid: VmId,
        action: AutoShutdownAction,
    ) -> ControlResult<ShutdownEntry> {
        let entry = match action {
            AutoShutdownAction::Delay => self
                .registry
                .update(vmid, |current| policy::apply_delay(current, Utc::now())),
            AutoShutdownAction::Reset => {
                let node = self.node().await?;
                let status = self.gateway.vm_status(&node.node, vmid).await?;
                let entry = policy::anchored_entry(status.uptime, Utc::now());
                self.registry.upsert(vmid, entry);
                entry
            }
        };

        info!(
            vmid,
            %action,
            deadline = %entry.deadline,
            total_delay_hours = entry.total_delay_hours,
            "auto-shutdown adjusted"
        );
        Ok(entry)
    }

    pub fn auto_shutdown(&self, vmid: VmId) -> Option<ShutdownEntry> {
        self.registry.get(vmid)
    }
}
