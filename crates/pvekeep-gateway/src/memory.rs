//! In-memory gateway: a simulated Proxmox cluster.
//!
//! Holds nodes and VMs in process memory and applies power actions to them
//! the way the hypervisor would (start → running with zero uptime, stop or
//! shutdown → stopped). Individual VMs can be made to fail their power
//! actions and the whole gateway can be made unreachable, which is how the
//! scheduler and controller tests exercise partial failure.
//!
//! Cheap to clone; clones share the same cluster.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use pvekeep_core::{NodeInfo, PowerAction, VmId, VmInfo, VmPowerState};

use crate::ActionGateway;
use crate::error::{GatewayError, GatewayResult};

#[derive(Default)]
struct Cluster {
    nodes: Vec<NodeInfo>,
    /// vmid → (node name, vm).
    vms: BTreeMap<VmId, (String, VmInfo)>,
    failing: HashSet<VmId>,
    unreachable: bool,
    actions: Vec<(VmId, PowerAction)>,
    task_seq: u64,
}

#[derive(Clone, Default)]
pub struct InMemoryGateway {
    cluster: Arc<Mutex<Cluster>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an online node.
    pub fn with_node(self, name: &str) -> Self {
        self.add_node(NodeInfo {
            node: name.to_string(),
            status: "online".to_string(),
            maxcpu: 8,
            maxmem: 32 * 1024 * 1024 * 1024,
            maxdisk: 512 * 1024 * 1024 * 1024,
            ..Default::default()
        });
        self
    }

    pub fn add_node(&self, node: NodeInfo) {
        self.lock().nodes.push(node);
    }

    /// Place a VM on a node, replacing any VM with the same id.
    pub fn add_vm(&self, node: &str, vm: VmInfo) {
        self.lock().vms.insert(vm.vmid, (node.to_string(), vm));
    }

    /// Add a running VM with the given uptime in seconds.
    pub fn add_running_vm(&self, node: &str, vmid: VmId, uptime: u64) {
        self.add_vm(
            node,
            VmInfo {
                vmid,
                name: Some(format!("vm-{vmid}")),
                status: VmPowerState::Running,
                cpus: 2,
                maxmem: 4 * 1024 * 1024 * 1024,
                uptime,
                ..Default::default()
            },
        );
    }

    /// Add a stopped VM.
    pub fn add_stopped_vm(&self, node: &str, vmid: VmId) {
        self.add_vm(
            node,
            VmInfo {
                vmid,
                name: Some(format!("vm-{vmid}")),
                status: VmPowerState::Stopped,
                cpus: 2,
                maxmem: 4 * 1024 * 1024 * 1024,
                ..Default::default()
            },
        );
    }

    /// Destroy a VM, as if it were deleted outside pvekeep.
    pub fn remove_vm(&self, vmid: VmId) -> Option<VmInfo> {
        self.lock().vms.remove(&vmid).map(|(_, vm)| vm)
    }

    /// Make every power action on `vmid` fail with an API error.
    pub fn set_failing(&self, vmid: VmId, failing: bool) {
        let mut cluster = self.lock();
        if failing {
            cluster.failing.insert(vmid);
        } else {
            cluster.failing.remove(&vmid);
        }
    }

    /// Make every call fail as if the hypervisor were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Power actions that succeeded, in order.
    pub fn actions(&self) -> Vec<(VmId, PowerAction)> {
        self.lock().actions.clone()
    }

    /// Current state of a VM.
    pub fn vm(&self, vmid: VmId) -> Option<VmInfo> {
        self.lock().vms.get(&vmid).map(|(_, vm)| vm.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Cluster> {
        self.cluster.lock().expect("cluster lock")
    }

    fn check_reachable(cluster: &Cluster) -> GatewayResult<()> {
        if cluster.unreachable {
            return Err(GatewayError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ActionGateway for InMemoryGateway {
    async fn list_nodes(&self) -> GatewayResult<Vec<NodeInfo>> {
        let cluster = self.lock();
        Self::check_reachable(&cluster)?;
        Ok(cluster.nodes.clone())
    }

    async fn list_vms(&self, node: &str) -> GatewayResult<Vec<VmInfo>> {
        let cluster = self.lock();
        Self::check_reachable(&cluster)?;
        Ok(cluster
            .vms
            .values()
            .filter(|(n, _)| n == node)
            .map(|(_, vm)| vm.clone())
            .collect())
    }

    async fn vm_status(&self, node: &str, vmid: VmId) -> GatewayResult<VmInfo> {
        let cluster = self.lock();
        Self::check_reachable(&cluster)?;
        match cluster.vms.get(&vmid) {
            Some((n, vm)) if n == node => Ok(vm.clone()),
            _ => Err(GatewayError::VmNotFound {
                node: node.to_string(),
                vmid,
            }),
        }
    }

    async fn power(&self, node: &str, vmid: VmId, action: PowerAction) -> GatewayResult<String> {
        let mut cluster = self.lock();
        Self::check_reachable(&cluster)?;

        if cluster.failing.contains(&vmid) {
            return Err(GatewayError::Api {
                status: 500,
                message: format!("simulated {action} failure for VM {vmid}"),
            });
        }

        let vm = match cluster.vms.get_mut(&vmid) {
            Some((n, vm)) if n.as_str() == node => vm,
            _ => {
                return Err(GatewayError::VmNotFound {
                    node: node.to_string(),
                    vmid,
                });
            }
        };

        match action {
            PowerAction::Start | PowerAction::Reboot => {
                vm.status = VmPowerState::Running;
                vm.uptime = 0;
            }
            PowerAction::Stop | PowerAction::Shutdown => {
                vm.status = VmPowerState::Stopped;
                vm.uptime = 0;
            }
        }

        cluster.actions.push((vmid, action));
        cluster.task_seq += 1;
        Ok(format!(
            "UPID:{node}:{:08X}:qm{action}:{vmid}:root@pam:",
            cluster.task_seq
        ))
    }
}
