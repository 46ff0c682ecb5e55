//! pvekeep-gateway — the hypervisor control surface.
//!
//! Everything the rest of pvekeep needs from the hypervisor goes through the
//! [`ActionGateway`] trait: listing nodes and VMs, reading a VM's current
//! status, and issuing power actions.
//!
//! # Implementations
//!
//! ```text
//! ActionGateway
//!   ├── ProxmoxClient    → Proxmox VE REST API (/api2/json) over reqwest
//!   └── InMemoryGateway  → simulated cluster with failure injection
//! ```
//!
//! Timeouts are the gateway's responsibility: callers await each operation
//! without wrapping it, so `ProxmoxClient` applies its configured request
//! timeout to every call.

pub mod error;
pub mod memory;
pub mod proxmox;

use async_trait::async_trait;

use pvekeep_core::{NodeInfo, PowerAction, VmId, VmInfo};

pub use error::{GatewayError, GatewayResult};
pub use memory::InMemoryGateway;
pub use proxmox::{ProxmoxClient, ProxmoxSettings};

/// Operations pvekeep issues against the hypervisor.
///
/// Power operations return the hypervisor task identifier (a Proxmox `UPID`).
#[async_trait]
pub trait ActionGateway: Send + Sync {
    async fn list_nodes(&self) -> GatewayResult<Vec<NodeInfo>>;

    async fn list_vms(&self, node: &str) -> GatewayResult<Vec<VmInfo>>;

    async fn vm_status(&self, node: &str, vmid: VmId) -> GatewayResult<VmInfo>;

    async fn power(&self, node: &str, vmid: VmId, action: PowerAction) -> GatewayResult<String>;

    async fn start(&self, node: &str, vmid: VmId) -> GatewayResult<String> {
        self.power(node, vmid, PowerAction::Start).await
    }

    async fn stop(&self, node: &str, vmid: VmId) -> GatewayResult<String> {
        self.power(node, vmid, PowerAction::Stop).await
    }

    async fn shutdown(&self, node: &str, vmid: VmId) -> GatewayResult<String> {
        self.power(node, vmid, PowerAction::Shutdown).await
    }

    async fn reboot(&self, node: &str, vmid: VmId) -> GatewayResult<String> {
        self.power(node, vmid, PowerAction::Reboot).await
    }
}
