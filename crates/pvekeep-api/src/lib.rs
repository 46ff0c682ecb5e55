//! pvekeep-api — REST API for pvekeep.
//!
//! Provides axum route handlers for VM power control and auto-shutdown
//! adjustment on the selected Proxmox node.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/node` | Selected node summary |
//! | GET | `/api/v1/vms` | VMs with uptime and auto-shutdown state |
//! | POST | `/api/v1/vms/:vmid/:action` | `start`, `stop`, `shutdown`, `reboot` |
//! | POST | `/api/v1/vms/:vmid/autoshutdown` | `{"action": "delay" \| "reset"}` |
//! | GET | `/healthz` | Liveness |

pub mod handlers;
pub mod views;

use axum::Router;
use axum::routing::{get, post};

use pvekeep_scheduler::VmController;

pub use views::DisplayOptions;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub controller: VmController,
    pub display: DisplayOptions,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/node", get(handlers::get_node))
        .route("/vms", get(handlers::list_vms))
        .route("/vms/{vmid}/autoshutdown", post(handlers::vm_auto_shutdown))
        .route("/vms/{vmid}/{action}", post(handlers::vm_power))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz).with_state(state))
}
