//! REST API handlers.
//!
//! Each handler calls into `VmController` and wraps the result in the
//! `{"success", "data", "error"}` envelope.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::warn;

use pvekeep_core::{AutoShutdownAction, PowerAction, VmId};
use pvekeep_gateway::GatewayError;
use pvekeep_scheduler::ControlError;

use crate::ApiState;
use crate::views::{AutoShutdownView, NodeView, PowerView, VmView};

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn status_for(err: &ControlError) -> StatusCode {
    match err {
        ControlError::InvalidAction(_) => StatusCode::BAD_REQUEST,
        ControlError::NoNodes | ControlError::NodeNotFound(_) => StatusCode::NOT_FOUND,
        ControlError::Gateway(GatewayError::VmNotFound { .. }) => StatusCode::NOT_FOUND,
        ControlError::Gateway(_) => StatusCode::BAD_GATEWAY,
    }
}

fn control_error(err: ControlError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        warn!(error = %err, "hypervisor request failed");
    }
    error_response(&err.to_string(), status)
}

// ── Node ───────────────────────────────────────────────────────

/// GET /api/v1/node
pub async fn get_node(State(state): State<ApiState>) -> impl IntoResponse {
    match state.controller.node().await {
        Ok(node) => ApiResponse::ok(NodeView::from_node(node)).into_response(),
        Err(e) => control_error(e),
    }
}

// ── VMs ────────────────────────────────────────────────────────

/// GET /api/v1/vms
pub async fn list_vms(State(state): State<ApiState>) -> impl IntoResponse {
    match state.controller.list_vms().await {
        Ok(vms) => {
            let views: Vec<VmView> = vms
                .into_iter()
                .map(|vm| VmView::from_tracked(vm, &state.display))
                .collect();
            ApiResponse::ok(views).into_response()
        }
        Err(e) => control_error(e),
    }
}

/// POST /api/v1/vms/:vmid/:action
pub async fn vm_power(
    State(state): State<ApiState>,
    Path((vmid, action)): Path<(VmId, String)>,
) -> impl IntoResponse {
    let action = match action.parse::<PowerAction>() {
        Ok(action) => action,
        Err(e) => return control_error(e.into()),
    };

    match state.controller.power(vmid, action).await {
        Ok(upid) => ApiResponse::ok(PowerView {
            vmid,
            action: action.to_string(),
            upid,
        })
        .into_response(),
        Err(e) => control_error(e),
    }
}

/// Auto-shutdown request body.
#[derive(Deserialize)]
pub struct AutoShutdownRequest {
    pub action: String,
}

/// POST /api/v1/vms/:vmid/autoshutdown
pub async fn vm_auto_shutdown(
    State(state): State<ApiState>,
    Path(vmid): Path<VmId>,
    Json(req): Json<AutoShutdownRequest>,
) -> impl IntoResponse {
    let action = match req.action.parse::<AutoShutdownAction>() {
        Ok(action) => action,
        Err(e) => return control_error(e.into()),
    };

    match state.controller.adjust_auto_shutdown(vmid, action).await {
        Ok(entry) => ApiResponse::ok(AutoShutdownView::new(
            vmid,
            action.as_str(),
            entry,
            &state.display,
        ))
        .into_response(),
        Err(e) => control_error(e),
    }
}

// ── Health ─────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(serde_json::json!({
        "status": "ok",
        "tracked": state.controller.registry().len(),
    }))
}
