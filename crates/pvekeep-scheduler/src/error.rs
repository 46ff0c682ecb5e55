//! Controller error types.

use thiserror::Error;

use pvekeep_core::InvalidAction;
use pvekeep_gateway::GatewayError;

/// Errors surfaced by request-side operations.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    InvalidAction(#[from] InvalidAction),

    #[error("no hypervisor nodes found")]
    NoNodes,

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

pub type ControlResult<T> = Result<T, ControlError>;
