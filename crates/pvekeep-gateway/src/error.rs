//! Gateway error types.

use thiserror::Error;

use pvekeep_core::VmId;

/// Errors returned by an [`ActionGateway`](crate::ActionGateway).
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The hypervisor API could not be reached (connect failure, timeout).
    #[error("hypervisor unavailable: {0}")]
    Unavailable(String),

    /// The hypervisor answered with a non-success status.
    #[error("hypervisor API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The response body did not have the expected shape.
    #[error("malformed hypervisor response: {0}")]
    Decode(String),

    #[error("VM {vmid} not found on node {node}")]
    VmNotFound { node: String, vmid: VmId },

    #[error("invalid gateway configuration: {0}")]
    Config(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;
