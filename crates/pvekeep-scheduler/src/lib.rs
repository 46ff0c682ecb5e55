//! pvekeep-scheduler — auto-shutdown policy and control.
//!
//! Every VM started through pvekeep (or found running) gets a deadline,
//! and loses it once the VM is found stopped or gone.
//! Users may push it back or re-derive it from uptime; a background sweep
//! gracefully shuts down whatever is past due.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐        ┌────────────────────┐
//! │   VmController     │        │ ShutdownScheduler  │
//! │ power/delay/reset  │        │  tick → sweep      │
//! └─────────┬──────────┘        └─────────┬──────────┘
//!           │   ShutdownRegistry (shared) │
//!           └──────────────┬──────────────┘
//!                          ▼
//!                   dyn ActionGateway
//! ```

pub mod controller;
pub mod error;
pub mod node;
pub mod policy;
pub mod registry;
pub mod scheduler;

pub use controller::{TrackedVm, VmController};
pub use error::{ControlError, ControlResult};
pub use node::select_node;
pub use registry::{Generation, Reconciliation, ShutdownEntry, ShutdownRegistry};
pub use scheduler::{ShutdownScheduler, SweepReport};
