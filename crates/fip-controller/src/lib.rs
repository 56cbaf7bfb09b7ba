//! Floating IP controller
//!
//! Keeps Hetzner Cloud floating IPs pointed at healthy Kubernetes nodes. Each
//! reconciliation cycle:
//!
//! 1. resolves the healthy target addresses ([`topology`])
//! 2. reads instances and floating IPs from the cloud ([`inventory`])
//! 3. maps targets to instances ([`matcher`])
//! 4. plans least-loaded moves for mis-assigned IPs ([`planner`])
//! 5. applies them ([`executor`])
//!
//! [`reconciler`] drives cycles on an interval, and [`gate`] makes sure only
//! the replica holding the lease runs them.

#![deny(missing_docs)]

pub mod config;
pub mod context;
pub mod executor;
pub mod gate;
pub mod inventory;
pub mod matcher;
pub mod planner;
pub mod reconciler;
pub mod topology;

#[cfg(test)]
mod test_support;

pub use config::{AddressType, Cli, Config, FloatingIpSource};
pub use context::{ControllerContext, ReconcileSettings};
pub use gate::{GateConfig, GateState, LeaderGate};
pub use reconciler::{reconcile_once, run, CycleReport};
