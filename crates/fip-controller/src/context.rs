//! Controller context shared by every reconciliation cycle

use std::sync::Arc;
use std::time::Duration;

use fip_common::retry::Backoff;
use fip_common::Result;
use fip_hcloud::CloudApi;

use crate::config::{AddressType, Config, FloatingIpSource};
use crate::topology::ClusterApi;

/// Reconciliation behaviour derived from configuration
#[derive(Clone, Debug, PartialEq)]
pub struct ReconcileSettings {
    /// Node address type used when falling back to node records
    pub address_type: AddressType,
    /// Which floating IPs are managed
    pub floating_ips: FloatingIpSource,
    /// Explicit selector for the controller's own pods
    pub pod_label_selector: Option<String>,
    /// Selector restricting candidate nodes
    pub node_label_selector: Option<String>,
    /// Name of this controller pod, used to derive a pod selector
    pub pod_name: Option<String>,
    /// Retry policy for every external call
    pub backoff: Backoff,
    /// Time between cycles
    pub interval: Duration,
}

impl ReconcileSettings {
    /// Derive settings from a validated configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            address_type: config.node_address_type,
            floating_ips: config.floating_ip_source()?,
            pod_label_selector: config.pod_label_selector.clone(),
            node_label_selector: config.node_label_selector.clone(),
            pod_name: Some(config.pod_name.clone()).filter(|n| !n.is_empty()),
            backoff: config.backoff(),
            interval: config.reconcile_interval,
        })
    }
}

/// Controller context containing the API clients and settings
///
/// Built once at startup and shared by the reconciliation loop. Clients are
/// trait objects so tests can substitute in-memory implementations.
#[derive(Clone)]
pub struct ControllerContext {
    /// Kubernetes API access
    pub cluster: Arc<dyn ClusterApi>,
    /// Cloud API access
    pub cloud: Arc<dyn CloudApi>,
    /// Reconciliation settings
    pub settings: ReconcileSettings,
}

impl ControllerContext {
    /// Create a context from its parts
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        cloud: Arc<dyn CloudApi>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            cluster,
            cloud,
            settings,
        }
    }
}
