//! Cluster topology reader
//!
//! Finds the addresses floating IPs may be pointed at. The preferred source
//! is the host IP of every running controller replica, since that is exactly
//! where the controller's workload is scheduled. When no replica reports a
//! host IP, every Ready node is a candidate instead, optionally restricted by
//! a node label selector.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, ListParams};
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use fip_common::retry::retry_with_backoff;
use fip_common::selector::LabelSelector;
use fip_common::{Error, Result};

use crate::config::AddressType;
use crate::context::ControllerContext;

/// A controller replica as seen by the topology reader
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkloadReplica {
    /// Pod name
    pub name: String,
    /// IP of the node the pod is scheduled on
    pub host_ip: Option<String>,
    /// Pod phase (`Pending`, `Running`, ...)
    pub phase: Option<String>,
    /// Whether the pod is being deleted
    pub terminating: bool,
}

impl WorkloadReplica {
    /// Replicas that finished or are shutting down no longer pin a node
    fn is_active(&self) -> bool {
        !self.terminating && !matches!(self.phase.as_deref(), Some("Succeeded" | "Failed"))
    }
}

/// An address reported by a node
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MachineAddress {
    /// Address type (`ExternalIP`, `InternalIP`, `Hostname`, ...)
    pub type_: String,
    /// The address
    pub address: String,
}

/// A cluster node as seen by the topology reader
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Machine {
    /// Node name
    pub name: String,
    /// Whether the node reports a `Ready=True` condition
    pub ready: bool,
    /// Addresses reported in the node status
    pub addresses: Vec<MachineAddress>,
}

impl Machine {
    /// First address of the given type that parses as an IP
    fn address_of(&self, address_type: AddressType) -> Option<IpAddr> {
        let wanted = address_type.node_address_type();
        self.addresses
            .iter()
            .filter(|a| a.type_ == wanted)
            .find_map(|a| a.address.parse().ok())
    }
}

/// How a target was discovered
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetSource {
    /// Host of a controller replica
    Replica,
    /// Ready cluster node
    Machine,
}

impl fmt::Display for TargetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replica => f.write_str("replica"),
            Self::Machine => f.write_str("node"),
        }
    }
}

/// A healthy address a floating IP may be assigned to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopologyTarget {
    /// Pod or node name the address was found on
    pub name: String,
    /// The address
    pub address: IpAddr,
    /// Discovery path
    pub source: TargetSource,
}

/// Trait abstracting the Kubernetes reads used by the topology reader
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List controller replicas in the controller namespace
    async fn list_workload_replicas(
        &self,
        label_selector: Option<String>,
    ) -> Result<Vec<WorkloadReplica>>;

    /// List cluster nodes
    async fn list_machines(&self, label_selector: Option<String>) -> Result<Vec<Machine>>;

    /// Labels of the named controller replica
    async fn get_self_replica_labels(&self, name: &str) -> Result<BTreeMap<String, String>>;
}

/// [`ClusterApi`] implementation using the kube client
pub struct KubeClusterApi {
    client: Client,
    namespace: String,
}

impl KubeClusterApi {
    /// Create a cluster API scoped to the controller namespace
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn list_workload_replicas(
        &self,
        label_selector: Option<String>,
    ) -> Result<Vec<WorkloadReplica>> {
        let params = list_params(label_selector);
        let pods = self.pods().list(&params).await?;

        Ok(pods
            .items
            .into_iter()
            .map(|pod| {
                let status = pod.status.unwrap_or_default();
                WorkloadReplica {
                    name: pod.metadata.name.unwrap_or_default(),
                    host_ip: status.host_ip,
                    phase: status.phase,
                    terminating: pod.metadata.deletion_timestamp.is_some(),
                }
            })
            .collect())
    }

    async fn list_machines(&self, label_selector: Option<String>) -> Result<Vec<Machine>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api.list(&list_params(label_selector)).await?;

        Ok(nodes
            .items
            .into_iter()
            .map(|node| {
                let status = node.status.unwrap_or_default();
                let ready = status
                    .conditions
                    .as_ref()
                    .and_then(|conds| conds.iter().find(|c| c.type_ == "Ready"))
                    .map(|c| c.status == "True")
                    .unwrap_or(false);
                let addresses = status
                    .addresses
                    .unwrap_or_default()
                    .into_iter()
                    .map(|a| MachineAddress {
                        type_: a.type_,
                        address: a.address,
                    })
                    .collect();
                Machine {
                    name: node.metadata.name.unwrap_or_default(),
                    ready,
                    addresses,
                }
            })
            .collect())
    }

    async fn get_self_replica_labels(&self, name: &str) -> Result<BTreeMap<String, String>> {
        let pod = self.pods().get(name).await?;
        Ok(pod.metadata.labels.unwrap_or_default())
    }
}

fn list_params(label_selector: Option<String>) -> ListParams {
    match label_selector {
        Some(selector) => ListParams::default().labels(&selector),
        None => ListParams::default(),
    }
}

/// Resolves the healthy target addresses for one cycle
pub struct TopologyReader<'a> {
    ctx: &'a ControllerContext,
    cancel: &'a CancellationToken,
}

impl<'a> TopologyReader<'a> {
    /// Create a reader for one cycle
    pub fn new(ctx: &'a ControllerContext, cancel: &'a CancellationToken) -> Self {
        Self { ctx, cancel }
    }

    /// Resolve the healthy target addresses
    ///
    /// Replica host IPs win when any exist; otherwise every Ready node must
    /// report an address of `address_type`, and one that doesn't fails the
    /// cycle. Addresses are deduplicated, keeping discovery order.
    pub async fn resolve_targets(&self, address_type: AddressType) -> Result<Vec<TopologyTarget>> {
        let replicas = self.replica_targets().await?;
        if !replicas.is_empty() {
            debug!(count = replicas.len(), "Found targets from controller replicas");
            return Ok(replicas);
        }

        let machines = self.machine_targets(address_type).await?;
        if machines.is_empty() {
            return Err(Error::NoEligibleTargets {
                address_type: address_type.to_string(),
            });
        }
        debug!(count = machines.len(), %address_type, "Found targets from ready nodes");
        Ok(machines)
    }

    /// Selector for the controller's own replicas
    ///
    /// An explicit selector wins, then the labels of this replica. Without
    /// either, every pod in the namespace is considered.
    async fn replica_selector(&self) -> Result<Option<String>> {
        let settings = &self.ctx.settings;
        if let Some(ref selector) = settings.pod_label_selector {
            return Ok(Some(selector.clone()));
        }

        let Some(ref pod_name) = settings.pod_name else {
            warn!("No pod name configured, all pods in namespace will be used");
            return Ok(None);
        };

        let cluster = &self.ctx.cluster;
        let labels = retry_with_backoff(&settings.backoff, "get_pod", self.cancel, || {
            cluster.get_self_replica_labels(pod_name)
        })
        .await?;

        let selector = LabelSelector::from_labels(&labels);
        if selector.is_empty() {
            warn!(
                pod = %pod_name,
                "Controller pod has no labels, all pods in namespace will be used"
            );
        }
        Ok(selector.to_query())
    }

    async fn replica_targets(&self) -> Result<Vec<TopologyTarget>> {
        let selector = self.replica_selector().await?;
        let cluster = &self.ctx.cluster;
        let replicas = retry_with_backoff(&self.ctx.settings.backoff, "list_pods", self.cancel, || {
            cluster.list_workload_replicas(selector.clone())
        })
        .await?;
        debug!(count = replicas.len(), selector = selector.as_deref().unwrap_or(""), "Found pods");

        let mut targets: Vec<TopologyTarget> = Vec::new();
        for replica in replicas.into_iter().filter(WorkloadReplica::is_active) {
            let Some(address) = replica.host_ip.as_deref().and_then(|ip| ip.parse().ok()) else {
                debug!(pod = %replica.name, "Pod has no host IP yet, skipping");
                continue;
            };
            if targets.iter().any(|t| t.address == address) {
                continue;
            }
            targets.push(TopologyTarget {
                name: replica.name,
                address,
                source: TargetSource::Replica,
            });
        }
        Ok(targets)
    }

    async fn machine_targets(&self, address_type: AddressType) -> Result<Vec<TopologyTarget>> {
        let selector = self.ctx.settings.node_label_selector.clone();
        let cluster = &self.ctx.cluster;
        let machines = retry_with_backoff(
            &self.ctx.settings.backoff,
            "list_nodes",
            self.cancel,
            || cluster.list_machines(selector.clone()),
        )
        .await?;
        debug!(count = machines.len(), "Found nodes");

        let mut targets: Vec<TopologyTarget> = Vec::new();
        for machine in machines.into_iter().filter(|m| m.ready) {
            let address = machine
                .address_of(address_type)
                .ok_or_else(|| Error::MissingNodeAddress {
                    node: machine.name.clone(),
                    address_type: address_type.to_string(),
                })?;
            if targets.iter().any(|t| t.address == address) {
                continue;
            }
            targets.push(TopologyTarget {
                name: machine.name,
                address,
                source: TargetSource::Machine,
            });
        }
        Ok(targets)
    }
}
