//! In-memory cluster, cloud and lease fakes shared by the integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use fip_common::leader_election::LeaseLock;
use fip_common::retry::Backoff;
use fip_common::{Error, Result};
use fip_controller::topology::{ClusterApi, Machine, MachineAddress, WorkloadReplica};
use fip_controller::{AddressType, ControllerContext, FloatingIpSource, ReconcileSettings};
use fip_hcloud::{AddressFamily, AssignResponse, CloudApi, FloatingIp, Instance};

// =============================================================================
// Cluster
// =============================================================================

/// Cluster whose pods and nodes tests can change between cycles
#[derive(Default)]
pub struct FakeCluster {
    pub replicas: Mutex<Vec<WorkloadReplica>>,
    pub machines: Mutex<Vec<Machine>>,
}

impl FakeCluster {
    pub fn with_replicas_on(host_ips: &[&str]) -> Self {
        let cluster = Self::default();
        cluster.set_replicas_on(host_ips);
        cluster
    }

    pub fn set_replicas_on(&self, host_ips: &[&str]) {
        *self.replicas.lock().unwrap() = host_ips
            .iter()
            .enumerate()
            .map(|(n, ip)| WorkloadReplica {
                name: format!("fip-controller-{n}"),
                host_ip: Some(ip.to_string()),
                phase: Some("Running".to_string()),
                terminating: false,
            })
            .collect();
    }

    pub fn add_machine(&self, name: &str, external_ip: &str, ready: bool) {
        self.machines.lock().unwrap().push(Machine {
            name: name.to_string(),
            ready,
            addresses: vec![MachineAddress {
                type_: "ExternalIP".to_string(),
                address: external_ip.to_string(),
            }],
        });
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn list_workload_replicas(
        &self,
        _label_selector: Option<String>,
    ) -> Result<Vec<WorkloadReplica>> {
        Ok(self.replicas.lock().unwrap().clone())
    }

    async fn list_machines(&self, _label_selector: Option<String>) -> Result<Vec<Machine>> {
        Ok(self.machines.lock().unwrap().clone())
    }

    async fn get_self_replica_labels(&self, _name: &str) -> Result<BTreeMap<String, String>> {
        Ok(BTreeMap::from([("app".to_string(), "fip-controller".to_string())]))
    }
}

// =============================================================================
// Cloud
// =============================================================================

/// Cloud that applies accepted assignments to its own inventory
#[derive(Default)]
pub struct FakeCloud {
    pub instances: Mutex<Vec<Instance>>,
    pub floating_ips: Mutex<Vec<FloatingIp>>,
    pub assign_calls: Mutex<Vec<(i64, i64)>>,
    /// Statuses returned by upcoming assign calls, 201 once exhausted
    pub assign_statuses: Mutex<VecDeque<u16>>,
}

impl FakeCloud {
    pub fn add_instance(&self, id: i64, ipv4: &str) {
        self.instances.lock().unwrap().push(Instance {
            id,
            name: format!("node-{id}"),
            public_ipv4: Some(ip(ipv4)),
            public_ipv6: None,
            private_addresses: Vec::new(),
            floating_ip_count: 0,
        });
    }

    pub fn add_floating_ip(&self, id: i64, address: &str, owner: Option<i64>) {
        self.floating_ips.lock().unwrap().push(FloatingIp {
            id,
            name: format!("fip-{id}"),
            family: AddressFamily::V4,
            ip: ip(address),
            network: None,
            labels: BTreeMap::from([("role".to_string(), "ingress".to_string())]),
            owner,
        });
        if let Some(owner) = owner {
            self.adjust_load(owner, 1);
        }
    }

    pub fn owner_of(&self, floating_ip_id: i64) -> Option<i64> {
        self.floating_ips
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.id == floating_ip_id)
            .and_then(|f| f.owner)
    }

    pub fn assign_count(&self) -> usize {
        self.assign_calls.lock().unwrap().len()
    }

    fn adjust_load(&self, instance_id: i64, delta: isize) {
        if let Some(instance) = self
            .instances
            .lock()
            .unwrap()
            .iter_mut()
            .find(|i| i.id == instance_id)
        {
            instance.floating_ip_count = instance.floating_ip_count.saturating_add_signed(delta);
        }
    }
}

#[async_trait]
impl CloudApi for FakeCloud {
    async fn list_instances(&self) -> Result<Vec<Instance>> {
        Ok(self.instances.lock().unwrap().clone())
    }

    async fn list_floating_ips(&self, label_selector: Option<String>) -> Result<Vec<FloatingIp>> {
        let fips = self.floating_ips.lock().unwrap().clone();
        let Some(selector) = label_selector else {
            return Ok(fips);
        };
        let (key, value) = selector.split_once('=').unwrap_or((selector.as_str(), ""));
        Ok(fips
            .into_iter()
            .filter(|f| f.labels.get(key).map(String::as_str) == Some(value))
            .collect())
    }

    async fn assign_floating_ip(
        &self,
        floating_ip_id: i64,
        instance_id: i64,
    ) -> Result<AssignResponse> {
        self.assign_calls
            .lock()
            .unwrap()
            .push((floating_ip_id, instance_id));

        let status = self.assign_statuses.lock().unwrap().pop_front().unwrap_or(201);
        if status != 201 {
            return Ok(AssignResponse { status });
        }

        let previous = {
            let mut fips = self.floating_ips.lock().unwrap();
            let fip = fips
                .iter_mut()
                .find(|f| f.id == floating_ip_id)
                .ok_or_else(|| Error::cloud_status("assign_floating_ip", 404, "not found"))?;
            fip.owner.replace(instance_id)
        };
        if let Some(previous) = previous {
            self.adjust_load(previous, -1);
        }
        self.adjust_load(instance_id, 1);
        Ok(AssignResponse { status })
    }
}

// =============================================================================
// Lease
// =============================================================================

/// A lease record shared by every replica's lock
#[derive(Default)]
pub struct SharedLease {
    record: Mutex<Option<(String, Instant)>>,
}

impl SharedLease {
    pub fn holder(&self) -> Option<String> {
        self.record.lock().unwrap().as_ref().map(|(h, _)| h.clone())
    }
}

/// One replica's view of a [`SharedLease`]
pub struct FakeLock {
    identity: String,
    lease: Arc<SharedLease>,
    duration: Duration,
    /// When set, every call fails as if the API server were unreachable
    pub partitioned: Mutex<bool>,
}

impl FakeLock {
    pub fn new(identity: &str, lease: Arc<SharedLease>, duration: Duration) -> Self {
        Self {
            identity: identity.to_string(),
            lease,
            duration,
            partitioned: Mutex::new(false),
        }
    }

    pub fn partition(&self, partitioned: bool) {
        *self.partitioned.lock().unwrap() = partitioned;
    }

    fn check_reachable(&self) -> Result<()> {
        if *self.partitioned.lock().unwrap() {
            return Err(Error::cloud("lease", "connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl LeaseLock for FakeLock {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn try_acquire_or_renew(&self) -> Result<bool> {
        self.check_reachable()?;
        let now = Instant::now();
        let mut record = self.lease.record.lock().unwrap();
        let free = match record.as_ref() {
            None => true,
            Some((holder, _)) if holder == &self.identity => true,
            Some((_, expires)) => *expires <= now,
        };
        if free {
            *record = Some((self.identity.clone(), now + self.duration));
        }
        Ok(free)
    }

    async fn release(&self) -> Result<()> {
        self.check_reachable()?;
        let mut record = self.lease.record.lock().unwrap();
        if matches!(record.as_ref(), Some((holder, _)) if holder == &self.identity) {
            *record = None;
        }
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

pub fn ip(address: &str) -> IpAddr {
    address.parse().unwrap()
}

pub fn settings() -> ReconcileSettings {
    ReconcileSettings {
        address_type: AddressType::External,
        floating_ips: FloatingIpSource::Selector("role=ingress".to_string()),
        pod_label_selector: None,
        node_label_selector: None,
        pod_name: Some("fip-controller-0".to_string()),
        backoff: Backoff {
            initial_delay: Duration::from_millis(10),
            factor: 1.0,
            steps: 2,
            max_delay: Duration::from_millis(10),
        },
        interval: Duration::from_secs(30),
    }
}

pub fn context(cluster: Arc<FakeCluster>, cloud: Arc<FakeCloud>) -> ControllerContext {
    ControllerContext::new(cluster, cloud, settings())
}
