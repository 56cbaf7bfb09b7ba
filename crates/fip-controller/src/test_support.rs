//! Shared fixtures for unit tests

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use mockall::mock;

use fip_common::retry::Backoff;
use fip_common::Result;
use fip_hcloud::{AddressFamily, AssignResponse, CloudApi, FloatingIp, Instance, PrivateAddress};

use crate::config::{AddressType, FloatingIpSource};
use crate::context::{ControllerContext, ReconcileSettings};
use crate::topology::{ClusterApi, MockClusterApi};

// The mockall-generated mock for CloudApi is only available inside fip-hcloud's tests
mock! {
    pub CloudApi {}

    #[async_trait::async_trait]
    impl CloudApi for CloudApi {
        async fn list_instances(&self) -> Result<Vec<Instance>>;
        async fn list_floating_ips(
            &self,
            label_selector: Option<String>,
        ) -> Result<Vec<FloatingIp>>;
        async fn assign_floating_ip(
            &self,
            floating_ip_id: i64,
            instance_id: i64,
        ) -> Result<AssignResponse>;
    }
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
            steps: 3,
            max_delay: Duration::from_millis(10),
        },
        interval: Duration::from_secs(30),
    }
}

pub fn context(cluster: MockClusterApi, cloud: MockCloudApi) -> ControllerContext {
    context_with(cluster, cloud, settings())
}

pub fn context_with(
    cluster: MockClusterApi,
    cloud: MockCloudApi,
    settings: ReconcileSettings,
) -> ControllerContext {
    let cluster: Arc<dyn ClusterApi> = Arc::new(cluster);
    let cloud: Arc<dyn CloudApi> = Arc::new(cloud);
    ControllerContext::new(cluster, cloud, settings)
}

pub fn instance(id: i64, ipv4: &str, load: usize) -> Instance {
    Instance {
        id,
        name: format!("node-{id}"),
        public_ipv4: Some(ipv4.parse().unwrap()),
        public_ipv6: None,
        private_addresses: vec![],
        floating_ip_count: load,
    }
}

pub fn instance_with_private(id: i64, ipv4: &str, private: &str) -> Instance {
    let mut i = instance(id, ipv4, 0);
    i.private_addresses.push(PrivateAddress {
        network: 1,
        ip: private.parse().unwrap(),
    });
    i
}

pub fn floating_ip(id: i64, ip: &str, owner: Option<i64>) -> FloatingIp {
    FloatingIp {
        id,
        name: format!("fip-{id}"),
        family: AddressFamily::V4,
        ip: ip.parse().unwrap(),
        network: None,
        labels: BTreeMap::new(),
        owner,
    }
}
