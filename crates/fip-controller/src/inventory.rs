//! Cloud inventory reader
//!
//! Fetches the instances and the managed floating IPs for one cycle. With a
//! static address list the live inventory is listed unfiltered and each
//! configured address must resolve to exactly one floating IP.

use std::net::IpAddr;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use fip_common::retry::retry_with_backoff;
use fip_common::{Error, Result};
use fip_hcloud::{FloatingIp, Instance};

use crate::config::FloatingIpSource;
use crate::context::ControllerContext;

/// Reads instances and floating IPs from the cloud API
pub struct InventoryReader<'a> {
    ctx: &'a ControllerContext,
    cancel: &'a CancellationToken,
}

impl<'a> InventoryReader<'a> {
    /// Create a reader for one cycle
    pub fn new(ctx: &'a ControllerContext, cancel: &'a CancellationToken) -> Self {
        Self { ctx, cancel }
    }

    /// All instances, in API order
    pub async fn list_instances(&self) -> Result<Vec<Instance>> {
        let cloud = &self.ctx.cloud;
        retry_with_backoff(&self.ctx.settings.backoff, "list_servers", self.cancel, || {
            cloud.list_instances()
        })
        .await
    }

    /// Floating IPs matching a label selector, or all of them
    pub async fn list_floating_ips(&self, label_selector: Option<&str>) -> Result<Vec<FloatingIp>> {
        let cloud = &self.ctx.cloud;
        let selector = label_selector.map(str::to_string);
        retry_with_backoff(
            &self.ctx.settings.backoff,
            "list_floating_ips",
            self.cancel,
            || cloud.list_floating_ips(selector.clone()),
        )
        .await
    }

    /// The floating IPs this controller manages
    pub async fn managed_floating_ips(&self) -> Result<Vec<FloatingIp>> {
        match &self.ctx.settings.floating_ips {
            FloatingIpSource::Selector(selector) => self.list_floating_ips(Some(selector)).await,
            FloatingIpSource::Addresses(addresses) => {
                let inventory = self.list_floating_ips(None).await?;
                resolve_addresses(addresses, &inventory)
            }
        }
    }
}

/// Resolve configured addresses against the floating IP inventory
///
/// Each address selects the first floating IP that matches it. The result is
/// in configuration order with duplicates removed.
pub fn resolve_addresses(
    addresses: &[IpAddr],
    inventory: &[FloatingIp],
) -> Result<Vec<FloatingIp>> {
    let mut resolved: Vec<FloatingIp> = Vec::with_capacity(addresses.len());
    for &address in addresses {
        let fip = inventory
            .iter()
            .find(|f| f.matches(address))
            .ok_or(Error::UnallocatedAddress { address })?;
        if resolved.iter().any(|r| r.id == fip.id) {
            debug!(floating_ip = %address, "Address already resolved, skipping duplicate");
            continue;
        }
        resolved.push(fip.clone());
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{context_with, floating_ip, instance, settings, MockCloudApi};
    use crate::topology::MockClusterApi;
    use fip_hcloud::AddressFamily;
    use mockall::predicate::eq;

    fn v6_floating_ip(id: i64, network: &str) -> FloatingIp {
        let net: ipnet::IpNet = network.parse().unwrap();
        FloatingIp {
            family: AddressFamily::V6,
            ip: net.addr(),
            network: Some(net),
            ..floating_ip(id, "0.0.0.0", None)
        }
    }

    #[test]
    fn static_addresses_resolve_in_configuration_order() {
        let inventory = vec![
            floating_ip(1, "1.1.1.1", None),
            floating_ip(2, "2.2.2.2", Some(7)),
            v6_floating_ip(3, "2001:db8:1::/64"),
        ];
        let addresses: Vec<IpAddr> = vec![
            "2001:db8:1::1".parse().unwrap(),
            "1.1.1.1".parse().unwrap(),
            "2001:db8:1::".parse().unwrap(),
        ];

        let resolved = resolve_addresses(&addresses, &inventory).unwrap();
        let ids: Vec<i64> = resolved.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![3, 1]);
    }

    #[test]
    fn unknown_static_address_is_unallocated() {
        let inventory = vec![floating_ip(1, "1.1.1.1", None)];
        let err = resolve_addresses(&["9.9.9.9".parse().unwrap()], &inventory).unwrap_err();
        assert!(matches!(err, Error::UnallocatedAddress { .. }));
        assert_eq!(err.floating_ip(), Some("9.9.9.9".parse().unwrap()));
    }

    #[tokio::test]
    async fn selector_is_passed_to_the_cloud() {
        let mut cloud = MockCloudApi::new();
        cloud
            .expect_list_floating_ips()
            .with(eq(Some("role=ingress".to_string())))
            .times(1)
            .returning(|_| Ok(vec![floating_ip(1, "1.1.1.1", None)]));

        let ctx = context_with(MockClusterApi::new(), cloud, settings());
        let cancel = CancellationToken::new();
        let fips = InventoryReader::new(&ctx, &cancel)
            .managed_floating_ips()
            .await
            .unwrap();
        assert_eq!(fips.len(), 1);
    }

    #[tokio::test]
    async fn static_list_reads_unfiltered_inventory() {
        let mut cloud = MockCloudApi::new();
        cloud
            .expect_list_floating_ips()
            .with(eq(None))
            .times(1)
            .returning(|_| {
                Ok(vec![
                    floating_ip(1, "1.1.1.1", None),
                    floating_ip(2, "2.2.2.2", None),
                ])
            });

        let mut s = settings();
        s.floating_ips = FloatingIpSource::Addresses(vec!["2.2.2.2".parse().unwrap()]);
        let ctx = context_with(MockClusterApi::new(), cloud, s);
        let cancel = CancellationToken::new();
        let fips = InventoryReader::new(&ctx, &cancel)
            .managed_floating_ips()
            .await
            .unwrap();
        assert_eq!(fips.len(), 1);
        assert_eq!(fips[0].id, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_cloud_failure_exhausts_retries() {
        let mut cloud = MockCloudApi::new();
        cloud
            .expect_list_instances()
            .times(3)
            .returning(|| Err(Error::cloud_status("list_servers", 503, "unavailable")));

        let ctx = context_with(MockClusterApi::new(), cloud, settings());
        let cancel = CancellationToken::new();
        let err = InventoryReader::new(&ctx, &cancel)
            .list_instances()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn instances_are_returned_in_api_order() {
        let mut cloud = MockCloudApi::new();
        cloud
            .expect_list_instances()
            .returning(|| Ok(vec![instance(2, "2.2.2.2", 0), instance(1, "1.1.1.1", 0)]));

        let ctx = context_with(MockClusterApi::new(), cloud, settings());
        let cancel = CancellationToken::new();
        let instances = InventoryReader::new(&ctx, &cancel)
            .list_instances()
            .await
            .unwrap();
        assert_eq!(instances[0].id, 2);
    }
}
