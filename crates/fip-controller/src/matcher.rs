//! Address matcher
//!
//! Maps target addresses to cloud instances.

use std::net::IpAddr;

use tracing::debug;

use fip_common::{Error, Result};
use fip_hcloud::Instance;

use crate::topology::TopologyTarget;

/// Find the instance that owns `address`
///
/// Instances are checked in inventory order; for each one the public IPv4,
/// the public IPv6 and then every private network address are compared.
/// The first instance with an equal address wins.
pub fn match_instance(address: IpAddr, instances: &[Instance]) -> Result<&Instance> {
    instances
        .iter()
        .find(|i| carries_address(i, address))
        .ok_or(Error::NoMatchingInstance { address })
}

fn carries_address(instance: &Instance, address: IpAddr) -> bool {
    instance.public_ipv4 == Some(address)
        || instance.public_ipv6 == Some(address)
        || instance.private_addresses.iter().any(|p| p.ip == address)
}

/// Instances reachable from the healthy targets, deduplicated by id
///
/// A single unmatched target fails the whole set.
pub fn eligible_instances(
    targets: &[TopologyTarget],
    instances: &[Instance],
) -> Result<Vec<Instance>> {
    let mut eligible: Vec<Instance> = Vec::with_capacity(targets.len());
    for target in targets {
        let instance = match_instance(target.address, instances)?;
        debug!(
            target = %target.name,
            address = %target.address,
            instance = %instance,
            "Matched target to instance"
        );
        if !eligible.iter().any(|e| e.id == instance.id) {
            eligible.push(instance.clone());
        }
    }
    Ok(eligible)
}
