//! Domain types for compute instances and floating IPs
//!
//! Built from the wire schema once per cycle and never cached.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use ipnet::IpNet;

use fip_common::{Error, Result};

use crate::schema;

/// Floating IP address family
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    /// Single IPv4 address, matched exactly
    V4,
    /// IPv6 network, matched by containment
    V6,
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4 => f.write_str("ipv4"),
            Self::V6 => f.write_str("ipv6"),
        }
    }
}

/// Address of an instance inside a private network
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrivateAddress {
    /// Network ID
    pub network: i64,
    /// Address of the instance in that network
    pub ip: IpAddr,
}

/// A compute instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instance {
    /// Instance ID
    pub id: i64,
    /// Instance name
    pub name: String,
    /// Primary public IPv4 address
    pub public_ipv4: Option<IpAddr>,
    /// Primary public IPv6 address (network address of the instance's /64)
    pub public_ipv6: Option<IpAddr>,
    /// Private network addresses
    pub private_addresses: Vec<PrivateAddress>,
    /// Number of floating IPs currently attached
    pub floating_ip_count: usize,
}

impl Instance {
    /// Number of floating IPs attached, used for least-loaded placement
    pub fn load(&self) -> usize {
        self.floating_ip_count
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

impl TryFrom<schema::Server> for Instance {
    type Error = Error;

    fn try_from(server: schema::Server) -> Result<Self> {
        let public_ipv4 = server
            .public_net
            .ipv4
            .as_ref()
            .map(|v4| parse_ip("server", &v4.ip))
            .transpose()?;
        let public_ipv6 = server
            .public_net
            .ipv6
            .as_ref()
            .map(|v6| parse_ip_or_network("server", &v6.ip).map(|(ip, _)| ip))
            .transpose()?;
        let private_addresses = server
            .private_net
            .iter()
            .map(|net| {
                Ok(PrivateAddress {
                    network: net.network,
                    ip: parse_ip("server", &net.ip)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            id: server.id,
            name: server.name,
            public_ipv4,
            public_ipv6,
            private_addresses,
            floating_ip_count: server.public_net.floating_ips.len(),
        })
    }
}

/// A floating IP
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FloatingIp {
    /// Floating IP ID
    pub id: i64,
    /// Floating IP name
    pub name: String,
    /// Address family
    pub family: AddressFamily,
    /// The address (v4) or the network address (v6)
    pub ip: IpAddr,
    /// The routed network, present for IPv6
    pub network: Option<IpNet>,
    /// User labels
    pub labels: BTreeMap<String, String>,
    /// ID of the instance the IP is currently assigned to
    pub owner: Option<i64>,
}

impl FloatingIp {
    /// Check whether a configured address designates this floating IP
    ///
    /// IPv4 floating IPs match exactly; IPv6 floating IPs match any address
    /// inside their network.
    pub fn matches(&self, address: IpAddr) -> bool {
        match (self.family, self.network) {
            (AddressFamily::V6, Some(net)) => net.contains(&address),
            _ => self.ip == address,
        }
    }
}

impl fmt::Display for FloatingIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.network {
            Some(net) if self.family == AddressFamily::V6 => write!(f, "{net}"),
            _ => write!(f, "{}", self.ip),
        }
    }
}

impl TryFrom<schema::FloatingIp> for FloatingIp {
    type Error = Error;

    fn try_from(fip: schema::FloatingIp) -> Result<Self> {
        let family = match fip.type_.as_str() {
            "ipv4" => AddressFamily::V4,
            "ipv6" => AddressFamily::V6,
            other => {
                return Err(Error::cloud(
                    "floating_ip",
                    format!("floating IP {} has unknown type '{}'", fip.id, other),
                ))
            }
        };
        let (ip, network) = parse_ip_or_network("floating_ip", &fip.ip)?;

        Ok(Self {
            id: fip.id,
            name: fip.name,
            family,
            ip,
            network,
            labels: fip.labels,
            owner: fip.server,
        })
    }
}

fn parse_ip(operation: &str, value: &str) -> Result<IpAddr> {
    value
        .parse()
        .map_err(|e| Error::cloud(operation, format!("invalid address '{value}': {e}")))
}

/// Parse either `addr` or `addr/prefix`
fn parse_ip_or_network(operation: &str, value: &str) -> Result<(IpAddr, Option<IpNet>)> {
    if value.contains('/') {
        let net: IpNet = value
            .parse()
            .map_err(|e| Error::cloud(operation, format!("invalid network '{value}': {e}")))?;
        Ok((net.addr(), Some(net)))
    } else {
        Ok((parse_ip(operation, value)?, None))
    }
}
