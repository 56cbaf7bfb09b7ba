//! Hetzner Cloud API wire format
//!
//! Only the fields the controller reads are modelled; unknown fields are
//! ignored by serde.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Response of `GET /servers`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerListResponse {
    /// Servers on this page
    pub servers: Vec<Server>,
    /// Pagination metadata
    #[serde(default)]
    pub meta: Option<Meta>,
}

/// Response of `GET /floating_ips`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FloatingIpListResponse {
    /// Floating IPs on this page
    pub floating_ips: Vec<FloatingIp>,
    /// Pagination metadata
    #[serde(default)]
    pub meta: Option<Meta>,
}

/// List response metadata
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Meta {
    /// Pagination state
    pub pagination: Option<Pagination>,
}

/// Pagination state of a list response
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Pagination {
    /// Current page (1-based)
    pub page: u32,
    /// Next page, absent on the last page
    #[serde(default)]
    pub next_page: Option<u32>,
}

/// A server
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Server {
    /// Server ID
    pub id: i64,
    /// Server name
    pub name: String,
    /// Public network configuration
    pub public_net: ServerPublicNet,
    /// Attached private networks
    #[serde(default)]
    pub private_net: Vec<ServerPrivateNet>,
}

/// Public network configuration of a server
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerPublicNet {
    /// Primary IPv4 address, absent when the server has none
    #[serde(default)]
    pub ipv4: Option<ServerPublicNetIpv4>,
    /// Primary IPv6 network, absent when the server has none
    #[serde(default)]
    pub ipv6: Option<ServerPublicNetIpv6>,
    /// IDs of floating IPs assigned to this server
    #[serde(default)]
    pub floating_ips: Vec<i64>,
}

/// Primary public IPv4 of a server
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerPublicNetIpv4 {
    /// The address, e.g. `1.2.3.4`
    pub ip: String,
}

/// Primary public IPv6 network of a server
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerPublicNetIpv6 {
    /// The network, e.g. `2001:db8::/64`
    pub ip: String,
}

/// A private network attachment of a server
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerPrivateNet {
    /// Network ID
    pub network: i64,
    /// Address of the server in that network
    pub ip: String,
}

/// A floating IP
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FloatingIp {
    /// Floating IP ID
    pub id: i64,
    /// Floating IP name
    #[serde(default)]
    pub name: String,
    /// Address (`ipv4`) or network (`ipv6`)
    pub ip: String,
    /// `ipv4` or `ipv6`
    #[serde(rename = "type")]
    pub type_: String,
    /// ID of the server the IP is assigned to
    #[serde(default)]
    pub server: Option<i64>,
    /// User labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Body of `POST /floating_ips/{id}/actions/assign`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssignRequest {
    /// ID of the server to assign to
    pub server: i64,
}

/// Error envelope returned with non-success statuses
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorBody,
}

/// Error details
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorBody {
    /// Machine readable code, e.g. `unauthorized`
    pub code: String,
    /// Human readable message
    pub message: String,
}
