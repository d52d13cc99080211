use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

/// Durable record of one realized VPC.
///
/// Serialized verbatim as the content of `<name>.json` in the state
/// directory: subnets keyed by subnet name, peerings keyed by the peer
/// VPC's name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpcRecord {
    pub name: String,
    pub cidr: Ipv4Net,
    pub bridge: String,
    pub upstream: String,
    #[serde(default)]
    pub subnets: BTreeMap<String, SubnetRecord>,
    #[serde(default)]
    pub peerings: BTreeMap<String, PeeringRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubnetKind {
    Public,
    Private,
}

impl fmt::Display for SubnetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubnetKind::Public => f.write_str("public"),
            SubnetKind::Private => f.write_str("private"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetRecord {
    pub name: String,
    pub cidr: Ipv4Net,
    pub kind: SubnetKind,
    pub netns: String,
    pub host_veth: String,
    pub ns_veth: String,
    /// First usable host address of the subnet block.
    pub gateway: Ipv4Addr,
    /// Second usable host address, prefix-annotated (e.g. `10.20.1.2/24`).
    pub host_addr: Ipv4Net,
    #[serde(default)]
    pub apps: Vec<AppRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppRecord {
    pub name: String,
    pub cmd: String,
    /// Best-effort; may be stale once the process exits.
    #[serde(default)]
    pub pid: Option<u32>,
}

/// One side of a bilateral peering. The identical record is stored in both
/// VPCs' state, keyed by the other VPC's name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeeringRecord {
    /// Lexicographically smaller VPC name.
    pub vpc_a: String,
    pub vpc_b: String,
    /// Endpoint attached to `vpc_a`'s bridge.
    pub link_a: String,
    /// Endpoint attached to `vpc_b`'s bridge.
    pub link_b: String,
    pub allowed_cidrs: Vec<Ipv4Net>,
}
