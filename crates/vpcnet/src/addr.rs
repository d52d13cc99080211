//! IPv4 address planning: block validation, containment, overlap, and the
//! gateway/host allocation convention.
//!
//! The gateway of a block is its first usable host address and the assigned
//! host address is the second; the VPC bridge carries the VPC block's
//! gateway.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

const MIN_PREFIX: u8 = 8;
const MAX_PREFIX: u8 = 28;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddrError {
    #[error("invalid cidr: {0}")]
    Invalid(String),

    #[error("cidr prefix out of range /8../28: {0}")]
    OutOfRange(Ipv4Net),

    #[error("cidr {0} overlaps {1}")]
    Overlap(Ipv4Net, Ipv4Net),

    #[error("cidr {0} is not strictly contained in {1}")]
    NotContained(Ipv4Net, Ipv4Net),
}

/// Parse and validate an address block.
///
/// Rejects prefixes outside /8../28 and non-canonical forms whose address
/// part is not the network address (e.g. `10.20.1.5/16`).
pub fn validate_block(s: &str) -> Result<Ipv4Net, AddrError> {
    let net: Ipv4Net = s.trim().parse().map_err(|_| AddrError::Invalid(s.to_string()))?;
    if net.addr() != net.network() {
        return Err(AddrError::Invalid(s.to_string()));
    }
    if !(MIN_PREFIX..=MAX_PREFIX).contains(&net.prefix_len()) {
        return Err(AddrError::OutOfRange(net));
    }
    Ok(net)
}

/// Strict containment: `inner` lies inside `outer` and is smaller.
pub fn contains(outer: Ipv4Net, inner: Ipv4Net) -> bool {
    outer.contains(&inner) && inner.prefix_len() > outer.prefix_len()
}

pub fn overlaps(a: Ipv4Net, b: Ipv4Net) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

/// First usable host address of a block.
pub fn gateway(block: Ipv4Net) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(block.network()) + 1)
}

/// Second usable host address of a block.
pub fn host_ip(block: Ipv4Net) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(block.network()) + 2)
}

/// Validate a new VPC block against every existing VPC block.
pub fn plan_vpc(cidr: Ipv4Net, existing: &[Ipv4Net]) -> Result<(), AddrError> {
    for other in existing {
        if overlaps(cidr, *other) {
            return Err(AddrError::Overlap(cidr, *other));
        }
    }
    Ok(())
}

/// Validate a new subnet block against its VPC block and sibling subnets.
pub fn plan_subnet(vpc: Ipv4Net, subnet: Ipv4Net, siblings: &[Ipv4Net]) -> Result<(), AddrError> {
    if !contains(vpc, subnet) {
        return Err(AddrError::NotContained(subnet, vpc));
    }
    for sibling in siblings {
        if overlaps(subnet, *sibling) {
            return Err(AddrError::Overlap(subnet, *sibling));
        }
    }
    Ok(())
}
