//! Bilateral VPC peering: a veth pair stitched between two bridges with an
//! allowlist of routed CIDRs, recorded symmetrically on both sides.

use ipnet::Ipv4Net;
use tracing::{info, warn};

use crate::command::HostError;
use crate::error::{Result, VpcError};
use crate::store::VpcStore;
use crate::types::{PeeringRecord, VpcRecord};
use crate::{addr, host, name};

/// Establish (or re-drive) a peering between two existing VPCs.
///
/// The steps are idempotent and are not rolled back on failure; re-running
/// the verb converges.
pub async fn establish(
    store: &VpcStore,
    vpc_a: &str,
    vpc_b: &str,
    allowed: &[String],
) -> Result<PeeringRecord> {
    name::validate(vpc_a)?;
    name::validate(vpc_b)?;
    if vpc_a == vpc_b {
        return Err(VpcError::SelfPeering(vpc_a.to_string()));
    }
    let mut record_a = store
        .get(vpc_a)
        .await?
        .ok_or_else(|| VpcError::VpcNotFound(vpc_a.to_string()))?;
    let mut record_b = store
        .get(vpc_b)
        .await?
        .ok_or_else(|| VpcError::VpcNotFound(vpc_b.to_string()))?;

    let allowed_cidrs = allowed
        .iter()
        .map(|s| addr::validate_block(s))
        .collect::<std::result::Result<Vec<Ipv4Net>, _>>()?;

    let (first, second) = name::canonical_pair(vpc_a, vpc_b);
    let link_a = name::peer_link(first, second);
    let link_b = name::peer_link(second, first);

    let peering = PeeringRecord {
        vpc_a: first.to_string(),
        vpc_b: second.to_string(),
        link_a: link_a.clone(),
        link_b: link_b.clone(),
        allowed_cidrs,
    };

    info!(vpc_a = first, vpc_b = second, link_a = %link_a, link_b = %link_b, "peering vpcs");

    let (record_first, record_second) = if record_a.name == first {
        (&record_a, &record_b)
    } else {
        (&record_b, &record_a)
    };
    realize(&peering, record_first, record_second).await?;

    record_a.peerings.insert(vpc_b.to_string(), peering.clone());
    record_b.peerings.insert(vpc_a.to_string(), peering.clone());
    store.put(&record_a).await?;
    store.put(&record_b).await?;

    info!(vpc_a = first, vpc_b = second, "peering established");
    Ok(peering)
}

async fn realize(
    peering: &PeeringRecord,
    record_a: &VpcRecord,
    record_b: &VpcRecord,
) -> std::result::Result<(), HostError> {
    host::ensure_veth_pair(&peering.link_a, &peering.link_b).await?;
    host::link_set_master(&peering.link_a, &record_a.bridge).await?;
    host::link_set_master(&peering.link_b, &record_b.bridge).await?;
    host::link_set_up(&peering.link_a).await?;
    host::link_set_up(&peering.link_b).await?;
    // One route per allowed CIDR; whichever endpoint attaches it first
    // wins and the sibling insert reports exists, which is benign.
    for cidr in &peering.allowed_cidrs {
        let dst = cidr.to_string();
        host::route_add(&dst, &peering.link_a).await?;
        host::route_add(&dst, &peering.link_b).await?;
    }
    Ok(())
}

/// Reverse one peering during VPC deletion: withdraw routes, delete the
/// link pair, and drop the peering from the surviving side's record.
/// Best-effort throughout.
pub(crate) async fn remove(store: &VpcStore, local: &str, peer: &str, peering: &PeeringRecord) {
    info!(vpc = local, peer, "removing peering");
    for cidr in &peering.allowed_cidrs {
        let dst = cidr.to_string();
        for link in [&peering.link_a, &peering.link_b] {
            if let Err(e) = host::route_del(&dst, link).await {
                warn!(vpc = local, peer, error = %e, "route removal failed, continuing");
            }
        }
    }
    // Deleting either end removes the pair; try both so a half-created
    // peering still gets cleaned up.
    for link in [&peering.link_a, &peering.link_b] {
        if let Err(e) = host::link_del(link).await {
            warn!(vpc = local, peer, error = %e, "peer link removal failed, continuing");
        }
    }

    match store.get(peer).await {
        Ok(Some(mut record)) => {
            if record.peerings.remove(local).is_some() {
                if let Err(e) = store.put(&record).await {
                    warn!(vpc = local, peer, error = %e, "failed to update peer record");
                }
            }
        }
        Ok(None) => {}
        Err(e) => warn!(vpc = local, peer, error = %e, "failed to load peer record"),
    }
}
