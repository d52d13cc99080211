//! VPC lifecycle: create, inspect, list, delete.
//!
//! Creation is convergent: re-running with an identical intent re-drives
//! the ensure steps and succeeds. The record is written only after every
//! kernel step has returned success.

use tracing::{info, warn};

use crate::command::HostError;
use crate::error::{Result, VpcError};
use crate::store::VpcStore;
use crate::types::VpcRecord;
use crate::{addr, app, host, name, peering};

pub async fn create(store: &VpcStore, vpc: &str, cidr: &str, upstream: &str) -> Result<VpcRecord> {
    name::validate(vpc)?;
    let cidr = addr::validate_block(cidr)?;

    let existing = store.list().await?;
    let mut redrive = false;
    let mut others = Vec::new();
    for record in &existing {
        if record.name == vpc {
            if record.cidr == cidr && record.upstream == upstream {
                redrive = true;
            } else {
                return Err(VpcError::VpcMismatch(vpc.to_string()));
            }
        } else {
            others.push(record.cidr);
        }
    }
    addr::plan_vpc(cidr, &others)?;

    let bridge = name::bridge(vpc);
    let gateway = addr::gateway(cidr);
    info!(vpc, cidr = %cidr, bridge = %bridge, upstream, "creating vpc");

    if let Err(e) = realize(&bridge, &format!("{gateway}/{}", cidr.prefix_len())).await {
        warn!(vpc, error = %e, "vpc creation failed");
        if !redrive {
            // Reverse the fresh create; a re-drive keeps existing objects.
            host::link_del(&bridge).await.ok();
        }
        return Err(e.into());
    }

    let record = match existing.into_iter().find(|r| r.name == vpc) {
        Some(record) => record,
        None => VpcRecord {
            name: vpc.to_string(),
            cidr,
            bridge,
            upstream: upstream.to_string(),
            subnets: Default::default(),
            peerings: Default::default(),
        },
    };
    store.put(&record).await?;
    info!(vpc, "vpc created");
    Ok(record)
}

async fn realize(bridge: &str, gateway_addr: &str) -> std::result::Result<(), HostError> {
    host::ensure_bridge(bridge).await?;
    host::addr_add(bridge, gateway_addr).await?;
    host::link_set_up(bridge).await?;
    host::enable_forwarding(bridge).await?;
    host::enable_global_forwarding().await
}

pub async fn inspect(store: &VpcStore, vpc: &str) -> Result<VpcRecord> {
    name::validate(vpc)?;
    store
        .get(vpc)
        .await?
        .ok_or_else(|| VpcError::VpcNotFound(vpc.to_string()))
}

pub async fn list(store: &VpcStore) -> Result<Vec<VpcRecord>> {
    Ok(store.list().await?)
}

/// Delete a VPC: peerings first, then per-subnet resources, then the
/// bridge, then the state file. Removal steps are best-effort; a hard
/// failure is logged and the remaining steps still run, so that on
/// completion no known-owned object remains.
pub async fn delete(store: &VpcStore, vpc: &str) -> Result<()> {
    name::validate(vpc)?;
    let Some(record) = store.get(vpc).await? else {
        // Absent is the goal state; deleting twice converges.
        info!(vpc, "vpc already absent");
        return Ok(());
    };

    info!(vpc, "deleting vpc");

    // Peer links hang off both bridges; reverse them while ours still exists.
    for (peer, record_peering) in &record.peerings {
        peering::remove(store, vpc, peer, record_peering).await;
    }

    for subnet in record.subnets.values() {
        for deployed in &subnet.apps {
            if let Some(pid) = deployed.pid {
                app::kill_process_group(pid);
            }
        }
        // Deleting the namespace takes the inner veth end (and the pair) with it.
        best_effort("delete namespace", host::netns_del(&subnet.netns).await);
        best_effort("delete veth", host::link_del(&subnet.host_veth).await);
        if subnet.kind == crate::types::SubnetKind::Public {
            let tag = host::nat_tag(vpc, &subnet.name);
            best_effort(
                "delete nat rule",
                host::nat_del(&subnet.cidr.to_string(), &record.upstream, &tag).await,
            );
        }
    }

    best_effort("delete bridge", host::link_del(&record.bridge).await);

    store.delete(vpc).await?;
    info!(vpc, "vpc deleted");
    Ok(())
}

fn best_effort(op: &str, result: std::result::Result<(), HostError>) {
    if let Err(e) = result {
        warn!(error = %e, "{op} failed, continuing");
    }
}
