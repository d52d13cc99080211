//! Subnet realization: namespace, veth pair, addressing, default route,
//! and NAT for public subnets.
//!
//! The ordering is strict: the namespace must exist before the veth peer
//! can be born inside it, the host end must join the bridge before it
//! comes up, and addresses precede the default route. Every step is
//! individually idempotent, so a re-run from any prefix converges.

use ipnet::Ipv4Net;
use tracing::{info, warn};

use crate::command::HostError;
use crate::error::{Result, VpcError};
use crate::store::VpcStore;
use crate::types::{SubnetKind, SubnetRecord, VpcRecord};
use crate::{addr, host, name};

pub async fn add(
    store: &VpcStore,
    vpc: &str,
    subnet: &str,
    cidr: &str,
    kind: SubnetKind,
) -> Result<SubnetRecord> {
    name::validate(vpc)?;
    name::validate(subnet)?;
    let mut record = store
        .get(vpc)
        .await?
        .ok_or_else(|| VpcError::VpcNotFound(vpc.to_string()))?;
    let cidr = addr::validate_block(cidr)?;

    let redrive = match record.subnets.get(subnet) {
        Some(existing) if existing.cidr == cidr && existing.kind == kind => true,
        Some(_) => return Err(VpcError::SubnetMismatch(subnet.to_string())),
        None => false,
    };
    let siblings: Vec<Ipv4Net> = record
        .subnets
        .values()
        .filter(|s| s.name != subnet)
        .map(|s| s.cidr)
        .collect();
    addr::plan_subnet(record.cidr, cidr, &siblings)?;

    let entry = SubnetRecord {
        name: subnet.to_string(),
        cidr,
        kind,
        netns: name::netns(vpc, subnet),
        host_veth: name::host_veth(vpc, subnet),
        ns_veth: name::ns_veth(subnet),
        gateway: addr::gateway(cidr),
        host_addr: Ipv4Net::new(addr::host_ip(cidr), cidr.prefix_len())
            .map_err(|_| VpcError::Addr(crate::addr::AddrError::Invalid(cidr.to_string())))?,
        apps: match record.subnets.get(subnet) {
            Some(existing) => existing.apps.clone(),
            None => Vec::new(),
        },
    };

    info!(vpc, subnet, cidr = %cidr, kind = %kind, netns = %entry.netns, "adding subnet");

    if let Err(e) = realize(&record, &entry).await {
        warn!(vpc, subnet, error = %e, "subnet creation failed");
        if !redrive {
            rollback(vpc, &record, &entry).await;
        }
        return Err(e.into());
    }

    record.subnets.insert(subnet.to_string(), entry.clone());
    store.put(&record).await?;
    info!(vpc, subnet, "subnet added");
    Ok(entry)
}

async fn realize(record: &VpcRecord, entry: &SubnetRecord) -> std::result::Result<(), HostError> {
    host::netns_add(&entry.netns).await?;
    host::ensure_veth_in_ns(&entry.host_veth, &entry.ns_veth, &entry.netns).await?;
    host::link_set_master(&entry.host_veth, &record.bridge).await?;
    host::link_set_up(&entry.host_veth).await?;
    host::ns_link_set_up(&entry.netns, &entry.ns_veth).await?;
    host::ns_link_set_up(&entry.netns, "lo").await?;
    host::ns_addr_add(&entry.netns, &entry.ns_veth, &entry.host_addr.to_string()).await?;
    // The subnet gateway lives on the bridge alongside the VPC gateway so
    // the namespace's default route has an on-link next hop.
    let gateway_addr = format!("{}/{}", entry.gateway, entry.cidr.prefix_len());
    host::addr_add(&record.bridge, &gateway_addr).await?;
    host::ns_route_add_default(&entry.netns, &entry.gateway.to_string()).await?;
    if entry.kind == SubnetKind::Public {
        let tag = host::nat_tag(&record.name, &entry.name);
        host::nat_add(&entry.cidr.to_string(), &record.upstream, &tag).await?;
    }
    Ok(())
}

/// Reverse a half-built subnet. Not-found is the expected case for steps
/// that never ran.
async fn rollback(vpc: &str, record: &VpcRecord, entry: &SubnetRecord) {
    if let Err(e) = host::netns_del(&entry.netns).await {
        warn!(vpc, subnet = %entry.name, error = %e, "rollback: namespace removal failed");
    }
    if let Err(e) = host::link_del(&entry.host_veth).await {
        warn!(vpc, subnet = %entry.name, error = %e, "rollback: veth removal failed");
    }
    if entry.kind == SubnetKind::Public {
        let tag = host::nat_tag(vpc, &entry.name);
        if let Err(e) = host::nat_del(&entry.cidr.to_string(), &record.upstream, &tag).await {
            warn!(vpc, subnet = %entry.name, error = %e, "rollback: nat removal failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, VpcStore) {
        let dir = tempfile::tempdir().unwrap();
        let vpc_store = VpcStore::new(dir.path().to_path_buf());
        (dir, vpc_store)
    }

    fn vpc_record(name: &str, cidr: &str) -> VpcRecord {
        VpcRecord {
            name: name.to_string(),
            cidr: cidr.parse().unwrap(),
            bridge: crate::name::bridge(name),
            upstream: "eth0".to_string(),
            subnets: Default::default(),
            peerings: Default::default(),
        }
    }

    fn subnet_record(name: &str, cidr: &str, kind: SubnetKind) -> SubnetRecord {
        let cidr: Ipv4Net = cidr.parse().unwrap();
        SubnetRecord {
            name: name.to_string(),
            cidr,
            kind,
            netns: crate::name::netns("testvpc", name),
            host_veth: crate::name::host_veth("testvpc", name),
            ns_veth: crate::name::ns_veth(name),
            gateway: crate::addr::gateway(cidr),
            host_addr: Ipv4Net::new(crate::addr::host_ip(cidr), cidr.prefix_len()).unwrap(),
            apps: Vec::new(),
        }
    }

    #[tokio::test]
    async fn add_to_missing_vpc_fails() {
        let (_dir, store) = store();
        let err = add(&store, "ghost", "public", "10.20.1.0/24", SubnetKind::Public)
            .await
            .unwrap_err();
        assert!(matches!(err, VpcError::VpcNotFound(_)));
    }

    #[tokio::test]
    async fn add_rejects_invalid_subnet_name() {
        let (_dir, store) = store();
        store.put(&vpc_record("testvpc", "10.20.0.0/16")).await.unwrap();
        let err = add(&store, "testvpc", "Public!", "10.20.1.0/24", SubnetKind::Public)
            .await
            .unwrap_err();
        assert!(matches!(err, VpcError::Name(_)));
    }

    #[tokio::test]
    async fn add_rejects_block_outside_vpc() {
        let (_dir, store) = store();
        store.put(&vpc_record("testvpc", "10.20.0.0/16")).await.unwrap();
        let err = add(&store, "testvpc", "public", "10.30.1.0/24", SubnetKind::Public)
            .await
            .unwrap_err();
        assert!(matches!(err, VpcError::Addr(crate::addr::AddrError::NotContained(_, _))));
    }

    #[tokio::test]
    async fn add_rejects_block_equal_to_vpc() {
        let (_dir, store) = store();
        store.put(&vpc_record("testvpc", "10.20.0.0/16")).await.unwrap();
        let err = add(&store, "testvpc", "public", "10.20.0.0/16", SubnetKind::Public)
            .await
            .unwrap_err();
        assert!(matches!(err, VpcError::Addr(crate::addr::AddrError::NotContained(_, _))));
    }

    #[tokio::test]
    async fn add_rejects_sibling_overlap() {
        let (_dir, store) = store();
        let mut rec = vpc_record("testvpc", "10.20.0.0/16");
        rec.subnets.insert(
            "public".to_string(),
            subnet_record("public", "10.20.1.0/24", SubnetKind::Public),
        );
        store.put(&rec).await.unwrap();

        let err = add(&store, "testvpc", "private", "10.20.1.128/25", SubnetKind::Private)
            .await
            .unwrap_err();
        assert!(matches!(err, VpcError::Addr(crate::addr::AddrError::Overlap(_, _))));
    }

    #[tokio::test]
    async fn add_rejects_same_name_different_block() {
        let (_dir, store) = store();
        let mut rec = vpc_record("testvpc", "10.20.0.0/16");
        rec.subnets.insert(
            "public".to_string(),
            subnet_record("public", "10.20.1.0/24", SubnetKind::Public),
        );
        store.put(&rec).await.unwrap();

        let err = add(&store, "testvpc", "public", "10.20.2.0/24", SubnetKind::Public)
            .await
            .unwrap_err();
        assert!(matches!(err, VpcError::SubnetMismatch(_)));
    }

    #[tokio::test]
    async fn add_rejects_same_name_different_kind() {
        let (_dir, store) = store();
        let mut rec = vpc_record("testvpc", "10.20.0.0/16");
        rec.subnets.insert(
            "public".to_string(),
            subnet_record("public", "10.20.1.0/24", SubnetKind::Public),
        );
        store.put(&rec).await.unwrap();

        let err = add(&store, "testvpc", "public", "10.20.1.0/24", SubnetKind::Private)
            .await
            .unwrap_err();
        assert!(matches!(err, VpcError::SubnetMismatch(_)));
    }

    #[test]
    fn derived_subnet_fields_match_plan() {
        let rec = subnet_record("public", "10.20.1.0/24", SubnetKind::Public);
        assert_eq!(rec.netns, "vpc-testvpc-ns-public");
        assert_eq!(rec.gateway.to_string(), "10.20.1.1");
        assert_eq!(rec.host_addr.to_string(), "10.20.1.2/24");
    }
}
