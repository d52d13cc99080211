//! Full teardown: delete every recorded VPC, then sweep the host for
//! orphaned objects that match the naming scheme. Runs to completion even
//! when the state store is unreadable or individual removals fail.

use serde::Serialize;
use tracing::{info, warn};

use crate::store::VpcStore;
use crate::{host, vpc};

#[derive(Debug, Default, Serialize)]
pub struct TeardownReport {
    pub vpcs_deleted: usize,
    pub orphan_netns: usize,
    pub orphan_links: usize,
    pub orphan_nat_rules: usize,
    pub warnings: Vec<String>,
    /// Set when the state store could not be read; the sweep still ran.
    pub store_unreadable: bool,
}

pub async fn run(store: &VpcStore) -> TeardownReport {
    let mut report = TeardownReport::default();

    let records = match store.list().await {
        Ok(records) => records,
        Err(e) => {
            warn!(error = %e, "state store unreadable, sweeping orphans only");
            report.warnings.push(format!("state store unreadable: {e}"));
            report.store_unreadable = true;
            Vec::new()
        }
    };

    for record in records {
        match vpc::delete(store, &record.name).await {
            Ok(()) => report.vpcs_deleted += 1,
            Err(e) => {
                warn!(vpc = %record.name, error = %e, "vpc deletion failed, continuing");
                report.warnings.push(format!("{}: {e}", record.name));
            }
        }
    }

    sweep_orphans(&mut report).await;
    info!(
        vpcs = report.vpcs_deleted,
        netns = report.orphan_netns,
        links = report.orphan_links,
        nat = report.orphan_nat_rules,
        "teardown complete"
    );
    report
}

/// Remove kernel objects matching the naming scheme that no record claimed.
async fn sweep_orphans(report: &mut TeardownReport) {
    match host::netns_list().await {
        Ok(names) => {
            for ns in names.iter().filter(|n| is_owned_netns(n)) {
                if host::netns_del(ns).await.is_ok() {
                    report.orphan_netns += 1;
                }
            }
        }
        Err(e) => warn!(error = %e, "namespace sweep failed"),
    }

    match host::links().await {
        Ok(links) => {
            for link in links.iter().filter(|l| is_owned_link(l)) {
                if host::link_del(link).await.is_ok() {
                    report.orphan_links += 1;
                }
            }
        }
        Err(e) => warn!(error = %e, "link sweep failed"),
    }

    match host::nat_rules_tagged().await {
        Ok(rules) => {
            for rule in &rules {
                host::nat_del_saved_rule(rule).await;
            }
            report.orphan_nat_rules = rules.len();
        }
        Err(e) => warn!(error = %e, "nat sweep failed"),
    }
}

fn is_owned_netns(name: &str) -> bool {
    name.starts_with("vpc-") && name.contains("-ns-")
}

fn is_owned_link(name: &str) -> bool {
    (name.starts_with("vpc-") && name.ends_with("-br"))
        || name.starts_with("veth-")
        || name.starts_with("peer-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_netns_matches_naming_scheme() {
        assert!(is_owned_netns("vpc-testvpc-ns-public"));
        assert!(is_owned_netns("vpc-ns-ab12cd"), "digest form");
        assert!(!is_owned_netns("mynetns"));
        assert!(!is_owned_netns("vpc-testvpc"));
        assert!(!is_owned_netns("other-ns-thing"));
    }

    #[test]
    fn owned_link_matches_naming_scheme() {
        assert!(is_owned_link("vpc-testvpc-br"));
        assert!(is_owned_link("veth-tv-pub"));
        assert!(is_owned_link("veth-ns-public"));
        assert!(is_owned_link("peer-db-web"));
        assert!(!is_owned_link("eth0"));
        assert!(!is_owned_link("lo"));
        assert!(!is_owned_link("docker0"));
        assert!(!is_owned_link("vpc-testvpc"), "bridge tag required");
    }

    #[test]
    fn report_serializes_for_structured_output() {
        let report = TeardownReport {
            vpcs_deleted: 2,
            orphan_netns: 1,
            orphan_links: 3,
            orphan_nat_rules: 1,
            warnings: vec!["testvpc: boom".to_string()],
            store_unreadable: false,
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["vpcs_deleted"], 2);
        assert_eq!(value["warnings"][0], "testvpc: boom");
    }
}
