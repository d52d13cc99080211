//! Declarative firewall policies compiled to per-namespace filter rules.
//!
//! A policy document is a JSON array of entries targeting a subnet CIDR.
//! Rules apply in listed order to every subnet of every VPC whose CIDR
//! equals the target (policy-by-CIDR); the first matching packet-filter
//! rule decides and the default is allow. Uncompilable rules are skipped
//! with a warning, never aborting the batch.

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, VpcError};
use crate::host;
use crate::store::VpcStore;

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyEntry {
    pub subnet: Ipv4Net,
    #[serde(default)]
    pub ingress: Vec<PolicyRule>,
    #[serde(default)]
    pub egress: Vec<PolicyRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyRule {
    pub port: PortSpec,
    /// Kept as free text so an unknown protocol skips this rule instead of
    /// failing the whole document.
    pub protocol: String,
    pub action: RuleAction,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PortSpec {
    Number(u16),
    Keyword(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Deny,
}

impl RuleAction {
    fn target(self) -> &'static str {
        match self {
            RuleAction::Allow => "ACCEPT",
            RuleAction::Deny => "DROP",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Ingress,
    Egress,
}

impl Direction {
    fn chain(self) -> &'static str {
        match self {
            Direction::Ingress => "INPUT",
            Direction::Egress => "OUTPUT",
        }
    }
}

/// What a policy application did: rule insertions, matched subnets, and the
/// rules or entries that were skipped.
#[derive(Debug, Default, Serialize)]
pub struct PolicyOutcome {
    pub rules_applied: usize,
    pub subnets_matched: usize,
    pub warnings: Vec<String>,
}

/// Parse a policy document (top-level JSON array).
pub fn parse(content: &str) -> Result<Vec<PolicyEntry>> {
    serde_json::from_str(content).map_err(|e| VpcError::PolicyParse(e.to_string()))
}

/// Compile one rule into iptables argument vectors.
///
/// A numeric port with protocol `any` expands to a tcp and a udp rule at
/// the same position. Returns a warning message for rules that cannot be
/// expressed (unknown protocol or port keyword, icmp with a port).
fn compile_rule(rule: &PolicyRule) -> std::result::Result<Vec<Vec<String>>, String> {
    let target = rule.action.target();
    let port = match &rule.port {
        PortSpec::Number(n) => Some(*n),
        PortSpec::Keyword(k) if k == "any" => None,
        PortSpec::Keyword(k) => return Err(format!("unknown port {k:?}")),
    };

    let with_proto = |proto: &str, port: Option<u16>| -> Vec<String> {
        let mut args = vec!["-p".to_string(), proto.to_string()];
        if let Some(p) = port {
            args.push("--dport".to_string());
            args.push(p.to_string());
        }
        args.push("-j".to_string());
        args.push(target.to_string());
        args
    };

    match (rule.protocol.as_str(), port) {
        ("any", None) => Ok(vec![vec!["-j".to_string(), target.to_string()]]),
        ("any", Some(p)) => Ok(vec![with_proto("tcp", Some(p)), with_proto("udp", Some(p))]),
        (proto @ ("tcp" | "udp"), p) => Ok(vec![with_proto(proto, p)]),
        ("icmp", None) => Ok(vec![with_proto("icmp", None)]),
        ("icmp", Some(_)) => Err("icmp rules cannot match a port".to_string()),
        (other, _) => Err(format!("unknown protocol {other:?}")),
    }
}

/// Apply a policy document across every VPC record.
pub async fn apply(store: &VpcStore, entries: &[PolicyEntry]) -> Result<PolicyOutcome> {
    let records = store.list().await?;
    let mut outcome = PolicyOutcome::default();

    for entry in entries {
        let mut matched = false;
        for record in &records {
            for subnet in record.subnets.values().filter(|s| s.cidr == entry.subnet) {
                matched = true;
                outcome.subnets_matched += 1;
                info!(vpc = %record.name, subnet = %subnet.name, cidr = %entry.subnet, "applying policy");
                apply_direction(&mut outcome, &subnet.netns, Direction::Ingress, &entry.ingress)
                    .await;
                apply_direction(&mut outcome, &subnet.netns, Direction::Egress, &entry.egress)
                    .await;
            }
        }
        if !matched {
            let msg = format!("no subnet with cidr {} in any vpc", entry.subnet);
            warn!(cidr = %entry.subnet, "policy entry matched no subnet");
            outcome.warnings.push(msg);
        }
    }
    Ok(outcome)
}

async fn apply_direction(
    outcome: &mut PolicyOutcome,
    netns: &str,
    direction: Direction,
    rules: &[PolicyRule],
) {
    for rule in rules {
        let compiled = match compile_rule(rule) {
            Ok(compiled) => compiled,
            Err(reason) => {
                warn!(netns, chain = direction.chain(), reason, "skipping rule");
                outcome.warnings.push(format!("{netns} {}: {reason}", direction.chain()));
                continue;
            }
        };
        for args in compiled {
            match host::ns_filter_add(netns, direction.chain(), &args).await {
                Ok(()) => outcome.rules_applied += 1,
                Err(e) => {
                    warn!(netns, chain = direction.chain(), error = %e, "rule insertion failed");
                    outcome.warnings.push(format!("{netns} {}: {e}", direction.chain()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(port: PortSpec, protocol: &str, action: RuleAction) -> PolicyRule {
        PolicyRule { port, protocol: protocol.to_string(), action }
    }

    #[test]
    fn parse_single_entry_document() {
        let doc = r#"[
            {"subnet": "10.20.2.0/24",
             "ingress": [{"port": 80, "protocol": "tcp", "action": "deny"}]}
        ]"#;
        let entries = parse(doc).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].subnet, "10.20.2.0/24".parse().unwrap());
        assert_eq!(entries[0].ingress.len(), 1);
        assert!(entries[0].egress.is_empty());
    }

    #[test]
    fn parse_empty_document() {
        assert!(parse("[]").unwrap().is_empty());
    }

    #[test]
    fn parse_rejects_non_array() {
        assert!(matches!(parse(r#"{"subnet": "10.0.0.0/24"}"#), Err(VpcError::PolicyParse(_))));
    }

    #[test]
    fn compile_tcp_port_deny() {
        let compiled =
            compile_rule(&rule(PortSpec::Number(80), "tcp", RuleAction::Deny)).unwrap();
        assert_eq!(compiled, vec![vec!["-p", "tcp", "--dport", "80", "-j", "DROP"]]);
    }

    #[test]
    fn compile_udp_any_port_allow() {
        let compiled =
            compile_rule(&rule(PortSpec::Keyword("any".into()), "udp", RuleAction::Allow))
                .unwrap();
        assert_eq!(compiled, vec![vec!["-p", "udp", "-j", "ACCEPT"]]);
    }

    #[test]
    fn compile_any_any_matches_all_traffic() {
        let compiled =
            compile_rule(&rule(PortSpec::Keyword("any".into()), "any", RuleAction::Deny)).unwrap();
        assert_eq!(compiled, vec![vec!["-j", "DROP"]]);
    }

    #[test]
    fn compile_any_protocol_with_port_expands_to_tcp_and_udp() {
        let compiled =
            compile_rule(&rule(PortSpec::Number(53), "any", RuleAction::Allow)).unwrap();
        assert_eq!(
            compiled,
            vec![
                vec!["-p", "tcp", "--dport", "53", "-j", "ACCEPT"],
                vec!["-p", "udp", "--dport", "53", "-j", "ACCEPT"],
            ]
        );
    }

    #[test]
    fn compile_icmp_without_port() {
        let compiled =
            compile_rule(&rule(PortSpec::Keyword("any".into()), "icmp", RuleAction::Deny))
                .unwrap();
        assert_eq!(compiled, vec![vec!["-p", "icmp", "-j", "DROP"]]);
    }

    #[test]
    fn compile_icmp_with_port_is_skipped() {
        let err = compile_rule(&rule(PortSpec::Number(8), "icmp", RuleAction::Deny)).unwrap_err();
        assert!(err.contains("port"), "got: {err}");
    }

    #[test]
    fn compile_unknown_protocol_is_skipped() {
        let err =
            compile_rule(&rule(PortSpec::Number(80), "sctp", RuleAction::Allow)).unwrap_err();
        assert!(err.contains("unknown protocol"), "got: {err}");
    }

    #[test]
    fn compile_unknown_port_keyword_is_skipped() {
        let err = compile_rule(&rule(PortSpec::Keyword("all".into()), "tcp", RuleAction::Allow))
            .unwrap_err();
        assert!(err.contains("unknown port"), "got: {err}");
    }

    #[tokio::test]
    async fn apply_with_no_matching_subnet_warns_and_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = VpcStore::new(dir.path().to_path_buf());
        let entries = parse(
            r#"[{"subnet": "10.99.1.0/24",
                 "ingress": [{"port": 80, "protocol": "tcp", "action": "deny"}]}]"#,
        )
        .unwrap();

        let outcome = apply(&store, &entries).await.unwrap();
        assert_eq!(outcome.rules_applied, 0);
        assert_eq!(outcome.subnets_matched, 0);
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[tokio::test]
    async fn apply_empty_policy_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = VpcStore::new(dir.path().to_path_buf());
        let outcome = apply(&store, &[]).await.unwrap();
        assert_eq!(outcome.rules_applied, 0);
        assert!(outcome.warnings.is_empty());
    }
}
