//! Rendering of verb results: terse human-readable text by default,
//! structured JSON with `--json`.

use serde_json::json;
use vpcnet::policy::PolicyOutcome;
use vpcnet::teardown::TeardownReport;
use vpcnet::{AppRecord, PeeringRecord, SubnetRecord, VpcRecord};

type Render = Result<String, serde_json::Error>;

pub fn created_vpc(record: &VpcRecord, as_json: bool) -> Render {
    if as_json {
        return serde_json::to_string_pretty(record);
    }
    Ok(format!(
        "created vpc {} ({}) bridge {} upstream {}",
        record.name, record.cidr, record.bridge, record.upstream
    ))
}

pub fn subnet_added(vpc: &str, subnet: &SubnetRecord, as_json: bool) -> Render {
    if as_json {
        return serde_json::to_string_pretty(subnet);
    }
    Ok(format!(
        "added {} subnet {} ({}) to vpc {}: netns {} gateway {} addr {}",
        subnet.kind, subnet.name, subnet.cidr, vpc, subnet.netns, subnet.gateway, subnet.host_addr
    ))
}

pub fn app_deployed(vpc: &str, subnet: &str, app: &AppRecord, as_json: bool) -> Render {
    if as_json {
        return serde_json::to_string_pretty(app);
    }
    let pid = app.pid.map_or_else(|| "unknown".to_string(), |p| p.to_string());
    Ok(format!("deployed {} in {}/{} (pid {})", app.name, vpc, subnet, pid))
}

pub fn policy_applied(outcome: &PolicyOutcome, as_json: bool) -> Render {
    if as_json {
        return serde_json::to_string_pretty(outcome);
    }
    let mut line = format!(
        "applied {} rules across {} subnets",
        outcome.rules_applied, outcome.subnets_matched
    );
    if !outcome.warnings.is_empty() {
        line.push_str(&format!(" ({} warnings)", outcome.warnings.len()));
    }
    Ok(line)
}

pub fn peered(peering: &PeeringRecord, as_json: bool) -> Render {
    if as_json {
        return serde_json::to_string_pretty(peering);
    }
    let allowed: Vec<String> = peering.allowed_cidrs.iter().map(|c| c.to_string()).collect();
    Ok(format!(
        "peered {} and {} via {}/{} allowing {}",
        peering.vpc_a,
        peering.vpc_b,
        peering.link_a,
        peering.link_b,
        allowed.join(",")
    ))
}

pub fn inspect(record: &VpcRecord, as_json: bool) -> Render {
    if as_json {
        return serde_json::to_string_pretty(record);
    }
    let mut out = format!(
        "vpc {}\n  cidr:     {}\n  bridge:   {}\n  upstream: {}\n",
        record.name, record.cidr, record.bridge, record.upstream
    );
    if !record.subnets.is_empty() {
        out.push_str("  subnets:\n");
        for subnet in record.subnets.values() {
            out.push_str(&format!(
                "    {} {} {} netns {} gw {} addr {}\n",
                subnet.name, subnet.cidr, subnet.kind, subnet.netns, subnet.gateway,
                subnet.host_addr
            ));
            for app in &subnet.apps {
                let pid = app.pid.map_or_else(|| "?".to_string(), |p| p.to_string());
                out.push_str(&format!("      app {} (pid {}): {}\n", app.name, pid, app.cmd));
            }
        }
    }
    if !record.peerings.is_empty() {
        out.push_str("  peerings:\n");
        for (peer, peering) in &record.peerings {
            let allowed: Vec<String> =
                peering.allowed_cidrs.iter().map(|c| c.to_string()).collect();
            out.push_str(&format!(
                "    {} via {}/{} allowed {}\n",
                peer,
                peering.link_a,
                peering.link_b,
                allowed.join(",")
            ));
        }
    }
    Ok(out.trim_end().to_string())
}

pub fn vpc_list(records: &[VpcRecord], as_json: bool) -> Render {
    if as_json {
        return serde_json::to_string_pretty(&json!({ "vpcs": records }));
    }
    if records.is_empty() {
        return Ok("no vpcs".to_string());
    }
    let lines: Vec<String> = records
        .iter()
        .map(|r| {
            format!(
                "{}  {}  upstream {}  subnets {}  peerings {}",
                r.name,
                r.cidr,
                r.upstream,
                r.subnets.len(),
                r.peerings.len()
            )
        })
        .collect();
    Ok(lines.join("\n"))
}

pub fn deleted(name: &str, as_json: bool) -> Render {
    if as_json {
        return serde_json::to_string_pretty(&json!({ "deleted": name }));
    }
    Ok(format!("deleted vpc {name}"))
}

pub fn teardown(report: &TeardownReport, as_json: bool) -> Render {
    if as_json {
        return serde_json::to_string_pretty(report);
    }
    let mut line = format!(
        "teardown complete: {} vpcs deleted, {} orphan namespaces, {} orphan links, {} orphan nat rules",
        report.vpcs_deleted, report.orphan_netns, report.orphan_links, report.orphan_nat_rules
    );
    if !report.warnings.is_empty() {
        line.push_str(&format!(" ({} warnings)", report.warnings.len()));
    }
    Ok(line)
}
