//! Typed wrappers around the host network tools.
//!
//! Every kernel mutation in the crate funnels through this module. Each
//! wrapper returns a classified [`HostError`]; creators treat
//! already-exists as success and removers treat not-found as success, so
//! the reconciler sequences stay idempotent.

use crate::command::{HostError, exec, exec_ignore_errors};

/// Comment tag attached to every NAT rule this crate owns, so orphan sweeps
/// can recognize them in `iptables-save` output.
pub const NAT_TAG_PREFIX: &str = "vpcctl:";

pub fn nat_tag(vpc: &str, subnet: &str) -> String {
    format!("{NAT_TAG_PREFIX}{vpc}:{subnet}")
}

fn ok_if_exists(result: Result<String, HostError>) -> Result<(), HostError> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_already_exists() => Ok(()),
        Err(e) => Err(e),
    }
}

fn ok_if_missing(result: Result<String, HostError>) -> Result<(), HostError> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}

// ---------------------------------------------------------------------------
// Link management
// ---------------------------------------------------------------------------

pub async fn ensure_bridge(name: &str) -> Result<(), HostError> {
    ok_if_exists(exec("ip", &["link", "add", name, "type", "bridge"]).await)
}

/// Create a veth pair with the peer end born inside `netns`.
pub async fn ensure_veth_in_ns(host: &str, peer: &str, netns: &str) -> Result<(), HostError> {
    ok_if_exists(
        exec(
            "ip",
            &["link", "add", host, "type", "veth", "peer", "name", peer, "netns", netns],
        )
        .await,
    )
}

/// Create a veth pair with both ends in the root namespace.
pub async fn ensure_veth_pair(a: &str, b: &str) -> Result<(), HostError> {
    ok_if_exists(exec("ip", &["link", "add", a, "type", "veth", "peer", "name", b]).await)
}

pub async fn link_set_master(dev: &str, bridge: &str) -> Result<(), HostError> {
    exec("ip", &["link", "set", dev, "master", bridge]).await.map(|_| ())
}

pub async fn link_set_up(dev: &str) -> Result<(), HostError> {
    exec("ip", &["link", "set", dev, "up"]).await.map(|_| ())
}

pub async fn link_del(dev: &str) -> Result<(), HostError> {
    ok_if_missing(exec("ip", &["link", "del", dev]).await)
}

/// Assign an address (`a.b.c.d/len`) to a link. Re-assignment is benign.
pub async fn addr_add(dev: &str, addr: &str) -> Result<(), HostError> {
    ok_if_exists(exec("ip", &["addr", "add", addr, "dev", dev]).await)
}

pub async fn route_add(dst: &str, dev: &str) -> Result<(), HostError> {
    ok_if_exists(exec("ip", &["route", "add", dst, "dev", dev]).await)
}

pub async fn route_del(dst: &str, dev: &str) -> Result<(), HostError> {
    ok_if_missing(exec("ip", &["route", "del", dst, "dev", dev]).await)
}

/// List link names in the root namespace, `@peer` suffixes stripped.
pub async fn links() -> Result<Vec<String>, HostError> {
    let output = exec("ip", &["-o", "link", "show"]).await?;
    Ok(parse_link_names(&output))
}

fn parse_link_names(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, ": ");
            let _index = parts.next()?;
            let name = parts.next()?;
            let name = name.split('@').next().unwrap_or(name);
            Some(name.to_string())
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Forwarding sysctls
// ---------------------------------------------------------------------------

pub async fn enable_global_forwarding() -> Result<(), HostError> {
    exec("sysctl", &["-w", "net.ipv4.ip_forward=1"]).await.map(|_| ())
}

pub async fn enable_forwarding(dev: &str) -> Result<(), HostError> {
    let key = format!("net.ipv4.conf.{dev}.forwarding=1");
    exec("sysctl", &["-w", &key]).await.map(|_| ())
}

// ---------------------------------------------------------------------------
// Namespace management
// ---------------------------------------------------------------------------

pub async fn netns_add(name: &str) -> Result<(), HostError> {
    ok_if_exists(exec("ip", &["netns", "add", name]).await)
}

pub async fn netns_del(name: &str) -> Result<(), HostError> {
    ok_if_missing(exec("ip", &["netns", "del", name]).await)
}

pub async fn netns_list() -> Result<Vec<String>, HostError> {
    let output = exec("ip", &["netns", "list"]).await?;
    Ok(parse_netns_names(&output))
}

fn parse_netns_names(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(String::from)
        .collect()
}

pub async fn ns_link_set_up(netns: &str, dev: &str) -> Result<(), HostError> {
    exec("ip", &["netns", "exec", netns, "ip", "link", "set", dev, "up"])
        .await
        .map(|_| ())
}

pub async fn ns_addr_add(netns: &str, dev: &str, addr: &str) -> Result<(), HostError> {
    ok_if_exists(exec("ip", &["netns", "exec", netns, "ip", "addr", "add", addr, "dev", dev]).await)
}

pub async fn ns_route_add_default(netns: &str, gateway: &str) -> Result<(), HostError> {
    ok_if_exists(
        exec("ip", &["netns", "exec", netns, "ip", "route", "add", "default", "via", gateway])
            .await,
    )
}

// ---------------------------------------------------------------------------
// NAT (masquerade)
// ---------------------------------------------------------------------------

fn masquerade_args<'a>(op: &'a str, cidr: &'a str, iface: &'a str, tag: &'a str) -> Vec<&'a str> {
    vec![
        "-t", "nat", op, "POSTROUTING", "-s", cidr, "-o", iface, "-j", "MASQUERADE", "-m",
        "comment", "--comment", tag,
    ]
}

/// Check-then-insert a masquerade rule for `cidr` out of `iface`.
pub async fn nat_add(cidr: &str, iface: &str, tag: &str) -> Result<(), HostError> {
    match exec("iptables", &masquerade_args("-C", cidr, iface, tag)).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => {
            exec("iptables", &masquerade_args("-A", cidr, iface, tag)).await.map(|_| ())
        }
        Err(e) => Err(e),
    }
}

pub async fn nat_del(cidr: &str, iface: &str, tag: &str) -> Result<(), HostError> {
    ok_if_missing(exec("iptables", &masquerade_args("-D", cidr, iface, tag)).await)
}

/// Rules in the nat table carrying our comment tag, as `iptables-save` lines.
pub async fn nat_rules_tagged() -> Result<Vec<String>, HostError> {
    let output = exec("iptables-save", &["-t", "nat"]).await?;
    Ok(output
        .lines()
        .filter(|line| line.starts_with("-A ") && line.contains(NAT_TAG_PREFIX))
        .map(String::from)
        .collect())
}

/// Delete a rule by its `iptables-save` line (`-A ...` rewritten to `-D ...`).
///
/// Our comment tags contain no whitespace, so splitting the saved line on
/// whitespace reconstructs the original arguments; `iptables-save` may quote
/// the comment, which the quote strip undoes.
pub async fn nat_del_saved_rule(line: &str) {
    let args: Vec<String> = line
        .split_whitespace()
        .enumerate()
        .map(|(i, token)| {
            if i == 0 && token == "-A" {
                "-D".to_string()
            } else {
                token.trim_matches('"').to_string()
            }
        })
        .collect();
    let mut full: Vec<&str> = vec!["-t", "nat"];
    full.extend(args.iter().map(String::as_str));
    exec_ignore_errors("iptables", &full).await;
}

// ---------------------------------------------------------------------------
// Packet filtering inside namespaces
// ---------------------------------------------------------------------------

/// Check-then-append a filter rule on `chain` inside `netns`.
pub async fn ns_filter_add(netns: &str, chain: &str, rule: &[String]) -> Result<(), HostError> {
    let check = filter_args(netns, "-C", chain, rule);
    match exec("ip", &to_refs(&check)).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => {
            let append = filter_args(netns, "-A", chain, rule);
            exec("ip", &to_refs(&append)).await.map(|_| ())
        }
        Err(e) => Err(e),
    }
}

fn filter_args(netns: &str, op: &str, chain: &str, rule: &[String]) -> Vec<String> {
    let mut args = vec![
        "netns".to_string(),
        "exec".to_string(),
        netns.to_string(),
        "iptables".to_string(),
        op.to_string(),
        chain.to_string(),
    ];
    args.extend(rule.iter().cloned());
    args
}

fn to_refs(args: &[String]) -> Vec<&str> {
    args.iter().map(String::as_str).collect()
}
