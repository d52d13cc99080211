//! Deterministic, length-safe names for every kernel object the crate owns.
//!
//! The kernel caps link names at 15 bytes. Derived names that would exceed
//! the cap replace their variable segment with a 6-character SHA-256 digest
//! while keeping the type tag, so every name stays a pure function of
//! (kind, vpc, subnet/peer). Input validation keeps truncation rare.

use sha2::{Digest, Sha256};

/// Effective maximum length of a kernel link name (IFNAMSIZ minus the NUL).
pub const LINK_NAME_MAX: usize = 15;

/// Namespace names are filenames under /var/run/netns, not link names.
const NETNS_NAME_MAX: usize = 255;

const INPUT_NAME_MAX: usize = 32;
const DIGEST_CHARS: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("name must be 1-32 characters: {0:?}")]
    BadLength(String),

    #[error("name must match [a-z0-9][a-z0-9-]*: {0:?}")]
    BadCharacters(String),
}

/// Validate a VPC or subnet name: 1-32 chars of `[a-z0-9][a-z0-9-]*`.
pub fn validate(name: &str) -> Result<(), NameError> {
    if name.is_empty() || name.len() > INPUT_NAME_MAX {
        return Err(NameError::BadLength(name.to_string()));
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {}
        _ => return Err(NameError::BadCharacters(name.to_string())),
    }
    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return Err(NameError::BadCharacters(name.to_string()));
    }
    Ok(())
}

/// First 6 lowercase-hex chars of the SHA-256 of `segment`.
fn digest6(segment: &str) -> String {
    let hash = Sha256::digest(segment.as_bytes());
    let mut out = String::with_capacity(DIGEST_CHARS);
    for byte in hash.iter().take(DIGEST_CHARS / 2) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Bridge for a VPC: `vpc-<vpc>-br`, or `vpc-<digest>-br` when over-long.
pub fn bridge(vpc: &str) -> String {
    let natural = format!("vpc-{vpc}-br");
    if natural.len() <= LINK_NAME_MAX {
        natural
    } else {
        format!("vpc-{}-br", digest6(vpc))
    }
}

/// Namespace for a subnet: `vpc-<vpc>-ns-<subnet>`, or `vpc-ns-<digest>`.
///
/// Validated inputs always fit the filename cap, so the digest form only
/// guards against inputs that bypassed validation.
pub fn netns(vpc: &str, subnet: &str) -> String {
    let natural = format!("vpc-{vpc}-ns-{subnet}");
    if natural.len() <= NETNS_NAME_MAX {
        natural
    } else {
        format!("vpc-ns-{}", digest6(&format!("{vpc}-{subnet}")))
    }
}

/// Host-side veth for a subnet: `veth-<vpc>-<subnet>`, or `veth-<digest>`.
pub fn host_veth(vpc: &str, subnet: &str) -> String {
    let natural = format!("veth-{vpc}-{subnet}");
    if natural.len() <= LINK_NAME_MAX {
        natural
    } else {
        format!("veth-{}", digest6(&format!("{vpc}-{subnet}")))
    }
}

/// Namespace-side veth for a subnet: `veth-ns-<subnet>`, or `veth-ns-<digest>`.
pub fn ns_veth(subnet: &str) -> String {
    let natural = format!("veth-ns-{subnet}");
    if natural.len() <= LINK_NAME_MAX {
        natural
    } else {
        format!("veth-ns-{}", digest6(subnet))
    }
}

/// Peering endpoint attached to `local`'s bridge: `peer-<local>-<remote>`,
/// or `peer-<digest>`.
pub fn peer_link(local: &str, remote: &str) -> String {
    let natural = format!("peer-{local}-{remote}");
    if natural.len() <= LINK_NAME_MAX {
        natural
    } else {
        format!("peer-{}", digest6(&format!("{local}-{remote}")))
    }
}

/// Order a peering pair canonically: lexicographically smaller name first.
pub fn canonical_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b { (a, b) } else { (b, a) }
}
