//! Host-local VPC control plane.
//!
//! Declarative VPCs realized with Linux network namespaces, bridges, veth
//! pairs, routes, and iptables NAT/filter rules, with durable per-VPC JSON
//! state and idempotent reconciliation. Every kernel mutation goes through
//! the [`host`] executor; the pure planners ([`addr`], [`name`]) validate
//! intent before anything touches the host.

pub mod addr;
pub mod app;
mod command;
pub mod host;
pub mod name;
pub mod peering;
pub mod policy;
pub mod store;
pub mod subnet;
pub mod teardown;
pub mod types;
pub mod vpc;

mod error;

pub use command::HostError;
pub use error::{Result, VpcError};
pub use store::{StoreError, VpcStore};
pub use types::{AppRecord, PeeringRecord, SubnetKind, SubnetRecord, VpcRecord};
