//! Cluster client layer: topology parsing, node addresses, and the
//! capability traits the pipeline is written against.
//!
//! - `types`: parsed `CLUSTER NODES` / `CLUSTER INFO` output
//! - `uri`: node addresses and canonicalization against live topology
//! - `cluster_client`: the [`ClusterClient`] / [`NodeHandle`] traits
//! - `fred_client`: production implementation over the `fred` crate

pub mod cluster_client;
pub mod fred_client;
pub mod types;
pub mod uri;

pub use cluster_client::{ClientError, ClusterClient, NodeHandle};
pub use fred_client::{FredClusterClient, FredNode};
pub use types::{NodeFlags, NodeInfo, NodeRole, ParseError, SlotRange, masters};
pub use uri::{RedisUri, canonicalize, resolve_node};
