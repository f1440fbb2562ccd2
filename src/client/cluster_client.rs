//! Capability traits the pipeline consumes.
//!
//! The core never talks to a Redis library directly; it drives a
//! [`ClusterClient`] for topology and connection lookup and a
//! [`NodeHandle`] for per-node commands. Retry policy lives with the
//! callers, never in an implementation of these traits.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use super::types::{NodeInfo, ParseError};
use super::uri::RedisUri;

/// Errors surfaced by a cluster client implementation.
///
/// `Command` carries the server's reply verbatim; slot-migration recovery
/// classifies on that text.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("{0}")]
    Command(String),

    #[error(transparent)]
    Redis(#[from] fred::error::Error),

    #[error("unknown node {0}")]
    UnknownNode(String),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// A live command connection to one cluster node.
///
/// Handles are cheap to clone and safe to share across concurrent
/// migration workers.
#[async_trait]
pub trait NodeHandle: Send + Sync + 'static {
    async fn cluster_meet(&self, uri: &RedisUri) -> Result<(), ClientError>;

    async fn cluster_forget(&self, node_id: &str) -> Result<(), ClientError>;

    async fn cluster_reset_hard(&self) -> Result<(), ClientError>;

    async fn cluster_replicate(&self, master_id: &str) -> Result<(), ClientError>;

    /// `CLUSTER SETSLOT <slot> IMPORTING <source-id>`, issued on the
    /// destination node.
    async fn set_slot_importing(&self, slot: u16, source_id: &str) -> Result<(), ClientError>;

    /// `CLUSTER SETSLOT <slot> MIGRATING <dest-id>`, issued on the source
    /// node.
    async fn set_slot_migrating(&self, slot: u16, dest_id: &str) -> Result<(), ClientError>;

    /// `CLUSTER SETSLOT <slot> NODE <owner-id>`; finalizes ownership.
    async fn set_slot_node(&self, slot: u16, owner_id: &str) -> Result<(), ClientError>;

    async fn count_keys_in_slot(&self, slot: u16) -> Result<u64, ClientError>;

    async fn keys_in_slot(&self, slot: u16, count: u64) -> Result<Vec<String>, ClientError>;

    /// One `MIGRATE` call moving all given keys to `dest`.
    async fn migrate_keys(
        &self,
        dest: &RedisUri,
        keys: &[String],
        replace: bool,
    ) -> Result<(), ClientError>;

    /// `CLUSTER INFO` as a key/value map.
    async fn cluster_info(&self) -> Result<HashMap<String, String>, ClientError>;
}

/// Cluster-wide view plus pooled per-node connections.
#[async_trait]
pub trait ClusterClient: Send + Sync + 'static {
    type Node: NodeHandle + Clone;

    /// Current cluster view from the controller's seed.
    async fn topology(&self) -> Result<Vec<NodeInfo>, ClientError>;

    /// Idempotent, pooled connection to a node seen in a previous
    /// [`topology`](Self::topology) call.
    async fn connection(&self, node_id: &str) -> Result<Self::Node, ClientError>;
}
