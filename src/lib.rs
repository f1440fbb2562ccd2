//! slotpilot - control-plane engine for Redis Cluster membership and
//! slot resharding.
//!
//! The crate accepts cluster-management tasks (add master, add replica,
//! remove node, reshard) and turns each into the multi-step protocol a
//! cluster operator would run by hand: meeting nodes, assigning replicas,
//! forgetting removed members, and migrating hash slots between masters
//! with bounded parallelism and per-error-class recovery.
//!
//! Embedders hand tasks to a [`Supervisor`] and listen for the terminal
//! outcome on the returned reply channel:
//!
//! ```rust,ignore
//! use slotpilot::{Config, FredClusterClient, Supervisor};
//!
//! let config = Config::default();
//! let client = Arc::new(FredClusterClient::connect(&config).await?);
//! let supervisor = Supervisor::start(config, client);
//!
//! let reply = supervisor.submit("add_master", "redis://10.0.0.4").await?;
//! match reply.await? {
//!     Ok((role, host)) => println!("{role} {host} ready"),
//!     Err(reason) => eprintln!("task failed: {reason}"),
//! }
//! ```
//!
//! Ingress transports (HTTP, message bus) and configuration loading are
//! the embedding service's concern; the pipeline itself never persists
//! state and does not coordinate with other controller instances.

pub mod client;
pub mod config;
pub mod pipeline;
pub mod slots;
pub mod supervisor;

pub use client::{
    ClientError, ClusterClient, FredClusterClient, NodeHandle, NodeInfo, NodeRole, RedisUri,
};
pub use config::Config;
pub use pipeline::{TaskKind, TaskOutcome, TaskRequest};
pub use slots::{ReshardError, ReshardTable, ReshardTableError, SlotMigrationError};
pub use supervisor::{SubmitError, Supervisor};
