//! Single-slot migration protocol.
//!
//! Mirrors what `redis-trib` does for one slot:
//! 1. `SETSLOT IMPORTING` on the destination, `SETSLOT MIGRATING` on the
//!    source, the pair retried until both land
//! 2. `COUNTKEYSINSLOT` + `GETKEYSINSLOT` on the source, then one
//!    `MIGRATE` moving all keys
//! 3. `SETSLOT NODE` on every live master so the whole cluster agrees on
//!    the new owner
//!
//! Key-movement failures are recovered per error class; see
//! [`classify_error`].

use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::cache::ConnectionCache;
use super::table::MigrationJob;
use crate::client::cluster_client::{ClientError, ClusterClient, NodeHandle};
use crate::client::types::NodeInfo;

/// Delay before retrying a failed IMPORTING/MIGRATING pair or a
/// CLUSTERDOWN re-issue.
const STEP_RETRY_DELAY: Duration = Duration::from_millis(100);

/// How a key-movement error is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Destination already holds a key: reissue `MIGRATE` with `REPLACE`.
    BusyKey,
    /// Cluster briefly unavailable: reacquire connections, reissue the step.
    ClusterDown,
    /// Keys already live on the destination: the slot is done.
    Moved,
    /// Anything else: non-fatal for this slot, the next reshard reconciles.
    Other,
}

/// Classify an error message. Matching is case-insensitive substring
/// search, in table order; the first hit wins.
pub fn classify_error(message: &str) -> ErrorClass {
    let table = [
        ("busykey", ErrorClass::BusyKey),
        ("clusterdown", ErrorClass::ClusterDown),
        ("moved", ErrorClass::Moved),
    ];
    for (marker, class) in table {
        let Ok(pattern) = Regex::new(&format!("(?i){marker}")) else {
            continue;
        };
        if pattern.is_match(message) {
            return class;
        }
    }
    ErrorClass::Other
}

/// Failures that abort a single slot migration.
///
/// Everything the classification table absorbs never becomes an error;
/// these are the unclassified cases the router reports upstream.
#[derive(Error, Debug)]
pub enum SlotMigrationError {
    #[error("slot {slot}: no cached connection for node {node}")]
    MissingConnection { slot: u16, node: String },

    #[error("slot {slot}: MIGRATE did not finish within {timeout:?}")]
    MigrateTimeout { slot: u16, timeout: Duration },

    #[error("slot {slot}: failed to notify {node} of its new owner: {source}")]
    Notify {
        slot: u16,
        node: String,
        source: ClientError,
    },
}

enum StepFailure {
    Client(ClientError),
    Timeout,
}

impl From<ClientError> for StepFailure {
    fn from(e: ClientError) -> Self {
        StepFailure::Client(e)
    }
}

struct Endpoints<N> {
    src: N,
    dst: N,
}

/// Executes slot migrations against one reshard's connection cache.
pub struct SlotMigrator<'a, C: ClusterClient> {
    cache: &'a ConnectionCache<C>,
    /// Live masters, source and destination included; all of them learn
    /// the new owner in the final step.
    masters: &'a [NodeInfo],
    migrate_timeout: Duration,
}

impl<'a, C: ClusterClient> SlotMigrator<'a, C> {
    pub fn new(
        cache: &'a ConnectionCache<C>,
        masters: &'a [NodeInfo],
        migrate_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            masters,
            migrate_timeout,
        }
    }

    /// Move one slot end-to-end.
    pub async fn migrate_slot(&self, job: &MigrationJob) -> Result<(), SlotMigrationError> {
        if job.source == job.dest {
            warn!(slot = job.slot, node = %job.source, "slot already owned by destination, skipping");
            return Ok(());
        }

        let mut ends = self.endpoints(job)?;

        // Mark the handoff on both ends. Nothing can proceed without this,
        // so keep retrying until the pair lands.
        loop {
            let marked = async {
                ends.dst.set_slot_importing(job.slot, &job.source).await?;
                ends.src.set_slot_migrating(job.slot, &job.dest).await
            }
            .await;
            match marked {
                Ok(()) => break,
                Err(e) => {
                    warn!(slot = job.slot, error = %e, "slot handoff marking failed, retrying");
                    tokio::time::sleep(STEP_RETRY_DELAY).await;
                }
            }
        }

        // Move the keys, recovering per error class.
        let mut replace = false;
        loop {
            match self.move_keys(&ends.src, job, replace).await {
                Ok(moved) => {
                    debug!(slot = job.slot, keys = moved, "keys moved");
                    break;
                }
                Err(StepFailure::Timeout) => {
                    return Err(SlotMigrationError::MigrateTimeout {
                        slot: job.slot,
                        timeout: self.migrate_timeout,
                    });
                }
                Err(StepFailure::Client(e)) => match classify_error(&e.to_string()) {
                    ErrorClass::BusyKey => {
                        warn!(slot = job.slot, error = %e, "destination keys busy, reissuing with REPLACE");
                        replace = true;
                    }
                    ErrorClass::ClusterDown => {
                        warn!(slot = job.slot, error = %e, "cluster down during key move, reacquiring connections");
                        ends = self.endpoints(job)?;
                        tokio::time::sleep(STEP_RETRY_DELAY).await;
                    }
                    ErrorClass::Moved => {
                        info!(slot = job.slot, "keys already served by destination");
                        return Ok(());
                    }
                    ErrorClass::Other => {
                        warn!(slot = job.slot, error = %e, "unrecognized migration error, leaving slot for the next pass");
                        return Ok(());
                    }
                },
            }
        }

        // Tell every master who owns the slot now.
        for master in self.masters {
            let conn = self.conn(job.slot, &master.id)?;
            conn.set_slot_node(job.slot, &job.dest)
                .await
                .map_err(|e| SlotMigrationError::Notify {
                    slot: job.slot,
                    node: master.id.clone(),
                    source: e,
                })?;
        }

        debug!(slot = job.slot, from = %job.source, to = %job.dest, "slot migration complete");
        Ok(())
    }

    /// Count, list, and `MIGRATE` the slot's keys in one call. Returns the
    /// number of keys moved.
    async fn move_keys(
        &self,
        src: &C::Node,
        job: &MigrationJob,
        replace: bool,
    ) -> Result<u64, StepFailure> {
        let count = src.count_keys_in_slot(job.slot).await?;
        if count == 0 {
            return Ok(0);
        }

        let keys = src.keys_in_slot(job.slot, count).await?;
        let migrate = src.migrate_keys(&job.dest_uri, &keys, replace);
        match tokio::time::timeout(self.migrate_timeout, migrate).await {
            Ok(Ok(())) => Ok(count),
            Ok(Err(e)) => Err(StepFailure::Client(e)),
            Err(_) => Err(StepFailure::Timeout),
        }
    }

    fn conn(&self, slot: u16, node_id: &str) -> Result<C::Node, SlotMigrationError> {
        self.cache
            .get(node_id)
            .ok_or_else(|| SlotMigrationError::MissingConnection {
                slot,
                node: node_id.to_string(),
            })
    }

    fn endpoints(&self, job: &MigrationJob) -> Result<Endpoints<C::Node>, SlotMigrationError> {
        Ok(Endpoints {
            src: self.conn(job.slot, &job.source)?,
            dst: self.conn(job.slot, &job.dest)?,
        })
    }
}
