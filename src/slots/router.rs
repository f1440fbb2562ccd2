//! Migration fan-out.
//!
//! Drives one migration future per slot with a fixed concurrency cap and
//! answers with a single result once every per-slot future has settled.

use std::future::Future;
use std::time::Duration;

use futures::{StreamExt, stream};
use thiserror::Error;
use tracing::{error, info};

use super::migrator::SlotMigrationError;
use super::table::{MigrationJob, ReshardTableError};
use crate::client::cluster_client::ClientError;

/// Concurrent slot migrations per reshard.
pub const MIGRATION_PARALLELISM: usize = 5;

/// Failures of a whole reshard.
#[derive(Error, Debug)]
pub enum ReshardError {
    #[error("reshard did not finish within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Migration(#[from] SlotMigrationError),

    #[error(transparent)]
    Table(#[from] ReshardTableError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("node {0} is not part of the cluster")]
    NodeNotInCluster(String),
}

/// Run every job through `migrate`, at most [`MIGRATION_PARALLELISM`] at a
/// time, bounded by `timeout` as a whole.
///
/// All futures settle before a verdict: the first unclassified per-slot
/// failure is reported, successes are counted and returned.
pub async fn run_migrations<F, Fut>(
    jobs: Vec<MigrationJob>,
    timeout: Duration,
    migrate: F,
) -> Result<usize, ReshardError>
where
    F: Fn(MigrationJob) -> Fut,
    Fut: Future<Output = Result<(), SlotMigrationError>>,
{
    let total = jobs.len();
    if total == 0 {
        return Ok(0);
    }

    let run = async {
        let results: Vec<Result<(), SlotMigrationError>> = stream::iter(jobs)
            .map(|job| migrate(job))
            .buffer_unordered(MIGRATION_PARALLELISM)
            .collect()
            .await;

        if let Some(first) = results.into_iter().find_map(Result::err) {
            return Err(ReshardError::Migration(first));
        }
        Ok(total)
    };

    match tokio::time::timeout(timeout, run).await {
        Ok(Ok(moved)) => {
            info!(slots = moved, "all slot migrations settled");
            Ok(moved)
        }
        Ok(Err(e)) => {
            error!(error = %e, "slot migration failed");
            Err(e)
        }
        Err(_) => {
            error!(timeout = ?timeout, "reshard timed out");
            Err(ReshardError::Timeout(timeout))
        }
    }
}
