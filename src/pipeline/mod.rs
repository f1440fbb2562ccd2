//! The task pipeline: a staged dataflow with one feedback edge.
//!
//! ```text
//! ingress ──▶ merge ──▶ classify ──┬─ add_master  ──▶ (feedback)
//!   feedback ──^                   ├─ add_replica
//!                                  ├─ remove_node ──▶ remove_replica | (feedback)
//!                                  ├─ reshard
//!                                  └─ unsupported ──▶ error reply
//! ```
//!
//! The feedback edge re-enters the classifier and is strictly preferred
//! over ingress. Every stage is one worker on a bounded channel; replies
//! leave through each task's own handle.

mod batch;
mod merge;
pub mod poorest;
mod stages;
pub mod task;
mod throttle;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use merge::PreferredMerge;
use stages::StageCtx;
pub use task::{ReplyHandle, Task, TaskKind, TaskOutcome, TaskRequest};

use crate::client::cluster_client::ClusterClient;
use crate::config::Config;

const INGRESS_BUFFER: usize = 64;
const FEEDBACK_BUFFER: usize = 16;
const STAGE_BUFFER: usize = 16;

pub(crate) struct Pipeline {
    pub ingress: mpsc::Sender<Task>,
    pub workers: Vec<JoinHandle<()>>,
}

/// Wire the stages together and spawn one worker per stage.
pub(crate) fn spawn<C: ClusterClient>(config: Arc<Config>, client: Arc<C>) -> Pipeline {
    let (ingress_tx, ingress_rx) = mpsc::channel(INGRESS_BUFFER);
    let (feedback_tx, feedback_rx) = mpsc::channel(FEEDBACK_BUFFER);

    let (add_master_tx, add_master_rx) = mpsc::channel(STAGE_BUFFER);
    let (add_replica_tx, add_replica_rx) = mpsc::channel(STAGE_BUFFER);
    let (remove_tx, remove_rx) = mpsc::channel(STAGE_BUFFER);
    let (remove_replica_tx, remove_replica_rx) = mpsc::channel(STAGE_BUFFER);
    let (reshard_tx, reshard_rx) = mpsc::channel(STAGE_BUFFER);

    let ctx = StageCtx {
        client,
        config,
        feedback: feedback_tx,
    };

    let merge = PreferredMerge::new(feedback_rx, ingress_rx);
    let classifier = tokio::spawn(run_classifier(
        merge,
        StageSenders {
            add_master: add_master_tx,
            add_replica: add_replica_tx,
            remove: remove_tx,
            reshard: reshard_tx,
        },
    ));

    let workers = vec![
        classifier,
        tokio::spawn(stages::run_add_master(add_master_rx, ctx.clone())),
        tokio::spawn(stages::run_add_replica(add_replica_rx, ctx.clone())),
        tokio::spawn(stages::run_remove_node(
            remove_rx,
            ctx.clone(),
            remove_replica_tx,
        )),
        tokio::spawn(stages::run_remove_replica(remove_replica_rx, ctx.clone())),
        tokio::spawn(stages::run_reshard(reshard_rx, ctx)),
    ];

    Pipeline {
        ingress: ingress_tx,
        workers,
    }
}

struct StageSenders {
    add_master: mpsc::Sender<Task>,
    add_replica: mpsc::Sender<Task>,
    remove: mpsc::Sender<Task>,
    reshard: mpsc::Sender<Task>,
}

/// Route each task to its stage; unknown operations are answered on the
/// spot. Ends once both inputs are closed and drained.
async fn run_classifier(mut merge: PreferredMerge<Task>, senders: StageSenders) {
    while let Some(mut task) = merge.recv().await {
        let sent = match task.kind() {
            TaskKind::AddMaster => senders.add_master.send(task).await.is_ok(),
            TaskKind::AddReplica => senders.add_replica.send(task).await.is_ok(),
            TaskKind::RemoveNode => senders.remove.send(task).await.is_ok(),
            TaskKind::Reshard => senders.reshard.send(task).await.is_ok(),
            TaskKind::Unsupported => {
                let message = format!("Unsupported operation {} for {}", task.op, task.target);
                warn!(op = %task.op, target = %task.target, "rejecting task");
                task.reply.notify(Err(message));
                true
            }
        };
        if !sent {
            return;
        }
    }
}
