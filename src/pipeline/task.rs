//! Task model: what flows through the pipeline.
//!
//! Ingress hands in a [`TaskRequest`]; the pipeline moves [`Task`] values
//! by value, each consumed exactly once by one stage. Synthesized reshard
//! tasks (the feedback edge) carry the resolved node address instead of a
//! raw target string.

use serde::Deserialize;
use tokio::sync::oneshot;

use crate::client::types::NodeRole;
use crate::client::uri::RedisUri;

/// Wire schema produced by both ingress sources.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskRequest {
    pub op: String,
    pub target: String,
}

/// The operations the classifier recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    AddMaster,
    AddReplica,
    RemoveNode,
    Reshard,
    Unsupported,
}

impl TaskKind {
    /// Total over all inputs: trim, lowercase, match.
    pub fn classify(op: &str) -> Self {
        match op.trim().to_lowercase().as_str() {
            "add_master" => TaskKind::AddMaster,
            "add_replica" => TaskKind::AddReplica,
            "remove_node" => TaskKind::RemoveNode,
            "reshard" => TaskKind::Reshard,
            _ => TaskKind::Unsupported,
        }
    }
}

/// Terminal answer delivered on the reply handle: the role and host that
/// were acted on, or a human-readable failure.
pub type TaskOutcome = Result<(NodeRole, String), String>;

/// At-most-once notifier for a task's terminal outcome.
///
/// Detached handles swallow the notification; a dropped receiver is not
/// an error either, the caller just stopped listening.
#[derive(Debug)]
pub struct ReplyHandle {
    tx: Option<oneshot::Sender<TaskOutcome>>,
}

impl ReplyHandle {
    pub fn channel() -> (Self, oneshot::Receiver<TaskOutcome>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn notify(&mut self, outcome: TaskOutcome) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(outcome);
        }
    }
}

/// One unit of work moving through the pipeline.
#[derive(Debug)]
pub struct Task {
    pub op: String,
    pub target: String,
    pub reply: ReplyHandle,
    /// Set only on synthesized reshard tasks: the canonical address of the
    /// node the reshard revolves around.
    pub new_master_uri: Option<RedisUri>,
    /// Synthesized reshard that evacuates the node instead of filling it.
    pub drain: bool,
}

impl Task {
    pub fn from_request(request: TaskRequest, reply: ReplyHandle) -> Self {
        Self {
            op: request.op,
            target: request.target,
            reply,
            new_master_uri: None,
            drain: false,
        }
    }

    pub fn kind(&self) -> TaskKind {
        TaskKind::classify(&self.op)
    }

    /// Build the feedback-edge task an add-master or remove-master emits.
    pub(crate) fn synthesized_reshard(uri: RedisUri, drain: bool, reply: ReplyHandle) -> Self {
        Self {
            op: "reshard".to_string(),
            target: uri.to_string(),
            reply,
            new_master_uri: Some(uri),
            drain,
        }
    }
}
