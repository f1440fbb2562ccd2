//! Supervisor: wires the pipeline and exposes the submission entry point.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::info;

use crate::client::cluster_client::ClusterClient;
use crate::config::Config;
use crate::pipeline::{self, ReplyHandle, Task, TaskOutcome, TaskRequest};

/// Time given to in-flight work before workers are torn down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("pipeline is shut down")]
    Closed,
}

/// Owns the pipeline workers and the ingress side of the task flow.
///
/// [`submit`](Supervisor::submit) acknowledges synchronously, meaning
/// "accepted for processing"; the terminal outcome arrives on the
/// returned receiver once the task has worked its way through.
pub struct Supervisor {
    ingress: tokio::sync::mpsc::Sender<Task>,
    workers: Vec<JoinHandle<()>>,
}

impl Supervisor {
    /// Spawn the pipeline against a cluster client.
    pub fn start<C: ClusterClient>(config: Config, client: Arc<C>) -> Self {
        let pipeline = pipeline::spawn(Arc::new(config), client);
        info!("task pipeline started");
        Self {
            ingress: pipeline.ingress,
            workers: pipeline.workers,
        }
    }

    /// Enqueue a task. Backpressure from a full pipeline is exerted here;
    /// the send completes once the task is accepted.
    pub async fn submit(
        &self,
        op: impl Into<String>,
        target: impl Into<String>,
    ) -> Result<oneshot::Receiver<TaskOutcome>, SubmitError> {
        self.submit_request(TaskRequest {
            op: op.into(),
            target: target.into(),
        })
        .await
    }

    /// [`submit`](Supervisor::submit) for an already-parsed ingress payload.
    pub async fn submit_request(
        &self,
        request: TaskRequest,
    ) -> Result<oneshot::Receiver<TaskOutcome>, SubmitError> {
        let (reply, rx) = ReplyHandle::channel();
        let task = Task::from_request(request, reply);
        self.ingress
            .send(task)
            .await
            .map_err(|_| SubmitError::Closed)?;
        Ok(rx)
    }

    /// Stop accepting tasks, give in-flight work a grace period, then
    /// tear the workers down.
    pub async fn shutdown(self) {
        info!("shutting down task pipeline");
        drop(self.ingress);

        let mut workers = self.workers;
        let drained = tokio::time::timeout(
            SHUTDOWN_GRACE,
            futures::future::join_all(workers.iter_mut()),
        )
        .await;
        if drained.is_err() {
            for worker in &workers {
                worker.abort();
            }
        }
        info!("task pipeline stopped");
    }
}
