//! Stage workers.
//!
//! Each stage is a single task draining a bounded channel, so elements of
//! one operation type are handled in arrival order, one at a time. The
//! add-master and remove-node stages push synthesized reshard tasks onto
//! the feedback edge instead of finishing the work themselves.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::batch::collect_batch;
use super::poorest::PoorestN;
use super::task::Task;
use super::throttle::Throttle;
use crate::client::cluster_client::{ClientError, ClusterClient, NodeHandle};
use crate::client::types::{NodeInfo, NodeRole, masters};
use crate::client::uri::{RedisUri, resolve_node};
use crate::config::Config;
use crate::slots::{ConnectionCache, ReshardError, ReshardTable, SlotMigrator, run_migrations};

/// Delay between attempts of the meet fan-out, which retries forever.
const MEET_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Delay before re-running a reshard whose table was rejected.
const TABLE_RETRY_DELAY: Duration = Duration::from_millis(500);
/// Poll interval while waiting for a new master to report a healthy cluster.
const CLUSTER_OK_POLL: Duration = Duration::from_millis(100);

/// Add-master processes one addition at a time.
const ADD_MASTER_BATCH_MAX: usize = 1;
/// Replica additions and removals batch up to this many per window.
const REPLICA_BATCH_MAX: usize = 100;
const REMOVE_BATCH_MAX: usize = 100;

/// Everything a stage worker needs.
pub(crate) struct StageCtx<C: ClusterClient> {
    pub client: Arc<C>,
    pub config: Arc<Config>,
    pub feedback: mpsc::Sender<Task>,
}

impl<C: ClusterClient> Clone for StageCtx<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            config: self.config.clone(),
            feedback: self.feedback.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// add master

pub(crate) async fn run_add_master<C: ClusterClient>(
    mut rx: mpsc::Receiver<Task>,
    ctx: StageCtx<C>,
) {
    loop {
        let batch = collect_batch(&mut rx, ADD_MASTER_BATCH_MAX, ctx.config.batch_period()).await;
        if batch.is_empty() {
            return;
        }
        for task in batch {
            if !handle_add_master(&ctx, task).await {
                return;
            }
        }
    }
}

/// Meet the new node, wait for topology to settle, then re-enter the
/// pipeline as a reshard toward it. Returns `false` once the feedback
/// edge is gone.
async fn handle_add_master<C: ClusterClient>(ctx: &StageCtx<C>, mut task: Task) -> bool {
    let uri = match RedisUri::parse(&task.target, ctx.config.default_port) {
        Ok(uri) => uri,
        Err(e) => {
            task.reply.notify(Err(e.to_string()));
            return true;
        }
    };

    info!(node = %uri, "adding master to cluster");
    meet_nodes(&*ctx.client, std::slice::from_ref(&uri)).await;
    tokio::time::sleep(ctx.config.refresh_timeout()).await;

    let Task { reply, .. } = task;
    ctx.feedback
        .send(Task::synthesized_reshard(uri, false, reply))
        .await
        .is_ok()
}

/// Every live node meets every new URI. The operator asked for the add,
/// so client errors are retried indefinitely.
async fn meet_nodes<C: ClusterClient>(client: &C, uris: &[RedisUri]) {
    loop {
        match try_meet(client, uris).await {
            Ok(()) => return,
            Err(e) => {
                warn!(error = %e, "cluster meet failed, retrying");
                tokio::time::sleep(MEET_RETRY_DELAY).await;
            }
        }
    }
}

async fn try_meet<C: ClusterClient>(client: &C, uris: &[RedisUri]) -> Result<(), ClientError> {
    let topology = client.topology().await?;
    for node in topology.iter().filter(|n| n.is_live()) {
        let conn = client.connection(&node.id).await?;
        for uri in uris {
            conn.cluster_meet(uri).await?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// add replica

pub(crate) async fn run_add_replica<C: ClusterClient>(
    mut rx: mpsc::Receiver<Task>,
    ctx: StageCtx<C>,
) {
    loop {
        let batch = collect_batch(&mut rx, REPLICA_BATCH_MAX, ctx.config.batch_period()).await;
        if batch.is_empty() {
            return;
        }
        handle_add_replicas(&ctx, batch).await;
    }
}

/// Meet the new nodes, then make each one a replica of the currently
/// poorest master. With more replicas than masters the poorest-N
/// selection is walked round-robin, so one batch spreads out instead of
/// piling onto a single master.
async fn handle_add_replicas<C: ClusterClient>(ctx: &StageCtx<C>, batch: Vec<Task>) {
    let mut pending: Vec<(Task, RedisUri)> = Vec::new();
    for mut task in batch {
        match RedisUri::parse(&task.target, ctx.config.default_port) {
            Ok(uri) => pending.push((task, uri)),
            Err(e) => task.reply.notify(Err(e.to_string())),
        }
    }
    if pending.is_empty() {
        return;
    }

    let uris: Vec<RedisUri> = pending.iter().map(|(_, uri)| uri.clone()).collect();
    info!(count = uris.len(), "adding replicas to cluster");
    meet_nodes(&*ctx.client, &uris).await;
    tokio::time::sleep(ctx.config.refresh_timeout()).await;

    let topology = match ctx.client.topology().await {
        Ok(topology) => topology,
        Err(e) => {
            return fail_all(pending.into_iter().map(|(task, _)| task), &e.to_string());
        }
    };

    // Resolve the new nodes against the settled topology; targets that
    // never joined are answered here.
    let mut joined: Vec<(Task, RedisUri, NodeInfo)> = Vec::new();
    for (mut task, uri) in pending {
        match resolve_node(&uri, &topology).await {
            Some(node) => joined.push((task, uri, node.clone())),
            None => task
                .reply
                .notify(Err(format!("node {uri} is not part of the cluster"))),
        }
    }
    if joined.is_empty() {
        return;
    }

    // Freshly-met nodes report as empty masters; they are not candidates
    // for holding the very replicas being added. Matching is by resolved
    // node id, so a DNS-named target excludes its announced address too.
    let new_ids: HashSet<String> = joined.iter().map(|(_, _, node)| node.id.clone()).collect();
    let live_masters: Vec<&NodeInfo> = masters(&topology)
        .into_iter()
        .filter(|m| m.is_live() && !new_ids.contains(&m.id))
        .collect();
    if live_masters.is_empty() {
        return fail_all(
            joined.into_iter().map(|(task, _, _)| task),
            "cluster has no live masters",
        );
    }

    // Rank masters by how many replicas they already have.
    let mut counts: HashMap<&str, usize> = live_masters
        .iter()
        .map(|m| (m.id.as_str(), 0usize))
        .collect();
    for node in &topology {
        if node.is_replica()
            && let Some(master_id) = &node.master_id
            && let Some(count) = counts.get_mut(master_id.as_str())
        {
            *count += 1;
        }
    }
    let mut poorest = PoorestN::new(joined.len().min(live_masters.len()));
    for master in &live_masters {
        poorest.offer(
            master.id.clone(),
            counts.get(master.id.as_str()).copied().unwrap_or(0),
        );
    }
    let ranked = poorest.into_sorted();

    let mut assigned: Vec<(Task, String)> = Vec::new();
    for (index, (mut task, uri, node)) in joined.into_iter().enumerate() {
        let Some((master_id, _)) = ranked.get(index % ranked.len()) else {
            task.reply
                .notify(Err("no master available for replica".to_string()));
            continue;
        };

        let replicate = async {
            let conn = ctx.client.connection(&node.id).await?;
            conn.cluster_replicate(master_id).await
        }
        .await;
        match replicate {
            Ok(()) => {
                info!(replica = %node.id, master = %master_id, "replica assigned");
                assigned.push((task, uri.host.clone()));
            }
            Err(e) => task.reply.notify(Err(e.to_string())),
        }
    }

    tokio::time::sleep(ctx.config.refresh_timeout()).await;
    for (mut task, host) in assigned {
        task.reply.notify(Ok((NodeRole::Replica, host)));
    }
}

fn fail_all(tasks: impl IntoIterator<Item = Task>, message: &str) {
    for mut task in tasks {
        task.reply.notify(Err(message.to_string()));
    }
}

// ---------------------------------------------------------------------------
// remove node

/// Classify removals: masters must drain their slots first and re-enter
/// as a reshard, replicas go straight to the remove-replica stage.
pub(crate) async fn run_remove_node<C: ClusterClient>(
    mut rx: mpsc::Receiver<Task>,
    ctx: StageCtx<C>,
    remove_replica_tx: mpsc::Sender<Task>,
) {
    while let Some(mut task) = rx.recv().await {
        let uri = match RedisUri::parse(&task.target, ctx.config.default_port) {
            Ok(uri) => uri,
            Err(e) => {
                task.reply.notify(Err(e.to_string()));
                continue;
            }
        };

        let topology = match ctx.client.topology().await {
            Ok(topology) => topology,
            Err(e) => {
                task.reply.notify(Err(e.to_string()));
                continue;
            }
        };

        match resolve_node(&uri, &topology).await {
            Some(node) if node.is_master() => {
                info!(node = %node.id, "removing master, draining slots first");
                let Task { reply, .. } = task;
                let drain = Task::synthesized_reshard(node.uri.clone(), true, reply);
                if ctx.feedback.send(drain).await.is_err() {
                    return;
                }
            }
            Some(node) if node.is_replica() => {
                debug!(node = %node.id, "removing replica");
                if remove_replica_tx.send(task).await.is_err() {
                    return;
                }
            }
            Some(node) => {
                warn!(node = %node.id, op = %task.op, "node has no removable role, rejecting task");
                task.reply.notify(Err(format!(
                    "Unsupported operation {} for {}",
                    task.op, task.target
                )));
            }
            None => {
                task.reply
                    .notify(Err(format!("node {uri} is not part of the cluster")));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// remove replica

pub(crate) async fn run_remove_replica<C: ClusterClient>(
    mut rx: mpsc::Receiver<Task>,
    ctx: StageCtx<C>,
) {
    loop {
        let batch = collect_batch(&mut rx, REMOVE_BATCH_MAX, ctx.config.batch_period()).await;
        if batch.is_empty() {
            return;
        }
        handle_remove_replicas(&ctx, batch).await;
    }
}

/// Reset every removed replica first, then have each remaining node
/// forget all of them. A node is never asked to forget itself, and no
/// forget is issued before the replica's reset.
async fn handle_remove_replicas<C: ClusterClient>(ctx: &StageCtx<C>, batch: Vec<Task>) {
    let topology = match ctx.client.topology().await {
        Ok(topology) => topology,
        Err(e) => {
            for mut task in batch {
                task.reply.notify(Err(e.to_string()));
            }
            return;
        }
    };

    let mut resolved: Vec<(Task, NodeInfo, String)> = Vec::new();
    for mut task in batch {
        let uri = match RedisUri::parse(&task.target, ctx.config.default_port) {
            Ok(uri) => uri,
            Err(e) => {
                task.reply.notify(Err(e.to_string()));
                continue;
            }
        };
        match resolve_node(&uri, &topology).await {
            Some(node) => resolved.push((task, node.clone(), uri.host)),
            None => task
                .reply
                .notify(Err(format!("node {uri} is not part of the cluster"))),
        }
    }
    if resolved.is_empty() {
        return;
    }

    let mut reset: Vec<(Task, NodeInfo, String)> = Vec::new();
    for (mut task, node, host) in resolved {
        let result = async {
            let conn = ctx.client.connection(&node.id).await?;
            conn.cluster_reset_hard().await
        }
        .await;
        match result {
            Ok(()) => reset.push((task, node, host)),
            Err(e) => task.reply.notify(Err(e.to_string())),
        }
    }
    if reset.is_empty() {
        return;
    }

    let removed_ids: HashSet<String> = reset.iter().map(|(_, node, _)| node.id.clone()).collect();
    info!(count = removed_ids.len(), "forgetting removed replicas");

    let mut failed_ids: HashSet<String> = HashSet::new();
    for node in topology
        .iter()
        .filter(|n| n.is_live() && !removed_ids.contains(&n.id))
    {
        let conn = match ctx.client.connection(&node.id).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(node = %node.id, error = %e, "cannot reach node for forget fan-out");
                failed_ids.extend(removed_ids.iter().cloned());
                continue;
            }
        };
        for id in &removed_ids {
            if let Err(e) = conn.cluster_forget(id).await {
                warn!(node = %node.id, forget = %id, error = %e, "forget failed");
                failed_ids.insert(id.clone());
            }
        }
    }

    tokio::time::sleep(ctx.config.refresh_timeout()).await;
    match ctx.client.topology().await {
        Ok(topology) => info!(nodes = topology.len(), "topology after replica removal"),
        Err(e) => warn!(error = %e, "topology read after removal failed"),
    }

    for (mut task, node, host) in reset {
        if failed_ids.contains(&node.id) {
            task.reply
                .notify(Err(format!("failed to forget node {}", node.id)));
        } else {
            task.reply.notify(Ok((NodeRole::Replica, host)));
        }
    }
}

// ---------------------------------------------------------------------------
// reshard

pub(crate) async fn run_reshard<C: ClusterClient>(mut rx: mpsc::Receiver<Task>, ctx: StageCtx<C>) {
    let mut throttle = Throttle::new(ctx.config.reshard_interval());
    while let Some(mut task) = rx.recv().await {
        throttle.acquire().await;

        let result = if task.drain {
            drain_reshard(&ctx, &task).await
        } else {
            expand_reshard(&ctx, &task).await
        };
        match result {
            Ok(host) => task.reply.notify(Ok((NodeRole::Master, host))),
            Err(e) => task.reply.notify(Err(e.to_string())),
        }
    }
}

fn reshard_target_uri<C: ClusterClient>(
    ctx: &StageCtx<C>,
    task: &Task,
) -> Result<RedisUri, ReshardError> {
    match &task.new_master_uri {
        Some(uri) => Ok(uri.clone()),
        None => RedisUri::parse(&task.target, ctx.config.default_port)
            .map_err(|e| ReshardError::Client(e.into())),
    }
}

/// Rebalance slot ownership toward the target master. A rejected table
/// retries the whole reshard against a fresh topology snapshot.
async fn expand_reshard<C: ClusterClient>(
    ctx: &StageCtx<C>,
    task: &Task,
) -> Result<String, ReshardError> {
    let uri = reshard_target_uri(ctx, task)?;

    loop {
        let topology = ctx.client.topology().await?;
        let Some(target) = resolve_node(&uri, &topology).await else {
            return Err(ReshardError::NodeNotInCluster(uri.to_string()));
        };

        let mut participants: Vec<NodeInfo> = masters(&topology)
            .into_iter()
            .filter(|m| m.is_live())
            .cloned()
            .collect();
        if !participants.iter().any(|m| m.id == target.id) {
            participants.push(target.clone());
        }
        let sources: Vec<&NodeInfo> = participants.iter().filter(|m| m.id != target.id).collect();

        let cache = ConnectionCache::build(&*ctx.client, participants.iter()).await?;
        let Some(target_conn) = cache.get(&target.id) else {
            return Err(ReshardError::NodeNotInCluster(target.id.clone()));
        };
        wait_cluster_ok(&target_conn, &target.id).await;

        let table = match ReshardTable::expand(&sources, &target.id) {
            Ok(table) => table,
            Err(e) => {
                warn!(error = %e, "reshard table rejected, retrying");
                tokio::time::sleep(TABLE_RETRY_DELAY).await;
                continue;
            }
        };

        let jobs = table.jobs(&topology);
        info!(slots = jobs.len(), target = %target.id, "starting reshard");
        let migrator = SlotMigrator::new(&cache, &participants, ctx.config.migrate_slot_timeout());
        let moved = run_migrations(jobs, ctx.config.reshard_timeout(), |job| {
            let migrator = &migrator;
            async move { migrator.migrate_slot(&job).await }
        })
        .await?;

        info!(moved, target = %target.id, "reshard complete");
        return Ok(uri.host.clone());
    }
}

/// Evacuate a departing master, then reset it and drop it from every
/// remaining member's view.
async fn drain_reshard<C: ClusterClient>(
    ctx: &StageCtx<C>,
    task: &Task,
) -> Result<String, ReshardError> {
    let uri = reshard_target_uri(ctx, task)?;

    let topology = ctx.client.topology().await?;
    let Some(departing) = resolve_node(&uri, &topology).await else {
        return Err(ReshardError::NodeNotInCluster(uri.to_string()));
    };
    let departing = departing.clone();

    let mut participants: Vec<NodeInfo> = masters(&topology)
        .into_iter()
        .filter(|m| m.is_live())
        .cloned()
        .collect();
    if !participants.iter().any(|m| m.id == departing.id) {
        participants.push(departing.clone());
    }
    let remaining: Vec<&NodeInfo> = participants.iter().filter(|m| m.id != departing.id).collect();

    let table = ReshardTable::drain(&departing, &remaining)?;
    let cache = ConnectionCache::build(&*ctx.client, participants.iter()).await?;

    let jobs = table.jobs(&topology);
    info!(slots = jobs.len(), node = %departing.id, "draining master before removal");
    let migrator = SlotMigrator::new(&cache, &participants, ctx.config.migrate_slot_timeout());
    run_migrations(jobs, ctx.config.reshard_timeout(), |job| {
        let migrator = &migrator;
        async move { migrator.migrate_slot(&job).await }
    })
    .await?;

    // The node owns nothing now: reset it, then drop it everywhere.
    let conn = ctx.client.connection(&departing.id).await?;
    conn.cluster_reset_hard().await?;
    for node in topology
        .iter()
        .filter(|n| n.is_live() && n.id != departing.id)
    {
        let conn = ctx.client.connection(&node.id).await?;
        conn.cluster_forget(&departing.id).await?;
    }

    tokio::time::sleep(ctx.config.refresh_timeout()).await;
    match ctx.client.topology().await {
        Ok(topology) => info!(nodes = topology.len(), "topology after master removal"),
        Err(e) => warn!(error = %e, "topology read after removal failed"),
    }
    Ok(uri.host.clone())
}

/// Poll `CLUSTER INFO` until the node reports a healthy cluster.
async fn wait_cluster_ok<N: NodeHandle>(conn: &N, node_id: &str) {
    loop {
        match conn.cluster_info().await {
            Ok(info) if info.get("cluster_state").is_some_and(|s| s == "ok") => return,
            Ok(info) => {
                debug!(
                    node = %node_id,
                    state = info.get("cluster_state").map(String::as_str).unwrap_or("unknown"),
                    "cluster state not ok yet"
                );
            }
            Err(e) => warn!(node = %node_id, error = %e, "cluster info poll failed"),
        }
        tokio::time::sleep(CLUSTER_OK_POLL).await;
    }
}
