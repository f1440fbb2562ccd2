//! Scripted in-memory cluster for driving the pipeline in tests.
//!
//! The mock keeps one shared state: node membership, per-node slot
//! ownership, per-slot keys, and a global command log the assertions read
//! back. `MIGRATE` outcomes can be scripted to fail with chosen error
//! messages, and slot ownership can be deferred to appear only after the
//! n-th topology read.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use slotpilot::client::types::{NodeFlags, NodeInfo, SlotRange};
use slotpilot::client::{ClientError, ClusterClient, NodeHandle, RedisUri};

/// Everything the mock cluster executed, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cmd {
    Meet { on: String, uri: String },
    Forget { on: String, node: String },
    ResetHard { on: String },
    Replicate { on: String, master: String },
    SetSlotImporting { on: String, slot: u16, from: String },
    SetSlotMigrating { on: String, slot: u16, to: String },
    SetSlotNode { on: String, slot: u16, owner: String },
    Migrate { on: String, dest: String, keys: Vec<String>, replace: bool },
}

#[derive(Debug, Clone)]
struct MockNodeState {
    id: String,
    uri: RedisUri,
    master: bool,
    master_id: Option<String>,
    joined: bool,
    slots: BTreeSet<u16>,
    keys: HashMap<u16, Vec<String>>,
}

#[derive(Debug, Default)]
struct MockState {
    nodes: Vec<MockNodeState>,
    log: Vec<Cmd>,
    topology_reads: usize,
    /// Queue of scripted MIGRATE failures; empty queue means success.
    migrate_errors: VecDeque<String>,
    /// (node id, visible after this many topology reads, slots)
    deferred_slots: Vec<(String, usize, Vec<u16>)>,
    cluster_state: String,
}

/// Shared handle to the scripted cluster.
#[derive(Clone)]
pub struct MockCluster {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCluster {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                cluster_state: "ok".to_string(),
                ..MockState::default()
            })),
        }
    }

    pub fn add_master(&self, id: &str, host: &str, slots: impl IntoIterator<Item = u16>) {
        self.push_node(MockNodeState {
            id: id.to_string(),
            uri: RedisUri::new(host, 6379),
            master: true,
            master_id: None,
            joined: true,
            slots: slots.into_iter().collect(),
            keys: HashMap::new(),
        });
    }

    pub fn add_replica(&self, id: &str, host: &str, master_id: &str) {
        self.push_node(MockNodeState {
            id: id.to_string(),
            uri: RedisUri::new(host, 6379),
            master: false,
            master_id: Some(master_id.to_string()),
            joined: true,
            slots: BTreeSet::new(),
            keys: HashMap::new(),
        });
    }

    /// A node that exists but has not been met yet; it only shows up in
    /// topology once some member runs `CLUSTER MEET` for its address.
    pub fn add_unjoined_master(&self, id: &str, host: &str) {
        self.push_node(MockNodeState {
            id: id.to_string(),
            uri: RedisUri::new(host, 6379),
            master: true,
            master_id: None,
            joined: false,
            slots: BTreeSet::new(),
            keys: HashMap::new(),
        });
    }

    pub fn put_keys(&self, node_id: &str, slot: u16, keys: &[&str]) {
        let mut state = self.lock();
        if let Some(node) = state.nodes.iter_mut().find(|n| n.id == node_id) {
            node.keys
                .insert(slot, keys.iter().map(|k| k.to_string()).collect());
        }
    }

    /// Queue an error for the next `MIGRATE` call.
    pub fn script_migrate_error(&self, message: &str) {
        self.lock().migrate_errors.push_back(message.to_string());
    }

    /// Give `node_id` these slots, but only once `after_reads` topology
    /// reads have happened.
    pub fn defer_slots(&self, node_id: &str, after_reads: usize, slots: impl IntoIterator<Item = u16>) {
        self.lock()
            .deferred_slots
            .push((node_id.to_string(), after_reads, slots.into_iter().collect()));
    }

    pub fn log(&self) -> Vec<Cmd> {
        self.lock().log.clone()
    }

    pub fn topology_reads(&self) -> usize {
        self.lock().topology_reads
    }

    pub fn slots_of(&self, node_id: &str) -> Vec<u16> {
        self.lock()
            .nodes
            .iter()
            .find(|n| n.id == node_id)
            .map(|n| n.slots.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_joined(&self, node_id: &str) -> bool {
        self.lock()
            .nodes
            .iter()
            .find(|n| n.id == node_id)
            .is_some_and(|n| n.joined)
    }

    pub fn master_of(&self, node_id: &str) -> Option<String> {
        self.lock()
            .nodes
            .iter()
            .find(|n| n.id == node_id)
            .and_then(|n| n.master_id.clone())
    }

    fn push_node(&self, node: MockNodeState) {
        self.lock().nodes.push(node);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }
}

fn ranges(slots: &BTreeSet<u16>) -> Vec<SlotRange> {
    let mut out: Vec<SlotRange> = Vec::new();
    for &slot in slots {
        match out.last_mut() {
            Some(last) if last.end + 1 == slot => last.end = slot,
            _ => out.push(SlotRange::single(slot)),
        }
    }
    out
}

fn node_info(node: &MockNodeState) -> NodeInfo {
    NodeInfo {
        id: node.id.clone(),
        uri: node.uri.clone(),
        flags: NodeFlags {
            master: node.master,
            slave: !node.master,
            ..NodeFlags::default()
        },
        master_id: node.master_id.clone(),
        link_state: "connected".to_string(),
        slots: ranges(&node.slots),
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    type Node = MockNode;

    async fn topology(&self) -> Result<Vec<NodeInfo>, ClientError> {
        let mut state = self.lock();
        state.topology_reads += 1;

        let reads = state.topology_reads;
        let due: Vec<(String, Vec<u16>)> = state
            .deferred_slots
            .iter()
            .filter(|(_, after, _)| reads > *after)
            .map(|(id, _, slots)| (id.clone(), slots.clone()))
            .collect();
        state.deferred_slots.retain(|(_, after, _)| reads <= *after);
        for (id, slots) in due {
            if let Some(node) = state.nodes.iter_mut().find(|n| n.id == id) {
                node.slots.extend(slots);
            }
        }

        Ok(state
            .nodes
            .iter()
            .filter(|n| n.joined)
            .map(node_info)
            .collect())
    }

    async fn connection(&self, node_id: &str) -> Result<Self::Node, ClientError> {
        let state = self.lock();
        if !state.nodes.iter().any(|n| n.id == node_id) {
            return Err(ClientError::UnknownNode(node_id.to_string()));
        }
        Ok(MockNode {
            id: node_id.to_string(),
            state: self.state.clone(),
        })
    }
}

/// Connection handle to one mock node.
#[derive(Clone)]
pub struct MockNode {
    id: String,
    state: Arc<Mutex<MockState>>,
}

impl MockNode {
    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }
}

#[async_trait]
impl NodeHandle for MockNode {
    async fn cluster_meet(&self, uri: &RedisUri) -> Result<(), ClientError> {
        let mut state = self.lock();
        state.log.push(Cmd::Meet {
            on: self.id.clone(),
            uri: uri.to_string(),
        });
        if let Some(node) = state.nodes.iter_mut().find(|n| n.uri == *uri) {
            node.joined = true;
        }
        Ok(())
    }

    async fn cluster_forget(&self, node_id: &str) -> Result<(), ClientError> {
        let mut state = self.lock();
        state.log.push(Cmd::Forget {
            on: self.id.clone(),
            node: node_id.to_string(),
        });
        if let Some(node) = state.nodes.iter_mut().find(|n| n.id == node_id) {
            node.joined = false;
        }
        Ok(())
    }

    async fn cluster_reset_hard(&self) -> Result<(), ClientError> {
        let mut state = self.lock();
        state.log.push(Cmd::ResetHard {
            on: self.id.clone(),
        });
        if let Some(node) = state.nodes.iter_mut().find(|n| n.id == self.id) {
            node.slots.clear();
            node.keys.clear();
            node.master_id = None;
        }
        Ok(())
    }

    async fn cluster_replicate(&self, master_id: &str) -> Result<(), ClientError> {
        let mut state = self.lock();
        state.log.push(Cmd::Replicate {
            on: self.id.clone(),
            master: master_id.to_string(),
        });
        if let Some(node) = state.nodes.iter_mut().find(|n| n.id == self.id) {
            node.master = false;
            node.master_id = Some(master_id.to_string());
        }
        Ok(())
    }

    async fn set_slot_importing(&self, slot: u16, source_id: &str) -> Result<(), ClientError> {
        self.lock().log.push(Cmd::SetSlotImporting {
            on: self.id.clone(),
            slot,
            from: source_id.to_string(),
        });
        Ok(())
    }

    async fn set_slot_migrating(&self, slot: u16, dest_id: &str) -> Result<(), ClientError> {
        self.lock().log.push(Cmd::SetSlotMigrating {
            on: self.id.clone(),
            slot,
            to: dest_id.to_string(),
        });
        Ok(())
    }

    async fn set_slot_node(&self, slot: u16, owner_id: &str) -> Result<(), ClientError> {
        let mut state = self.lock();
        state.log.push(Cmd::SetSlotNode {
            on: self.id.clone(),
            slot,
            owner: owner_id.to_string(),
        });
        for node in state.nodes.iter_mut() {
            if node.id == owner_id {
                node.slots.insert(slot);
            } else {
                node.slots.remove(&slot);
            }
        }
        Ok(())
    }

    async fn count_keys_in_slot(&self, slot: u16) -> Result<u64, ClientError> {
        let state = self.lock();
        Ok(state
            .nodes
            .iter()
            .find(|n| n.id == self.id)
            .and_then(|n| n.keys.get(&slot))
            .map(|keys| keys.len() as u64)
            .unwrap_or(0))
    }

    async fn keys_in_slot(&self, slot: u16, count: u64) -> Result<Vec<String>, ClientError> {
        let state = self.lock();
        Ok(state
            .nodes
            .iter()
            .find(|n| n.id == self.id)
            .and_then(|n| n.keys.get(&slot))
            .map(|keys| keys.iter().take(count as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn migrate_keys(
        &self,
        dest: &RedisUri,
        keys: &[String],
        replace: bool,
    ) -> Result<(), ClientError> {
        let mut state = self.lock();
        state.log.push(Cmd::Migrate {
            on: self.id.clone(),
            dest: dest.to_string(),
            keys: keys.to_vec(),
            replace,
        });

        if let Some(message) = state.migrate_errors.pop_front() {
            return Err(ClientError::Command(message));
        }

        // Keys leave the source; the mock does not track them on the
        // destination, ownership assertions go through slot state.
        let key_set: Vec<String> = keys.to_vec();
        if let Some(node) = state.nodes.iter_mut().find(|n| n.id == self.id) {
            for slot_keys in node.keys.values_mut() {
                slot_keys.retain(|k| !key_set.contains(k));
            }
        }
        Ok(())
    }

    async fn cluster_info(&self) -> Result<HashMap<String, String>, ClientError> {
        let state = self.lock();
        let mut map = HashMap::new();
        map.insert("cluster_state".to_string(), state.cluster_state.clone());
        map.insert(
            "cluster_known_nodes".to_string(),
            state.nodes.iter().filter(|n| n.joined).count().to_string(),
        );
        Ok(map)
    }
}
