//! Per-reshard connection cache.
//!
//! Built once when a reshard starts, read-only afterwards, dropped when
//! the reshard ends. Concurrent migration workers clone handles out of it
//! without further synchronization.

use std::collections::HashMap;

use crate::client::cluster_client::{ClientError, ClusterClient};
use crate::client::types::NodeInfo;

pub struct ConnectionCache<C: ClusterClient> {
    conns: HashMap<String, C::Node>,
}

impl<C: ClusterClient> ConnectionCache<C> {
    /// Open (or reuse) a connection for every given node.
    pub async fn build<'a>(
        client: &C,
        nodes: impl IntoIterator<Item = &'a NodeInfo>,
    ) -> Result<Self, ClientError> {
        let mut conns = HashMap::new();
        for node in nodes {
            let conn = client.connection(&node.id).await?;
            conns.insert(node.id.clone(), conn);
        }
        Ok(Self { conns })
    }

    pub fn get(&self, node_id: &str) -> Option<C::Node> {
        self.conns.get(node_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}
