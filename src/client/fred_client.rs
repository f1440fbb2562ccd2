//! `fred`-backed [`ClusterClient`] implementation.
//!
//! One clustered seed client serves topology reads; each node gets its own
//! centralized connection, created on first use and cached by node id.
//! fred's typed `CLUSTER SETSLOT` builders do not carry the node-id
//! operand the migration protocol needs, so those commands and `MIGRATE`
//! go through the custom-command escape hatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fred::prelude::*;
use fred::types::cluster::ClusterResetFlag;
use fred::types::config::ClusterDiscoveryPolicy;
use fred::types::{ClusterHash, CustomCommand, Value};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::cluster_client::{ClientError, ClusterClient, NodeHandle};
use super::types::{NodeInfo, parse_cluster_nodes, parse_info_map};
use super::uri::RedisUri;
use crate::config::Config;

/// Production cluster client over `fred`.
pub struct FredClusterClient {
    seed: Client,
    command_timeout: Duration,
    migrate_timeout: Duration,
    /// node id -> announced address, refreshed on every topology read.
    addrs: Mutex<HashMap<String, RedisUri>>,
    /// node id -> cached connection.
    pool: Arc<Mutex<HashMap<String, FredNode>>>,
}

impl FredClusterClient {
    /// Connect to the cluster through the configured seed servers.
    #[instrument(skip(config), fields(seeds = config.seed_servers.len()))]
    pub async fn connect(config: &Config) -> Result<Self, ClientError> {
        if config.seed_servers.is_empty() {
            return Err(ClientError::Connection("no seed servers configured".into()));
        }

        let mut servers = Vec::with_capacity(config.seed_servers.len());
        for seed in &config.seed_servers {
            let uri = RedisUri::parse(seed, config.default_port)?;
            servers.push(Server::new(uri.host, uri.port));
        }

        let fred_config = fred::types::config::Config {
            server: fred::types::config::ServerConfig::Clustered {
                hosts: servers,
                policy: ClusterDiscoveryPolicy::ConfigEndpoint,
            },
            ..Default::default()
        };

        let refresh_interval = config.topology_refresh_interval();
        let seed = Builder::from_config(fred_config)
            .with_connection_config(|conn| {
                conn.cluster_cache_update_delay = refresh_interval;
            })
            .build()?;

        debug!("connecting seed client");
        seed.init().await?;
        debug!("seed client connected");

        Ok(Self {
            seed,
            command_timeout: Duration::from_secs(30),
            migrate_timeout: Duration::from_secs(config.migrate_slot_timeout_secs),
            addrs: Mutex::new(HashMap::new()),
            pool: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    async fn connect_node(&self, uri: &RedisUri) -> Result<FredNode, ClientError> {
        let fred_config = fred::types::config::Config {
            server: fred::types::config::ServerConfig::Centralized {
                server: Server::new(uri.host.clone(), uri.port),
            },
            ..Default::default()
        };

        let command_timeout = self.command_timeout;
        let client = Builder::from_config(fred_config)
            .with_performance_config(|perf| {
                perf.default_command_timeout = command_timeout;
            })
            .build()?;
        client.init().await?;

        Ok(FredNode {
            client,
            migrate_timeout_ms: self.migrate_timeout.as_millis() as u64,
        })
    }
}

#[async_trait]
impl ClusterClient for FredClusterClient {
    type Node = FredNode;

    #[instrument(skip(self))]
    async fn topology(&self) -> Result<Vec<NodeInfo>, ClientError> {
        let raw: String = self.seed.cluster_nodes().await?;
        let topology = parse_cluster_nodes(&raw)?;

        let mut addrs = self.addrs.lock().await;
        for node in &topology {
            addrs.insert(node.id.clone(), node.uri.clone());
        }
        Ok(topology)
    }

    async fn connection(&self, node_id: &str) -> Result<Self::Node, ClientError> {
        let mut pool = self.pool.lock().await;
        if let Some(node) = pool.get(node_id) {
            return Ok(node.clone());
        }

        let uri = self
            .addrs
            .lock()
            .await
            .get(node_id)
            .cloned()
            .ok_or_else(|| ClientError::UnknownNode(node_id.to_string()))?;

        let node = self.connect_node(&uri).await?;
        pool.insert(node_id.to_string(), node.clone());
        Ok(node)
    }
}

/// Connection to a single node. Clones share the underlying fred client.
#[derive(Clone)]
pub struct FredNode {
    client: Client,
    migrate_timeout_ms: u64,
}

impl FredNode {
    /// `CLUSTER <args...>` through the custom-command path.
    async fn cluster_command(&self, args: Vec<Value>) -> Result<(), ClientError> {
        let cmd = CustomCommand::new_static("CLUSTER", ClusterHash::Random, false);
        let _: Value = self.client.custom(cmd, args).await?;
        Ok(())
    }
}

#[async_trait]
impl NodeHandle for FredNode {
    #[instrument(skip(self))]
    async fn cluster_meet(&self, uri: &RedisUri) -> Result<(), ClientError> {
        self.client.cluster_meet(uri.host.as_str(), uri.port).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn cluster_forget(&self, node_id: &str) -> Result<(), ClientError> {
        self.client.cluster_forget(node_id).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn cluster_reset_hard(&self) -> Result<(), ClientError> {
        self.client
            .cluster_reset(Some(ClusterResetFlag::Hard))
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn cluster_replicate(&self, master_id: &str) -> Result<(), ClientError> {
        self.client.cluster_replicate(master_id).await?;
        Ok(())
    }

    async fn set_slot_importing(&self, slot: u16, source_id: &str) -> Result<(), ClientError> {
        self.cluster_command(vec![
            "SETSLOT".into(),
            (slot as i64).into(),
            "IMPORTING".into(),
            source_id.into(),
        ])
        .await
    }

    async fn set_slot_migrating(&self, slot: u16, dest_id: &str) -> Result<(), ClientError> {
        self.cluster_command(vec![
            "SETSLOT".into(),
            (slot as i64).into(),
            "MIGRATING".into(),
            dest_id.into(),
        ])
        .await
    }

    async fn set_slot_node(&self, slot: u16, owner_id: &str) -> Result<(), ClientError> {
        self.cluster_command(vec![
            "SETSLOT".into(),
            (slot as i64).into(),
            "NODE".into(),
            owner_id.into(),
        ])
        .await
    }

    #[instrument(skip(self))]
    async fn count_keys_in_slot(&self, slot: u16) -> Result<u64, ClientError> {
        let count: u64 = self.client.cluster_count_keys_in_slot(slot).await?;
        Ok(count)
    }

    #[instrument(skip(self))]
    async fn keys_in_slot(&self, slot: u16, count: u64) -> Result<Vec<String>, ClientError> {
        let keys: Vec<String> = self.client.cluster_get_keys_in_slot(slot, count).await?;
        Ok(keys)
    }

    #[instrument(skip(self, keys), fields(key_count = keys.len()))]
    async fn migrate_keys(
        &self,
        dest: &RedisUri,
        keys: &[String],
        replace: bool,
    ) -> Result<(), ClientError> {
        if keys.is_empty() {
            return Ok(());
        }

        // MIGRATE host port "" 0 timeout [REPLACE] KEYS key [key ...]
        let mut args: Vec<Value> = vec![
            dest.host.as_str().into(),
            (dest.port as i64).into(),
            "".into(),
            0i64.into(),
            (self.migrate_timeout_ms as i64).into(),
        ];
        if replace {
            args.push("REPLACE".into());
        }
        args.push("KEYS".into());
        for key in keys {
            args.push(key.as_str().into());
        }

        let cmd = CustomCommand::new_static("MIGRATE", ClusterHash::Random, false);
        let _: Value = self.client.custom(cmd, args).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn cluster_info(&self) -> Result<HashMap<String, String>, ClientError> {
        let raw: String = self.client.cluster_info().await?;
        Ok(parse_info_map(&raw))
    }
}
