//! Parsed cluster topology types.
//!
//! These types represent the output of `CLUSTER NODES` and `CLUSTER INFO`
//! as the control plane consumes it. Snapshots are immutable values;
//! every stage that needs a fresh view re-reads it from the client.

use std::collections::HashMap;

use thiserror::Error;

use super::uri::RedisUri;

/// Errors that can occur when parsing cluster data.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid cluster nodes line: {0}")]
    InvalidClusterNodes(String),
    #[error("invalid slot range: {0}")]
    InvalidSlotRange(String),
    #[error("invalid redis uri: {0}")]
    InvalidUri(String),
}

/// Role of a cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Owns slots and serves writes.
    Master,
    /// Follows a master and serves reads.
    Replica,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Master => write!(f, "master"),
            NodeRole::Replica => write!(f, "replica"),
        }
    }
}

/// Flags from the third field of a `CLUSTER NODES` line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFlags {
    pub myself: bool,
    pub master: bool,
    pub slave: bool,
    pub pfail: bool,
    pub fail: bool,
    pub handshake: bool,
    pub noaddr: bool,
}

impl NodeFlags {
    pub fn parse(flags_str: &str) -> Self {
        let mut flags = NodeFlags::default();
        for flag in flags_str.split(',') {
            match flag.trim() {
                "myself" => flags.myself = true,
                "master" => flags.master = true,
                "slave" => flags.slave = true,
                "pfail" => flags.pfail = true,
                "fail" => flags.fail = true,
                "handshake" => flags.handshake = true,
                "noaddr" => flags.noaddr = true,
                _ => {}
            }
        }
        flags
    }

    pub fn role(&self) -> NodeRole {
        if self.master {
            NodeRole::Master
        } else {
            NodeRole::Replica
        }
    }

    /// Node is neither failing nor mid-handshake.
    pub fn is_healthy(&self) -> bool {
        !self.fail && !self.pfail && !self.handshake && !self.noaddr
    }
}

/// A contiguous range of hash slots, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
}

impl SlotRange {
    pub fn new(start: u16, end: u16) -> Self {
        debug_assert!(start <= end, "start ({start}) must be <= end ({end})");
        Self { start, end }
    }

    pub fn single(slot: u16) -> Self {
        Self {
            start: slot,
            end: slot,
        }
    }

    pub fn count(&self) -> u16 {
        self.end - self.start + 1
    }

    pub fn contains(&self, slot: u16) -> bool {
        slot >= self.start && slot <= self.end
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }

    /// Parse `"0-5460"` or `"5461"`. Slots in migration markers
    /// (`[slot-<-id]` / `[slot->-id]`) are rejected; ownership of those
    /// settles once the migration finishes.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let s = s.trim();
        if s.starts_with('[') {
            return Err(ParseError::InvalidSlotRange(format!(
                "slot in migration: {s}"
            )));
        }

        if let Some((start_str, end_str)) = s.split_once('-') {
            let start = start_str
                .parse()
                .map_err(|_| ParseError::InvalidSlotRange(s.to_string()))?;
            let end = end_str
                .parse()
                .map_err(|_| ParseError::InvalidSlotRange(s.to_string()))?;
            Ok(SlotRange::new(start, end))
        } else {
            let slot = s
                .parse()
                .map_err(|_| ParseError::InvalidSlotRange(s.to_string()))?;
            Ok(SlotRange::single(slot))
        }
    }
}

impl std::fmt::Display for SlotRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// One cluster member as reported by `CLUSTER NODES`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// 40-hex-char node id.
    pub id: String,
    /// Announced client address.
    pub uri: RedisUri,
    pub flags: NodeFlags,
    /// Master this node follows, when it is a replica.
    pub master_id: Option<String>,
    /// `"connected"` or `"disconnected"`.
    pub link_state: String,
    /// Slot ranges owned by this node (masters only).
    pub slots: Vec<SlotRange>,
}

impl NodeInfo {
    pub fn role(&self) -> NodeRole {
        self.flags.role()
    }

    pub fn is_master(&self) -> bool {
        self.flags.master
    }

    pub fn is_replica(&self) -> bool {
        self.flags.slave
    }

    pub fn is_connected(&self) -> bool {
        self.link_state == "connected"
    }

    /// Connected and not failing; only live nodes take part in meet and
    /// forget fan-outs.
    pub fn is_live(&self) -> bool {
        self.flags.is_healthy() && self.is_connected()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.iter().map(|r| r.count() as usize).sum()
    }

    /// All owned slots, ascending.
    pub fn owned_slots(&self) -> Vec<u16> {
        let mut slots: Vec<u16> = self.slots.iter().flat_map(|r| r.iter()).collect();
        slots.sort_unstable();
        slots
    }

    /// Parse a single `CLUSTER NODES` line.
    pub fn parse_line(line: &str) -> Result<Self, ParseError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 8 {
            return Err(ParseError::InvalidClusterNodes(format!(
                "not enough fields in line: {line}"
            )));
        }

        let id = parts
            .first()
            .ok_or_else(|| ParseError::InvalidClusterNodes(line.to_string()))?
            .to_string();

        // Address field: ip:port@cport or ip:port
        let addr_field = parts
            .get(1)
            .ok_or_else(|| ParseError::InvalidClusterNodes(line.to_string()))?;
        let ip_port = addr_field.split('@').next().unwrap_or(addr_field);
        let uri = RedisUri::parse(ip_port, 0)
            .map_err(|_| ParseError::InvalidClusterNodes(format!("bad address: {ip_port}")))?;
        if uri.port == 0 {
            return Err(ParseError::InvalidClusterNodes(format!(
                "address without port: {ip_port}"
            )));
        }

        let flags = parts
            .get(2)
            .map(|f| NodeFlags::parse(f))
            .unwrap_or_default();

        let master_id = match parts.get(3) {
            Some(&"-") | None => None,
            Some(id) => Some(id.to_string()),
        };

        let link_state = parts.get(7).unwrap_or(&"disconnected").to_string();

        let slots: Vec<SlotRange> = parts
            .get(8..)
            .unwrap_or_default()
            .iter()
            .filter_map(|s| SlotRange::parse(s).ok())
            .collect();

        Ok(NodeInfo {
            id,
            uri,
            flags,
            master_id,
            link_state,
            slots,
        })
    }
}

/// Parse full `CLUSTER NODES` output into a topology snapshot.
pub fn parse_cluster_nodes(output: &str) -> Result<Vec<NodeInfo>, ParseError> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(NodeInfo::parse_line)
        .collect()
}

/// Filter a topology down to its master nodes.
pub fn masters(topology: &[NodeInfo]) -> Vec<&NodeInfo> {
    topology.iter().filter(|n| n.is_master()).collect()
}

/// Parse `key:value` lines (`CLUSTER INFO`, `INFO` sections) into a map.
/// Comment lines and malformed lines are skipped.
pub fn parse_info_map(payload: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in payload.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            map.insert(key.to_string(), value.trim().to_string());
        }
    }
    map
}
