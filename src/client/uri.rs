//! Redis node addresses and their canonicalization against live topology.
//!
//! Task targets arrive as `host`, `host:port`, or `redis://host[:port]`.
//! Topology entries report whatever address the node announced (usually an
//! IP). Canonicalization rewrites a caller-supplied URI to the topology's
//! form so plain equality works everywhere downstream.

use std::collections::HashSet;
use std::net::IpAddr;

use super::types::{NodeInfo, ParseError};

/// Address of a single Redis node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RedisUri {
    pub host: String,
    pub port: u16,
}

impl RedisUri {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse a task target. Accepts `host`, `host:port`, and
    /// `redis://host[:port]`; a missing port falls back to `default_port`.
    pub fn parse(input: &str, default_port: u16) -> Result<Self, ParseError> {
        let trimmed = input.trim();
        let stripped = trimmed.strip_prefix("redis://").unwrap_or(trimmed);
        let stripped = stripped.trim_end_matches('/');

        if stripped.is_empty() {
            return Err(ParseError::InvalidUri(input.to_string()));
        }

        if let Some((host, port_str)) = stripped.rsplit_once(':') {
            if host.is_empty() {
                return Err(ParseError::InvalidUri(input.to_string()));
            }
            let port = port_str
                .parse()
                .map_err(|_| ParseError::InvalidUri(input.to_string()))?;
            Ok(Self::new(host, port))
        } else {
            Ok(Self::new(stripped, default_port))
        }
    }

    /// `host:port` form, suitable for DNS lookup and MIGRATE arguments.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for RedisUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Find the topology entry a URI refers to.
///
/// Tries a textual `host:port` match first; when that fails, resolves both
/// sides and matches on shared IP addresses with equal ports. Returns `None`
/// when the node is not part of the cluster.
pub async fn resolve_node<'a>(uri: &RedisUri, topology: &'a [NodeInfo]) -> Option<&'a NodeInfo> {
    if let Some(node) = topology.iter().find(|n| n.uri == *uri) {
        return Some(node);
    }

    let wanted = lookup(uri).await?;
    for node in topology.iter().filter(|n| n.uri.port == uri.port) {
        if let Some(ips) = lookup(&node.uri).await
            && !ips.is_disjoint(&wanted)
        {
            return Some(node);
        }
    }
    None
}

/// Rewrite a URI to the form the topology reports.
pub async fn canonicalize(uri: &RedisUri, topology: &[NodeInfo]) -> Option<RedisUri> {
    resolve_node(uri, topology).await.map(|n| n.uri.clone())
}

async fn lookup(uri: &RedisUri) -> Option<HashSet<IpAddr>> {
    let addrs = tokio::net::lookup_host(uri.addr()).await.ok()?;
    Some(addrs.map(|sa| sa.ip()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::types::NodeFlags;

    fn master(id: &str, host: &str, port: u16) -> NodeInfo {
        NodeInfo {
            id: id.to_string(),
            uri: RedisUri::new(host, port),
            flags: NodeFlags {
                master: true,
                ..NodeFlags::default()
            },
            master_id: None,
            link_state: "connected".to_string(),
            slots: Vec::new(),
        }
    }

    #[test]
    fn parse_bare_host_uses_default_port() {
        let uri = RedisUri::parse("10.0.0.4", 6379).unwrap();
        assert_eq!(uri, RedisUri::new("10.0.0.4", 6379));
    }

    #[test]
    fn parse_host_and_port() {
        let uri = RedisUri::parse("10.0.0.4:7000", 6379).unwrap();
        assert_eq!(uri, RedisUri::new("10.0.0.4", 7000));
    }

    #[test]
    fn parse_scheme_prefixed() {
        assert_eq!(
            RedisUri::parse("redis://10.0.0.4", 6379).unwrap(),
            RedisUri::new("10.0.0.4", 6379)
        );
        assert_eq!(
            RedisUri::parse("redis://10.0.0.4:7000/", 6379).unwrap(),
            RedisUri::new("10.0.0.4", 7000)
        );
    }

    #[test]
    fn parse_trims_whitespace() {
        let uri = RedisUri::parse("  10.0.0.4:7000 ", 6379).unwrap();
        assert_eq!(uri, RedisUri::new("10.0.0.4", 7000));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(RedisUri::parse("", 6379).is_err());
        assert!(RedisUri::parse("redis://", 6379).is_err());
        assert!(RedisUri::parse("host:notaport", 6379).is_err());
        assert!(RedisUri::parse(":6379", 6379).is_err());
    }

    #[tokio::test]
    async fn resolve_prefers_exact_match() {
        let topology = vec![master("a", "10.0.0.1", 6379), master("b", "10.0.0.2", 6379)];
        let uri = RedisUri::new("10.0.0.2", 6379);
        let node = resolve_node(&uri, &topology).await.expect("should resolve");
        assert_eq!(node.id, "b");
    }

    #[tokio::test]
    async fn resolve_misses_unknown_node() {
        let topology = vec![master("a", "10.0.0.1", 6379)];
        let uri = RedisUri::new("10.9.9.9", 6379);
        assert!(resolve_node(&uri, &topology).await.is_none());
    }

    #[tokio::test]
    async fn canonicalize_rewrites_to_topology_form() {
        let topology = vec![master("a", "127.0.0.1", 6379)];
        let uri = RedisUri::new("localhost", 6379);
        let canonical = canonicalize(&uri, &topology).await.expect("should match");
        assert_eq!(canonical, RedisUri::new("127.0.0.1", 6379));
    }
}
