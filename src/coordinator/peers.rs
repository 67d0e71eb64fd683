//! Peer set resolution
//!
//! The orchestrator's peer finder writes one address per line to our stdin
//! and closes it. The list includes this node.

use crate::common::{Error, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Ordered, immutable list of cluster member addresses
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PeerSet {
    peers: Vec<String>,
}

impl PeerSet {
    pub fn new<I, S>(peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            peers: peers.into_iter().map(Into::into).collect(),
        }
    }

    /// Read peers until EOF. Each non-blank line contributes its first token.
    pub async fn read_from<R: AsyncBufRead + Unpin>(reader: R) -> Result<Self> {
        let mut lines = reader.lines();
        let mut peers = Vec::new();
        while let Some(line) = lines.next_line().await? {
            if let Some(addr) = line.split_whitespace().next() {
                peers.push(addr.to_string());
            }
        }
        Ok(Self { peers })
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.peers.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Position of `addr` in input order.
    pub fn position(&self, addr: &str) -> Option<usize> {
        self.peers.iter().position(|p| p == addr)
    }

    /// Find this node's service address.
    ///
    /// An exact first-label match wins; otherwise the last peer that merely
    /// contains the hostname.
    pub fn resolve(&self, hostname: &str) -> NodeIdentity {
        let exact = self
            .peers
            .iter()
            .find(|p| p.split('.').next() == Some(hostname));
        let service_address = exact
            .or_else(|| self.peers.iter().rev().find(|p| p.contains(hostname)))
            .cloned();

        NodeIdentity {
            hostname: hostname.to_string(),
            service_address,
        }
    }
}

impl std::fmt::Display for PeerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.peers.join(" "))
    }
}

/// Who this node is within the peer set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub hostname: String,
    pub service_address: Option<String>,
}

impl NodeIdentity {
    /// The service address, required once membership actions are taken.
    pub fn require_service_address(&self) -> Result<&str> {
        self.service_address
            .as_deref()
            .ok_or_else(|| Error::UnknownServiceAddress(self.hostname.clone()))
    }

    /// `<service>:<port>` as listed in the replica-set configuration.
    pub fn member_host(&self, port: u16) -> Result<String> {
        Ok(format!("{}:{}", self.require_service_address()?, port))
    }

    pub fn is(&self, addr: &str) -> bool {
        self.service_address.as_deref() == Some(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peers() -> PeerSet {
        PeerSet::new([
            "icp-mongodb-0.icp-mongodb.kube-system.svc.cluster.local",
            "icp-mongodb-1.icp-mongodb.kube-system.svc.cluster.local",
            "icp-mongodb-10.icp-mongodb.kube-system.svc.cluster.local",
        ])
    }

    #[test]
    fn test_exact_label_beats_substring() {
        let id = peers().resolve("icp-mongodb-1");
        assert_eq!(
            id.service_address.as_deref(),
            Some("icp-mongodb-1.icp-mongodb.kube-system.svc.cluster.local")
        );
    }

    #[test]
    fn test_substring_fallback_takes_last() {
        let set = PeerSet::new(["a.node-x.svc", "b.node-x.svc"]);
        let id = set.resolve("node-x");
        assert_eq!(id.service_address.as_deref(), Some("b.node-x.svc"));
    }

    #[test]
    fn test_no_match() {
        let id = peers().resolve("elsewhere");
        assert_eq!(id.service_address, None);
        assert!(matches!(
            id.member_host(27017),
            Err(Error::UnknownServiceAddress(h)) if h == "elsewhere"
        ));
    }

    #[test]
    fn test_member_host() {
        let id = PeerSet::new(["node-0.svc"]).resolve("node-0");
        assert_eq!(id.member_host(27017).unwrap(), "node-0.svc:27017");
        assert!(id.is("node-0.svc"));
    }

    #[tokio::test]
    async fn test_read_skips_blank_lines_and_trailing_tokens() {
        let input: &[u8] = b"node-0.svc\n\n   \nnode-1.svc 10.0.0.2\n  node-2.svc\n";
        let set = PeerSet::read_from(input).await.unwrap();
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec!["node-0.svc", "node-1.svc", "node-2.svc"]
        );
        assert_eq!(set.position("node-1.svc"), Some(1));
    }
}
