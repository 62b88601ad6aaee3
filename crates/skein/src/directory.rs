//! Peer directory: known hosts, learned nodes, live links.
//!
//! The directory is pure bookkeeping; establishing connections is the
//! transport's job. It tracks every NodeId this node has learned about
//! (from configuration probes, handshakes, and peer-announce frames) and
//! the live link per peer, and answers "who is reachable".

use crate::transport::{LinkState, PeerLink};
use async_trait::async_trait;
use dashmap::DashMap;
use skein_core::NodeId;
use std::sync::Arc;
use std::time::Duration;

/// Coarse status of a known peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    /// Learned but not currently connected.
    Known,
    /// A live link exists.
    Connected,
    /// The last link to it failed.
    Failed,
}

struct DirInner {
    nodes: DashMap<NodeId, PeerStatus>,
    links: DashMap<NodeId, Arc<PeerLink>>,
}

/// The node's view of its cluster. Cheap to clone.
#[derive(Clone)]
pub struct PeerDirectory {
    inner: Arc<DirInner>,
}

impl PeerDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DirInner {
                nodes: DashMap::new(),
                links: DashMap::new(),
            }),
        }
    }

    /// Records nodes learned from a handshake or announce frame.
    ///
    /// A learned id supersedes an earlier incarnation of the same
    /// listener (same host and port, older epoch); an id older than what
    /// is already known is ignored.
    pub fn learn(&self, nodes: &[NodeId]) {
        for node in nodes {
            let superseded = self
                .inner
                .nodes
                .iter()
                .any(|r| r.key().same_listener(node) && r.key().epoch() > node.epoch());
            if superseded {
                continue;
            }
            let stale: Vec<NodeId> = self
                .inner
                .nodes
                .iter()
                .filter(|r| r.key().same_listener(node) && r.key().epoch() < node.epoch())
                .map(|r| r.key().clone())
                .collect();
            for old in stale {
                self.inner.nodes.remove(&old);
                self.inner.links.remove(&old);
            }
            self.inner.nodes.entry(node.clone()).or_insert(PeerStatus::Known);
        }
    }

    /// All learned node identifiers.
    pub fn enumerate(&self) -> Vec<NodeId> {
        self.inner.nodes.iter().map(|r| r.key().clone()).collect()
    }

    /// Status of one learned peer.
    pub fn status(&self, node: &NodeId) -> Option<PeerStatus> {
        self.inner.nodes.get(node).map(|r| *r.value())
    }

    /// Peers with a live link.
    pub fn connected(&self) -> Vec<NodeId> {
        self.inner
            .links
            .iter()
            .filter(|r| r.value().state() == LinkState::Up)
            .map(|r| r.key().clone())
            .collect()
    }

    /// The live link to `node`, if one is up.
    pub(crate) fn link(&self, node: &NodeId) -> Option<Arc<PeerLink>> {
        self.inner.links.get(node).map(|r| r.value().clone())
    }

    /// Returns `true` if any link (up or connecting) exists to a node
    /// with this listener address.
    pub(crate) fn has_link_to_listener(&self, host: &str, port: u16) -> bool {
        self.inner
            .links
            .iter()
            .any(|r| r.key().host() == host && r.key().port() == port)
    }

    /// Installs a link, returning the one it replaced, if any.
    pub(crate) fn insert_link(&self, link: Arc<PeerLink>) -> Option<Arc<PeerLink>> {
        let peer = link.peer().clone();
        self.inner.nodes.insert(peer.clone(), PeerStatus::Connected);
        self.inner.links.insert(peer, link)
    }

    /// Drops the link to a failed peer and marks it failed.
    ///
    /// Only removes the given link; a replacement installed concurrently
    /// stays.
    pub(crate) fn invalidate(&self, link: &Arc<PeerLink>) {
        let peer = link.peer();
        let removed = self
            .inner
            .links
            .remove_if(peer, |_, current| Arc::ptr_eq(current, link))
            .is_some();
        if removed {
            if let Some(mut status) = self.inner.nodes.get_mut(peer) {
                *status = PeerStatus::Failed;
            }
        }
    }

    /// Closes every link. Used at node shutdown.
    pub(crate) fn close_all(&self) {
        for entry in self.inner.links.iter() {
            entry.value().mark(LinkState::Closed);
        }
        self.inner.links.clear();
    }

    /// Every live link, for drain accounting.
    pub(crate) fn links(&self) -> Vec<Arc<PeerLink>> {
        self.inner.links.iter().map(|r| r.value().clone()).collect()
    }
}

impl Default for PeerDirectory {
    fn default() -> Self {
        Self::new()
    }
}

/// A discovery mechanism: yields candidate listener addresses to probe.
///
/// The default implementation is [`PortRangeProber`]; embedders can
/// substitute anything that enumerates addresses (DNS, a registry, a
/// cloud API).
#[async_trait]
pub trait Discover: Send + Sync + 'static {
    /// Candidate `(host, port)` pairs to probe this round.
    async fn candidates(&self) -> Vec<(String, u16)>;

    /// How often to run a probe round.
    fn interval(&self) -> Duration {
        Duration::from_secs(5)
    }
}

/// Sweeps each known host across a bounded port range.
pub struct PortRangeProber {
    hosts: Vec<String>,
    range: (u16, u16),
    interval: Duration,
}

impl PortRangeProber {
    /// Creates a prober over `hosts` and the inclusive port `range`.
    pub fn new(hosts: Vec<String>, range: (u16, u16), interval: Duration) -> Self {
        Self {
            hosts,
            range,
            interval,
        }
    }
}

#[async_trait]
impl Discover for PortRangeProber {
    async fn candidates(&self) -> Vec<(String, u16)> {
        let mut out = Vec::new();
        for host in &self.hosts {
            for port in self.range.0..=self.range.1 {
                out.push((host.clone(), port));
            }
        }
        out
    }

    fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn learn_and_enumerate() {
        let dir = PeerDirectory::new();
        let a = NodeId::new("h1", 40001, 1);
        let b = NodeId::new("h2", 40001, 1);
        dir.learn(&[a.clone(), b.clone()]);
        dir.learn(&[a.clone()]);

        let mut nodes = dir.enumerate();
        nodes.sort();
        assert_eq!(nodes, vec![a, b]);
    }

    #[test]
    fn newer_epoch_supersedes() {
        let dir = PeerDirectory::new();
        let old = NodeId::new("h1", 40001, 5);
        let new = NodeId::new("h1", 40001, 9);
        dir.learn(&[old.clone()]);
        dir.learn(&[new.clone()]);

        assert_eq!(dir.enumerate(), vec![new]);
        assert_eq!(dir.status(&old), None);
    }

    #[test]
    fn older_epoch_is_ignored() {
        let dir = PeerDirectory::new();
        let new = NodeId::new("h1", 40001, 9);
        let old = NodeId::new("h1", 40001, 5);
        dir.learn(&[new.clone()]);
        dir.learn(&[old]);

        assert_eq!(dir.enumerate(), vec![new]);
    }

    #[tokio::test]
    async fn prober_covers_the_range() {
        let prober = PortRangeProber::new(
            vec!["h1".into(), "h2".into()],
            (40000, 40002),
            Duration::from_secs(1),
        );
        let candidates = prober.candidates().await;
        assert_eq!(candidates.len(), 6);
        assert!(candidates.contains(&("h1".to_string(), 40001)));
        assert!(candidates.contains(&("h2".to_string(), 40002)));
    }
}
