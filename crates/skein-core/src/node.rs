//! Node identifier type.
//!
//! A [`NodeId`] names one runtime instance: the host it advertises, the
//! port its listener is bound to, and an epoch taken from the clock at
//! startup. Two nodes on the same host differ by port; two incarnations of
//! a node on the same host and port differ by epoch, so identifiers are
//! never reused within a host's lifetime.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identity of one runtime instance.
///
/// Equality and ordering are structural over `(host, port, epoch)`. The
/// ordering is also used to resolve simultaneous-connect races: the
/// connection initiated by the lower-ordered node wins.
///
/// # Examples
///
/// ```
/// use skein_core::NodeId;
///
/// let a = NodeId::new("worker-1", 40001, 7);
/// let b = NodeId::new("worker-1", 40002, 7);
/// assert_ne!(a, b);
/// assert_eq!(a.to_string(), "nid://worker-1:40001/");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    /// Advertised hostname.
    host: String,
    /// Bound listener port.
    port: u16,
    /// Startup generation. Distinguishes incarnations across restarts.
    epoch: u32,
}

impl NodeId {
    /// Creates a node identifier from explicit parts.
    pub fn new(host: impl Into<String>, port: u16, epoch: u32) -> Self {
        Self {
            host: host.into(),
            port,
            epoch,
        }
    }

    /// Creates a node identifier for a node starting now.
    ///
    /// The epoch is the unix clock in seconds, so a restarted node never
    /// collides with an earlier incarnation on the same host and port.
    pub fn fresh(host: impl Into<String>, port: u16) -> Self {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        Self::new(host, port, epoch)
    }

    /// Returns the advertised hostname.
    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the listener port.
    #[inline]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the startup epoch.
    #[inline]
    pub const fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Returns the `host:port` dial address for this node.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns `true` if this identifier names the same listener as
    /// `other`, ignoring the epoch.
    ///
    /// Used by discovery to recognize a restarted incarnation of a node it
    /// already knows.
    pub fn same_listener(&self, other: &NodeId) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nid://{}:{}/", self.host, self.port)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}:{}@{})", self.host, self.port, self.epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_equality() {
        let a = NodeId::new("h", 9000, 1);
        let b = NodeId::new("h", 9000, 1);
        let c = NodeId::new("h", 9000, 2);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn same_host_different_port() {
        let a = NodeId::new("h", 9000, 1);
        let b = NodeId::new("h", 9001, 1);
        assert_ne!(a, b);
        assert!(!a.same_listener(&b));
    }

    #[test]
    fn same_listener_across_epochs() {
        let a = NodeId::new("h", 9000, 1);
        let b = NodeId::new("h", 9000, 99);
        assert!(a.same_listener(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn display_form() {
        let id = NodeId::new("worker-1.example", 40100, 3);
        assert_eq!(id.to_string(), "nid://worker-1.example:40100/");
        assert_eq!(id.addr(), "worker-1.example:40100");
    }

    #[test]
    fn ordering_is_total() {
        let a = NodeId::new("a", 1, 0);
        let b = NodeId::new("a", 2, 0);
        let c = NodeId::new("b", 1, 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn serialization_roundtrip() {
        let id = NodeId::new("h", 40001, 17);
        let bytes = postcard::to_allocvec(&id).unwrap();
        let decoded: NodeId = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(id, decoded);
    }
}
