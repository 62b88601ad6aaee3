//! Process identifier type.
//!
//! A [`Pid`] names one process for the lifetime of its node. It pairs the
//! owning [`NodeId`] with a local index drawn from a monotonically
//! increasing per-node counter, so an index is never reused even after the
//! process terminates. Pids are serializable and routable from any peer.

use crate::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A process identifier.
///
/// Display format follows `pid://host:port/<index>/`.
///
/// # Examples
///
/// ```
/// use skein_core::{NodeId, Pid};
///
/// let node = NodeId::new("worker-1", 40001, 7);
/// let pid = Pid::new(node, 42);
/// assert_eq!(pid.to_string(), "pid://worker-1:40001/42/");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pid {
    /// The node that owns the process.
    node: NodeId,
    /// Unique process index within the owning node.
    index: u64,
}

impl Pid {
    /// Creates a pid from its parts.
    ///
    /// Index allocation is the process table's job; this constructor is
    /// used by the table, by deserialization, and by tests.
    pub fn new(node: NodeId, index: u64) -> Self {
        Self { node, index }
    }

    /// Returns the owning node.
    #[inline]
    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Returns the process index within the owning node.
    #[inline]
    pub const fn index(&self) -> u64 {
        self.index
    }

    /// Returns `true` if this pid lives on `node`.
    #[inline]
    pub fn is_on(&self, node: &NodeId) -> bool {
        self.node == *node
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pid://{}:{}/{}/",
            self.node.host(),
            self.node.port(),
            self.index
        )
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pid({}:{}/{})", self.node.host(), self.node.port(), self.index)
    }
}
