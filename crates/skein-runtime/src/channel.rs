//! Typed channels.
//!
//! A channel is a homogeneous FIFO of `T` with two separable halves: the
//! [`SendPort`], which is plain data (owner node, channel index, element
//! tag) and travels freely across the wire, and the [`ReceivePort`],
//! which holds the queue consumer and never leaves its node - it does not
//! implement `Serialize`, so the encodable capability rejects it at
//! compile time.
//!
//! The [`ChannelTable`] maps channel indexes to delivery functions that
//! decode an incoming envelope as the channel's element type and push it
//! onto the typed queue. Remote and local sends both go through an
//! envelope, so type isolation holds on every path.

use crate::error::{ChannelError, ReceiveError};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use skein_core::{DecodeError, Envelope, NodeId, Wire};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;

type DeliverFn = Box<dyn Fn(Envelope) -> Result<(), ChannelError> + Send + Sync>;

struct ChannelEntry {
    tag: &'static str,
    deliver: DeliverFn,
}

struct ChanInner {
    node: NodeId,
    next_index: AtomicU64,
    entries: DashMap<u64, ChannelEntry>,
}

/// The node's table of open channels. Cheap to clone.
#[derive(Clone)]
pub struct ChannelTable {
    inner: Arc<ChanInner>,
}

impl ChannelTable {
    /// Creates a table for channels owned by `node`.
    pub fn new(node: NodeId) -> Self {
        Self {
            inner: Arc::new(ChanInner {
                node,
                next_index: AtomicU64::new(0),
                entries: DashMap::new(),
            }),
        }
    }

    /// Opens a channel of `T`, returning its two halves.
    ///
    /// The send port names this node as owner; the receive port is bound
    /// to this table and closes the channel when its last clone drops.
    pub fn open<T: Wire>(&self) -> (SendPort<T>, ReceivePort<T>) {
        let index = self.inner.next_index.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel::<T>();

        let deliver: DeliverFn = Box::new(move |env| {
            let value = env.open::<T>().map_err(|err| match err {
                DecodeError::TagMismatch { expected, found } => ChannelError::TypeMismatch {
                    expected: expected.to_string(),
                    found,
                },
                other => ChannelError::Decode(other),
            })?;
            tx.send(value).map_err(|_| ChannelError::Closed)
        });
        self.inner.entries.insert(
            index,
            ChannelEntry {
                tag: T::type_tag(),
                deliver,
            },
        );

        let send_port = SendPort {
            node: self.inner.node.clone(),
            index,
            tag: T::type_tag().to_string(),
            _marker: PhantomData,
        };
        let receive_port = ReceivePort {
            shared: Arc::new(PortShared {
                index,
                table: Arc::downgrade(&self.inner),
                rx: tokio::sync::Mutex::new(rx),
            }),
        };
        (send_port, receive_port)
    }

    /// Delivers an envelope into the channel at `index`.
    pub fn deliver(&self, index: u64, env: Envelope) -> Result<(), ChannelError> {
        match self.inner.entries.get(&index) {
            Some(entry) => (entry.deliver)(env),
            None => Err(ChannelError::NoSuchChannel(index)),
        }
    }

    /// Element tag of the channel at `index`, if open.
    pub fn tag_of(&self, index: u64) -> Option<&'static str> {
        self.inner.entries.get(&index).map(|e| e.tag)
    }

    /// Number of open channels.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Returns `true` if no channels are open.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Drops every delivery function, closing all queues. Used at node
    /// shutdown; blocked receivers observe end-of-channel.
    pub fn clear(&self) {
        self.inner.entries.clear();
    }
}

/// The serializable sending half of a channel.
///
/// A send port is plain routing data. It can be cloned, stored, and sent
/// to any node; wherever it ends up, sending on it delivers into the
/// queue owned by the node that opened the channel.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct SendPort<T> {
    node: NodeId,
    index: u64,
    tag: String,
    #[serde(skip)]
    _marker: PhantomData<fn(T) -> T>,
}

impl<T: Wire> SendPort<T> {
    /// The node hosting the matching receive port.
    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// The channel index on the owning node.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// The element tag the channel was opened with.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Checks that this port's recorded element tag matches `T`.
    ///
    /// A mismatch means the port bytes were produced for a different
    /// element type; sending through it would be rejected at delivery, so
    /// the router fails it at the sender instead.
    pub fn check_element_type(&self) -> Result<(), ChannelError> {
        if self.tag == T::type_tag() {
            Ok(())
        } else {
            Err(ChannelError::TypeMismatch {
                expected: self.tag.clone(),
                found: T::type_tag().to_string(),
            })
        }
    }
}

impl<T> Clone for SendPort<T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            index: self.index,
            tag: self.tag.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for SendPort<T> {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node && self.index == other.index && self.tag == other.tag
    }
}

impl<T> Eq for SendPort<T> {}

impl<T> std::fmt::Debug for SendPort<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendPort")
            .field("node", &self.node)
            .field("index", &self.index)
            .field("tag", &self.tag)
            .finish()
    }
}

struct PortShared<T> {
    index: u64,
    table: Weak<ChanInner>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<T>>,
}

impl<T> Drop for PortShared<T> {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table.entries.remove(&self.index);
        }
    }
}

/// The node-local receiving half of a channel.
///
/// Clones share one queue; concurrent readers serialize on an internal
/// lock and each value is delivered to exactly one of them. The channel
/// closes when the last clone drops.
pub struct ReceivePort<T> {
    shared: Arc<PortShared<T>>,
}

impl<T> Clone for ReceivePort<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Wire> ReceivePort<T> {
    /// The channel index on this node.
    pub fn index(&self) -> u64 {
        self.shared.index
    }

    /// Dequeues the next value, suspending while the queue is empty.
    ///
    /// Returns `None` after the node's channel table is cleared
    /// (shutdown) and the queue is drained.
    pub async fn recv(&self) -> Option<T> {
        self.shared.rx.lock().await.recv().await
    }

    /// Dequeues the next value if one is ready.
    pub fn try_recv(&self) -> Option<T> {
        self.shared.rx.try_lock().ok()?.try_recv().ok()
    }

    /// [`ReceivePort::recv`] with a deadline.
    pub async fn recv_timeout(&self, dur: Duration) -> Result<T, ReceiveError> {
        match tokio::time::timeout(dur, self.recv()).await {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(ReceiveError::Closed),
            Err(_) => Err(ReceiveError::Timeout),
        }
    }
}

impl<T> std::fmt::Debug for ReceivePort<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceivePort")
            .field("index", &self.shared.index)
            .finish()
    }
}
