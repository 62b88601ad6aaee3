//! Per-process execution context.
//!
//! Every process body receives a [`Context`] as its argument: its own
//! pid, the consuming half of its mailbox, and a handle to the node for
//! sending, spawning, and channels. There is no ambient/task-local
//! state; the context is the only way a body touches the runtime.

use crate::errors::SpawnError;
use crate::node::NodeHandle;
use skein_core::{Closure, EncodeError, Envelope, NodeId, Pid, Wire};
use skein_runtime::{
    ChannelError, Mailbox, ReceiveError, ReceivePort, SendPort, Selector,
};
use std::future::Future;
use std::time::Duration;

/// The execution context handed to a process body.
pub struct Context {
    pid: Pid,
    mailbox: Mailbox,
    node: NodeHandle,
}

impl Context {
    pub(crate) fn new(pid: Pid, mailbox: Mailbox, node: NodeHandle) -> Self {
        Self { pid, mailbox, node }
    }

    /// This process's pid.
    pub fn pid(&self) -> &Pid {
        &self.pid
    }

    /// The node this process runs on.
    pub fn node_id(&self) -> &NodeId {
        self.node.id()
    }

    /// A cloneable handle to the node.
    pub fn node(&self) -> &NodeHandle {
        &self.node
    }

    /// Receives the next message of type `T`, skipping others.
    pub async fn receive<T: Wire>(&self) -> Result<T, ReceiveError> {
        let env = self
            .mailbox
            .recv_matching(&[T::type_tag()])
            .await
            .ok_or(ReceiveError::Closed)?;
        env.open().map_err(ReceiveError::from)
    }

    /// [`Context::receive`] with a deadline; consumes nothing on expiry.
    pub async fn receive_timeout<T: Wire>(&self, dur: Duration) -> Result<T, ReceiveError> {
        let env = self
            .mailbox
            .recv_matching_timeout(&[T::type_tag()], dur)
            .await?;
        env.open().map_err(ReceiveError::from)
    }

    /// Opens a multi-arm selective receive.
    pub fn select<R>(&self) -> Selector<'_, R> {
        self.mailbox.select()
    }

    /// Receives the oldest envelope regardless of type.
    pub async fn recv_any(&self) -> Option<Envelope> {
        self.mailbox.recv().await
    }

    /// Sends a value to any process, local or remote.
    ///
    /// Encoding failures surface here; delivery failures do not - a
    /// message to a dead process or across a failed link is silently
    /// dropped.
    pub async fn send<T: Wire>(&self, to: &Pid, value: &T) -> Result<(), EncodeError> {
        self.node.send(to, value).await
    }

    /// Sends an already-sealed envelope.
    pub async fn send_raw(&self, to: &Pid, env: Envelope) {
        self.node.send_raw(to, env).await
    }

    /// Spawns a process on this node.
    pub fn spawn_local<F, Fut>(&self, body: F) -> Pid
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.node.spawn_local(body)
    }

    /// Spawns a registered closure on `on`, which may be this node.
    pub async fn spawn(&self, on: &NodeId, closure: Closure) -> Result<Pid, SpawnError> {
        self.node.spawn(on, closure).await
    }

    /// Opens a typed channel owned by this node.
    pub fn open_channel<T: Wire>(&self) -> (SendPort<T>, ReceivePort<T>) {
        self.node.open_channel()
    }

    /// Sends a value into a channel, wherever its receive port lives.
    pub async fn send_channel<T: Wire>(
        &self,
        port: &SendPort<T>,
        value: &T,
    ) -> Result<(), ChannelError> {
        self.node.send_channel(port, value).await
    }

    /// Registers this process for a termination notice from a local
    /// `target`. Returns `false` if the target is not on this node.
    pub fn monitor(&self, target: &Pid) -> bool {
        self.node.monitor(&self.pid, target)
    }

    /// Links this process with another local process: each receives a
    /// termination notice for the other.
    pub fn link(&self, other: &Pid) -> bool {
        self.node.link(&self.pid, other)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").field("pid", &self.pid).finish()
    }
}
