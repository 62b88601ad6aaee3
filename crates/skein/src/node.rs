//! The node: controller, send router, and inbound dispatch.
//!
//! [`Node::start`] binds the listener, fixes the NodeId, starts the
//! transport and discovery loops, and freezes the closure registry.
//! [`NodeHandle`] is the cloneable API surface: spawning (local and
//! remote), location-transparent send, and channels. Routing decisions
//! live here: a pid on this node goes straight to the process table, any
//! other pid goes out through the peer link to its owner.

use crate::closure::{ClosureRegistry, ProcessBody};
use crate::config::NodeConfig;
use crate::context::Context;
use crate::directory::{PeerDirectory, PortRangeProber};
use crate::errors::{ConnectError, SpawnError, StartError};
use crate::proto::Frame;
use crate::transport::{self, LinkState};
use dashmap::DashMap;
use parking_lot::Mutex;
use skein_core::{Closure, EncodeError, Envelope, NodeId, Pid, Wire};
use skein_runtime::{ChannelError, ChannelTable, ProcessTable, ReceivePort, SendPort};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

/// State shared by the handle, the transport tasks, and every process.
pub(crate) struct NodeShared {
    pub(crate) id: NodeId,
    pub(crate) config: NodeConfig,
    pub(crate) table: ProcessTable,
    pub(crate) channels: ChannelTable,
    pub(crate) directory: PeerDirectory,
    pub(crate) closures: ClosureRegistry,
    pending_spawns: DashMap<u64, oneshot::Sender<Result<Pid, SpawnError>>>,
    spawn_seq: AtomicU64,
    ping_seq: AtomicU64,
    shutting_down: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NodeShared {
    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub(crate) fn next_ping_seq(&self) -> u64 {
        self.ping_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Spawns a materialized body as a new local process.
    pub(crate) fn spawn_body(self: &Arc<Self>, body: ProcessBody) -> Pid {
        let shared = self.clone();
        self.table.spawn(move |pid, mailbox| {
            let ctx = Context::new(pid, mailbox, NodeHandle { shared });
            body(ctx)
        })
    }

    /// Routes an envelope to a process mailbox, local or remote.
    ///
    /// Never an error to the caller: unknown pids, dead processes, and
    /// failed links all downgrade to a logged drop.
    pub(crate) async fn route_to_pid(self: &Arc<Self>, to: &Pid, env: Envelope) {
        if to.is_on(&self.id) {
            if let Err(err) = self.table.deliver(to.index(), env) {
                tracing::debug!(%err, "local message dropped");
            }
            return;
        }
        match transport::ensure_link(self, to.node()).await {
            Ok(link) => {
                if !link
                    .enqueue(Frame::UserToPid {
                        to: to.clone(),
                        env,
                    })
                    .await
                {
                    tracing::debug!(%to, "message dropped: link not up");
                }
            }
            Err(err) => {
                tracing::debug!(%to, %err, "message dropped: peer unreachable");
            }
        }
    }

    /// Routes an envelope to a channel, local or remote.
    pub(crate) async fn route_to_port(self: &Arc<Self>, owner: &NodeId, index: u64, env: Envelope) {
        if *owner == self.id {
            if let Err(err) = self.channels.deliver(index, env) {
                tracing::debug!(index, %err, "local channel message dropped");
            }
            return;
        }
        match transport::ensure_link(self, owner).await {
            Ok(link) => {
                if !link.enqueue(Frame::UserToPort { index, env }).await {
                    tracing::debug!(index, "channel message dropped: link not up");
                }
            }
            Err(err) => {
                tracing::debug!(index, %err, "channel message dropped: peer unreachable");
            }
        }
    }

    /// Dispatches one inbound frame from `from`.
    pub(crate) async fn handle_frame(self: &Arc<Self>, from: &NodeId, frame: Frame) {
        match frame {
            Frame::UserToPid { to, env } => {
                if !to.is_on(&self.id) {
                    tracing::warn!(%to, %from, "message for a pid this node does not own");
                    return;
                }
                if let Err(err) = self.table.deliver(to.index(), env) {
                    tracing::debug!(%err, "inbound message dropped");
                }
            }
            Frame::UserToPort { index, env } => {
                if let Err(err) = self.channels.deliver(index, env) {
                    tracing::debug!(index, %err, "inbound channel message dropped");
                }
            }
            Frame::SpawnReq { seq, closure } => {
                let result = match self.closures.instantiate(&closure) {
                    Ok(body) => Ok(self.spawn_body(body)),
                    Err(fault) => {
                        tracing::debug!(name = closure.name(), ?fault, "spawn request refused");
                        Err(fault)
                    }
                };
                if let Some(link) = self.directory.link(from) {
                    let _ = link.enqueue(Frame::SpawnRep { seq, result }).await;
                }
            }
            Frame::SpawnRep { seq, result } => {
                if let Some((_, reply)) = self.pending_spawns.remove(&seq) {
                    let _ = reply.send(result.map_err(SpawnError::from));
                }
            }
            Frame::PeerAnnounce { nodes } => {
                let learned: Vec<NodeId> =
                    nodes.into_iter().filter(|n| *n != self.id).collect();
                self.directory.learn(&learned);
            }
            Frame::Ping { seq } => {
                if let Some(link) = self.directory.link(from) {
                    let _ = link.enqueue(Frame::Pong { seq }).await;
                }
            }
            Frame::Pong { seq } => {
                tracing::trace!(seq, %from, "pong");
            }
        }
    }
}

/// One running runtime instance.
pub struct Node {
    shared: Arc<NodeShared>,
}

impl Node {
    /// Starts a node: validates the configuration, binds the listener
    /// (the bound port becomes part of the NodeId), starts the accept
    /// and discovery loops, and freezes the closure registry.
    pub async fn start(config: NodeConfig, mut closures: ClosureRegistry) -> Result<Self, StartError> {
        config.validate()?;
        closures.install_builtins();

        let bind_port = config.listen_port.unwrap_or(0);
        let listener = TcpListener::bind(("0.0.0.0", bind_port))
            .await
            .map_err(StartError::Bind)?;
        let port = listener.local_addr().map_err(StartError::Bind)?.port();
        let id = NodeId::fresh(config.hostname.clone(), port);

        let shared = Arc::new(NodeShared {
            id: id.clone(),
            table: ProcessTable::new(id.clone()),
            channels: ChannelTable::new(id.clone()),
            directory: PeerDirectory::new(),
            closures,
            pending_spawns: DashMap::new(),
            spawn_seq: AtomicU64::new(0),
            ping_seq: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            config,
        });

        let mut tasks = vec![tokio::spawn(transport::accept_loop(
            shared.clone(),
            listener,
        ))];
        if !shared.config.known_hosts.is_empty() {
            let prober = Arc::new(PortRangeProber::new(
                shared.config.known_hosts.clone(),
                shared.config.port_range,
                shared.config.probe_interval,
            ));
            tasks.push(tokio::spawn(transport::probe_loop(shared.clone(), prober)));
        }
        shared.tasks.lock().extend(tasks);

        tracing::info!(node = %id, "node listening");
        Ok(Node { shared })
    }

    /// This node's identity.
    pub fn id(&self) -> &NodeId {
        &self.shared.id
    }

    /// A cloneable handle for spawning and sending.
    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            shared: self.shared.clone(),
        }
    }

    /// Runs the configured role until its body returns, or idles serving
    /// inbound requests until interrupted.
    pub async fn run(&self) {
        match crate::role::dispatch(&self.shared) {
            Some(pid) => {
                tracing::info!(%pid, role = %self.shared.config.role, "running role body");
                if let Some(join) = self.shared.table.take_join(pid.index()) {
                    tokio::select! {
                        _ = join => tracing::info!("role body returned"),
                        _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received"),
                    }
                }
            }
            None => {
                tracing::info!("no runnable role; serving inbound requests");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    /// Orderly shutdown: refuse new inbound, drain outbound queues and
    /// local receivers within the configured bound, cancel remaining
    /// processes, close links and listener.
    pub async fn shutdown(self) {
        let shared = self.shared;
        shared.shutting_down.store(true, Ordering::SeqCst);
        for task in shared.tasks.lock().drain(..) {
            task.abort();
        }

        let deadline = Instant::now() + shared.config.drain_timeout;
        loop {
            let links = shared.directory.links();
            let idle = links
                .iter()
                .all(|l| l.state() != LinkState::Up || l.outbound_idle());
            if idle || Instant::now() >= deadline {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }

        shared.table.drain(shared.config.drain_timeout).await;
        shared.table.shutdown();
        shared.channels.clear();
        shared.directory.close_all();
        tracing::info!(node = %shared.id, "node stopped");
    }
}

/// Cloneable API surface of a running node.
#[derive(Clone)]
pub struct NodeHandle {
    pub(crate) shared: Arc<NodeShared>,
}

impl NodeHandle {
    /// This node's identity.
    pub fn id(&self) -> &NodeId {
        &self.shared.id
    }

    /// Spawns a process on this node. The body shares the caller's
    /// address space and receives an explicit [`Context`].
    pub fn spawn_local<F, Fut>(&self, body: F) -> Pid
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shared = self.shared.clone();
        self.shared.table.spawn(move |pid, mailbox| {
            let ctx = Context::new(pid, mailbox, NodeHandle { shared });
            body(ctx)
        })
    }

    /// Spawns a registered closure on `on`.
    ///
    /// For a remote node this is a spawn-request/reply round trip; the
    /// returned pid is immediately valid as a send target. Fails with
    /// [`SpawnError`] if the node is unreachable, the name unknown, the
    /// arguments rejected, or the reply does not arrive in time.
    pub async fn spawn(&self, on: &NodeId, closure: Closure) -> Result<Pid, SpawnError> {
        if *on == self.shared.id {
            let body = self
                .shared
                .closures
                .instantiate(&closure)
                .map_err(SpawnError::from)?;
            return Ok(self.shared.spawn_body(body));
        }

        let link = transport::ensure_link(&self.shared, on)
            .await
            .map_err(|_| SpawnError::Unreachable(on.clone()))?;
        let seq = self.shared.spawn_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending_spawns.insert(seq, tx);

        if !link.enqueue(Frame::SpawnReq { seq, closure }).await {
            self.shared.pending_spawns.remove(&seq);
            return Err(SpawnError::Unreachable(on.clone()));
        }
        match tokio::time::timeout(self.shared.config.spawn_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SpawnError::Disconnected),
            Err(_) => {
                self.shared.pending_spawns.remove(&seq);
                Err(SpawnError::Timeout)
            }
        }
    }

    /// Sends a value to any process, local or remote.
    ///
    /// Only encoding failures surface; delivery failures are silent (a
    /// dead process or a failed link drops the message).
    pub async fn send<T: Wire>(&self, to: &Pid, value: &T) -> Result<(), EncodeError> {
        let env = Envelope::seal(value)?;
        self.shared.route_to_pid(to, env).await;
        Ok(())
    }

    /// Sends an already-sealed envelope.
    pub async fn send_raw(&self, to: &Pid, env: Envelope) {
        self.shared.route_to_pid(to, env).await;
    }

    /// Opens a typed channel owned by this node.
    pub fn open_channel<T: Wire>(&self) -> (SendPort<T>, ReceivePort<T>) {
        self.shared.channels.open()
    }

    /// Sends a value into a channel, wherever its receive port lives.
    ///
    /// A port whose recorded element type does not match `T` fails here,
    /// at the sender. As with [`NodeHandle::send`], delivery failures on
    /// a healthy port are silent.
    pub async fn send_channel<T: Wire>(
        &self,
        port: &SendPort<T>,
        value: &T,
    ) -> Result<(), ChannelError> {
        port.check_element_type()?;
        let env = Envelope::seal(value)?;
        if *port.node() == self.shared.id {
            match self.shared.channels.deliver(port.index(), env) {
                Ok(()) => Ok(()),
                Err(err @ ChannelError::TypeMismatch { .. }) => Err(err),
                Err(err) => {
                    tracing::debug!(index = port.index(), %err, "channel message dropped");
                    Ok(())
                }
            }
        } else {
            self.shared
                .route_to_port(port.node(), port.index(), env)
                .await;
            Ok(())
        }
    }

    /// Dials a listener directly, bypassing discovery. Returns the
    /// peer's identity.
    pub async fn connect(&self, host: &str, port: u16) -> Result<NodeId, ConnectError> {
        let link = transport::dial(&self.shared, host, port).await?;
        Ok(link.peer().clone())
    }

    /// Every node this one has learned about.
    pub fn peers(&self) -> Vec<NodeId> {
        self.shared.directory.enumerate()
    }

    /// Peers with a live connection.
    pub fn connected_peers(&self) -> Vec<NodeId> {
        self.shared.directory.connected()
    }

    /// Registers `watcher` for a termination notice from `target`.
    /// Both must be local; returns `false` otherwise.
    pub fn monitor(&self, watcher: &Pid, target: &Pid) -> bool {
        if !watcher.is_on(&self.shared.id) || !target.is_on(&self.shared.id) {
            return false;
        }
        self.shared.table.watch(watcher.clone(), target.index());
        true
    }

    /// Links two local processes; each gets a notice when the other
    /// terminates. Returns `false` if either is not local.
    pub fn link(&self, a: &Pid, b: &Pid) -> bool {
        if !a.is_on(&self.shared.id) || !b.is_on(&self.shared.id) {
            return false;
        }
        self.shared.table.link(a, b);
        true
    }

    /// Number of live process entries on this node.
    pub fn process_count(&self) -> usize {
        self.shared.table.len()
    }
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle").field("id", &self.shared.id).finish()
    }
}
