//! TCP transport: peer links and their I/O loops.
//!
//! One TCP socket per peer. The writer task drains a bounded frame queue
//! (senders feel backpressure when it fills); the reader task decodes
//! frames and hands them to the node's dispatch. Handshake is a
//! [`Hello`] exchange; a wrong magic token refuses the connection.
//!
//! A link that fails moves to [`LinkState::Failed`], its queued frames
//! are dropped, and the initiating side redials with bounded exponential
//! backoff. When both sides connect simultaneously, the connection
//! initiated by the lower-ordered NodeId wins and the other is closed.

use crate::directory::Discover;
use crate::errors::ConnectError;
use crate::node::NodeShared;
use crate::proto::{self, Frame, Hello};
use parking_lot::RwLock;
use skein_core::NodeId;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::time::{sleep, timeout};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const KEEPALIVE_PERIOD: Duration = Duration::from_secs(15);

/// Redials per outage before the link is left to on-demand dialing.
const MAX_RECONNECT_ATTEMPTS: u32 = 8;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkState {
    /// Handshake in progress.
    Connecting,
    /// Frames flow.
    Up,
    /// I/O failed; pending frames were dropped.
    Failed,
    /// Deliberately closed (shutdown or lost a connect race).
    Closed,
}

/// A live connection to one peer.
pub(crate) struct PeerLink {
    peer: NodeId,
    /// `true` if this node dialed; the dialing side owns reconnection.
    initiated: bool,
    tx: mpsc::Sender<Frame>,
    queue_capacity: usize,
    state: RwLock<LinkState>,
    closed: Notify,
}

impl PeerLink {
    /// The peer this link reaches.
    pub(crate) fn peer(&self) -> &NodeId {
        &self.peer
    }

    pub(crate) fn state(&self) -> LinkState {
        *self.state.read()
    }

    pub(crate) fn mark(&self, state: LinkState) {
        *self.state.write() = state;
        self.closed.notify_waiters();
    }

    /// Queues a frame for the writer, suspending while the queue is
    /// full. Returns `false` if the link is not up; the frame is dropped.
    pub(crate) async fn enqueue(&self, frame: Frame) -> bool {
        if self.state() != LinkState::Up {
            return false;
        }
        self.tx.send(frame).await.is_ok()
    }

    /// `true` once every queued frame has been handed to the socket.
    pub(crate) fn outbound_idle(&self) -> bool {
        self.tx.capacity() == self.queue_capacity
    }

    /// Completes when the link leaves the `Up` state.
    async fn wait_down(&self) {
        loop {
            let notified = self.closed.notified();
            if self.state() != LinkState::Up {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish()
    }
}

/// Returns the live link to `peer`, dialing it if necessary.
pub(crate) async fn ensure_link(
    shared: &Arc<NodeShared>,
    peer: &NodeId,
) -> Result<Arc<PeerLink>, ConnectError> {
    if let Some(link) = shared.directory.link(peer) {
        if link.state() == LinkState::Up {
            return Ok(link);
        }
    }
    dial(shared, peer.host(), peer.port()).await
}

/// Dials a listener, handshakes, and installs the link.
pub(crate) async fn dial(
    shared: &Arc<NodeShared>,
    host: &str,
    port: u16,
) -> Result<Arc<PeerLink>, ConnectError> {
    let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port)))
        .await
        .map_err(|_| ConnectError::Timeout)??;
    handshake_and_adopt(shared, stream, true).await
}

/// Runs the hello exchange on a fresh socket, then installs the link.
async fn handshake_and_adopt(
    shared: &Arc<NodeShared>,
    mut stream: TcpStream,
    initiated: bool,
) -> Result<Arc<PeerLink>, ConnectError> {
    if shared.is_shutting_down() {
        return Err(ConnectError::ShuttingDown);
    }
    let _ = stream.set_nodelay(true);

    let ours = Hello {
        magic: shared.config.magic.clone(),
        node: shared.id.clone(),
    };
    let theirs = timeout(HANDSHAKE_TIMEOUT, async {
        proto::write_hello(&mut stream, &ours).await?;
        proto::read_hello(&mut stream).await
    })
    .await
    .map_err(|_| ConnectError::Timeout)??;

    if theirs.magic != shared.config.magic {
        tracing::warn!(peer = %theirs.node, "refusing peer: magic token mismatch");
        return Err(ConnectError::MagicMismatch);
    }
    if theirs.node == shared.id {
        return Err(ConnectError::SelfDial);
    }

    adopt(shared, stream, theirs.node, initiated).await
}

/// Installs a handshaken connection as the link to `peer`, resolving
/// simultaneous-connect races, and starts its I/O tasks.
async fn adopt(
    shared: &Arc<NodeShared>,
    stream: TcpStream,
    peer: NodeId,
    initiated: bool,
) -> Result<Arc<PeerLink>, ConnectError> {
    if let Some(existing) = shared.directory.link(&peer) {
        if existing.state() == LinkState::Up {
            // Both sides connected at once. The connection initiated by
            // the lower-ordered NodeId is kept on both ends.
            let lower_initiates = shared.id < peer;
            let new_wins = initiated == lower_initiates;
            if !new_wins {
                tracing::debug!(peer = %peer, "dropping duplicate connection");
                return Ok(existing);
            }
            existing.mark(LinkState::Closed);
        }
    }

    let (read_half, write_half) = stream.into_split();
    let capacity = shared.config.outbound_queue;
    let (tx, rx) = mpsc::channel(capacity);
    let link = Arc::new(PeerLink {
        peer: peer.clone(),
        initiated,
        tx,
        queue_capacity: capacity,
        state: RwLock::new(LinkState::Up),
        closed: Notify::new(),
    });

    shared.directory.insert_link(link.clone());
    tokio::spawn(writer_loop(shared.clone(), link.clone(), rx, write_half));
    tokio::spawn(reader_loop(shared.clone(), link.clone(), read_half));
    tokio::spawn(keepalive_loop(shared.clone(), link.clone()));

    // Tell the new peer everything this node knows, itself included.
    let mut nodes = shared.directory.enumerate();
    nodes.push(shared.id.clone());
    let _ = link.enqueue(Frame::PeerAnnounce { nodes }).await;

    tracing::info!(peer = %peer, initiated, "peer link up");
    Ok(link)
}

async fn writer_loop(
    shared: Arc<NodeShared>,
    link: Arc<PeerLink>,
    mut rx: mpsc::Receiver<Frame>,
    mut write_half: OwnedWriteHalf,
) {
    loop {
        let frame = tokio::select! {
            _ = link.wait_down() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        if let Err(err) = proto::write_frame(&mut write_half, &frame).await {
            tracing::warn!(peer = %link.peer, %err, "write failed");
            fail_link(&shared, &link);
            break;
        }
    }
    // Dropping the write half closes our side of the socket.
}

async fn reader_loop(shared: Arc<NodeShared>, link: Arc<PeerLink>, mut read_half: OwnedReadHalf) {
    loop {
        tokio::select! {
            _ = link.wait_down() => break,
            result = proto::read_frame(&mut read_half) => match result {
                Ok(frame) => shared.handle_frame(&link.peer, frame).await,
                Err(err) => {
                    // EOF on a closed link is routine; anything else is a
                    // corrupt or broken connection.
                    if link.state() == LinkState::Up {
                        tracing::warn!(peer = %link.peer, %err, "read failed, dropping connection");
                        fail_link(&shared, &link);
                    }
                    break;
                }
            },
        }
    }
}

async fn keepalive_loop(shared: Arc<NodeShared>, link: Arc<PeerLink>) {
    loop {
        sleep(KEEPALIVE_PERIOD).await;
        if link.state() != LinkState::Up {
            return;
        }
        let seq = shared.next_ping_seq();
        if !link.enqueue(Frame::Ping { seq }).await {
            return;
        }
    }
}

/// Transitions a link to `Failed`, drops it from the directory, and (on
/// the initiating side) starts the redial loop.
fn fail_link(shared: &Arc<NodeShared>, link: &Arc<PeerLink>) {
    if link.state() != LinkState::Up {
        return;
    }
    link.mark(LinkState::Failed);
    shared.directory.invalidate(link);

    if link.initiated && !shared.is_shutting_down() {
        tokio::spawn(reconnect_loop(shared.clone(), link.clone()));
    }
}

async fn reconnect_loop(shared: Arc<NodeShared>, old: Arc<PeerLink>) {
    let peer = old.peer.clone();
    let (min, max) = shared.config.connect_backoff;
    let mut delay = min;
    for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
        sleep(delay).await;
        if shared.is_shutting_down() || shared.directory.link(&peer).is_some() {
            return;
        }
        old.mark(LinkState::Connecting);
        match dial(&shared, peer.host(), peer.port()).await {
            Ok(_) => {
                // A fresh link now serves this peer; the old one is done.
                old.mark(LinkState::Closed);
                tracing::info!(peer = %peer, attempt, "reconnected");
                return;
            }
            Err(err) => {
                old.mark(LinkState::Failed);
                tracing::debug!(peer = %peer, attempt, %err, "reconnect attempt failed");
            }
        }
        delay = (delay * 2).min(max);
    }
    tracing::debug!(peer = %peer, "giving up reconnect; will redial on demand");
}

/// Accepts inbound connections until shutdown.
pub(crate) async fn accept_loop(shared: Arc<NodeShared>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if shared.is_shutting_down() {
                    break;
                }
                let shared = shared.clone();
                tokio::spawn(async move {
                    match handshake_and_adopt(&shared, stream, false).await {
                        Ok(_) => {}
                        Err(err @ ConnectError::MagicMismatch) => {
                            tracing::warn!(%addr, %err, "inbound connection refused");
                        }
                        Err(err) => {
                            tracing::debug!(%addr, %err, "inbound connection failed");
                        }
                    }
                });
            }
            Err(err) => {
                if shared.is_shutting_down() {
                    break;
                }
                tracing::warn!(%err, "accept failed");
                sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// Periodically probes discovery candidates and dials unknown listeners.
pub(crate) async fn probe_loop(shared: Arc<NodeShared>, discover: Arc<dyn Discover>) {
    loop {
        for (host, port) in discover.candidates().await {
            if shared.is_shutting_down() {
                return;
            }
            if host == shared.id.host() && port == shared.id.port() {
                continue;
            }
            if shared.directory.has_link_to_listener(&host, port) {
                continue;
            }
            if let Ok(link) = dial(&shared, &host, port).await {
                tracing::debug!(peer = %link.peer(), "discovered peer");
            }
        }
        sleep(discover.interval()).await;
        if shared.is_shutting_down() {
            return;
        }
    }
}
