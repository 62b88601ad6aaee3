//! Node-level error types.
//!
//! Transport failures are recovered internally and never reach user code
//! except as delivery loss; the types here cover what *is* surfaced:
//! startup failures, connection establishment, and remote spawn.

use crate::config::ConfigError;
use crate::proto::FrameError;
use skein_core::NodeId;
use thiserror::Error;

/// Fatal startup error. The launcher exits non-zero on either variant.
#[derive(Debug, Error)]
pub enum StartError {
    /// The configuration did not validate.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The listener could not be bound.
    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),
}

/// Error establishing a peer connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Socket-level failure.
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    /// The dial or handshake did not complete in time.
    #[error("connect timed out")]
    Timeout,
    /// The peer spoke something other than a handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// The peer presented a different magic token.
    #[error("magic token mismatch")]
    MagicMismatch,
    /// The dialed listener turned out to be this node.
    #[error("dialed ourselves")]
    SelfDial,
    /// This node is shutting down; no new connections.
    #[error("node is shutting down")]
    ShuttingDown,
    /// Framing failure during the handshake.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Error returned by a remote spawn.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// No connection to the target node could be established.
    #[error("node {0} is unreachable")]
    Unreachable(NodeId),
    /// The target node has no closure registered under this name.
    #[error("no closure named `{0}` on the target node")]
    UnknownClosure(String),
    /// The target node rejected the encoded arguments.
    #[error("closure argument rejected: {0}")]
    BadArgument(String),
    /// No spawn reply arrived within the configured timeout.
    #[error("spawn timed out")]
    Timeout,
    /// The connection dropped while awaiting the spawn reply.
    #[error("connection lost awaiting spawn reply")]
    Disconnected,
}
