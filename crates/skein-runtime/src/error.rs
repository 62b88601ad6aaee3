//! Runtime error types.

use skein_core::{DecodeError, EncodeError, Pid};
use thiserror::Error;

/// Error delivering an envelope to a local process.
///
/// The send router treats both variants as a silent drop; they are
/// surfaced so callers that *want* to observe delivery (tests, the spawn
/// path) can.
#[derive(Debug, Error)]
pub enum SendError {
    /// No process with this pid exists on this node.
    #[error("no process {0}")]
    NotFound(Pid),
    /// The process has terminated; its mailbox no longer accepts mail.
    #[error("mailbox for {0} is closed")]
    Closed(Pid),
    /// The value could not be encoded. Raised at the call site.
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Error returned by a receive.
#[derive(Debug, Error)]
pub enum ReceiveError {
    /// The deadline elapsed before a matching message arrived. No message
    /// was consumed.
    #[error("receive timed out")]
    Timeout,
    /// The mailbox closed while waiting (the process is terminating).
    #[error("mailbox closed")]
    Closed,
    /// A matching envelope arrived but its payload failed to decode.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Error delivering to or sending on a typed channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// No channel with this index exists on this node.
    #[error("no channel {0}")]
    NoSuchChannel(u64),
    /// The receive port (and thus the queue) is gone.
    #[error("channel closed")]
    Closed,
    /// The envelope or port carries a different element type than the
    /// channel was created with.
    #[error("channel type mismatch: expected `{expected}`, found `{found}`")]
    TypeMismatch {
        /// Tag the channel was created with.
        expected: String,
        /// Tag that was offered.
        found: String,
    },
    /// The payload failed to decode as the channel's element type.
    #[error(transparent)]
    Decode(DecodeError),
    /// The value could not be encoded. Raised at the call site.
    #[error(transparent)]
    Encode(#[from] EncodeError),
}
