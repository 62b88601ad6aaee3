//! Wire protocol: frame codec and handshake.
//!
//! Every frame on a peer connection is `u32` big-endian length, one tag
//! byte, then a postcard-encoded body. The length covers the tag and
//! body. Length-bound violations and unknown tags are [`FrameError`]s and
//! tear down the connection they arrive on.
//!
//! Before framed mode, each side of a fresh connection writes a
//! length-prefixed [`Hello`] carrying its magic token and NodeId and
//! reads the peer's; a mismatched token closes the connection.

use crate::errors::SpawnError;
use serde::{Deserialize, Serialize};
use skein_core::{Closure, Envelope, NodeId, Pid};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a frame (tag + body), in bytes.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Upper bound on a handshake message, in bytes.
pub const MAX_HELLO_LEN: u32 = 4096;

/// Frame tag bytes.
pub mod tags {
    /// User message addressed to a process mailbox.
    pub const USER_TO_PID: u8 = 1;
    /// User message addressed to a channel.
    pub const USER_TO_PORT: u8 = 2;
    /// Remote spawn request.
    pub const SPAWN_REQ: u8 = 3;
    /// Remote spawn reply.
    pub const SPAWN_REP: u8 = 4;
    /// Known-node propagation.
    pub const PEER_ANNOUNCE: u8 = 5;
    /// Keepalive probe.
    pub const PING: u8 = 6;
    /// Keepalive response.
    pub const PONG: u8 = 7;
}

/// Framing failure. Fatal to the connection it occurs on.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Socket-level failure while reading or writing a frame.
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    /// The declared length violates the frame bounds.
    #[error("frame length {len} outside bounds")]
    BadLength {
        /// The declared length.
        len: u32,
    },
    /// The tag byte names no known frame kind.
    #[error("unknown frame tag {0}")]
    UnknownTag(u8),
    /// The body did not decode as the tagged kind.
    #[error("frame body: {0}")]
    Codec(postcard::Error),
}

/// Why a spawn request was refused, as carried in the reply frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpawnFault {
    /// The closure name is not registered on the target node.
    UnknownClosure(String),
    /// The encoded arguments did not decode.
    BadArgument(String),
}

impl From<SpawnFault> for SpawnError {
    fn from(fault: SpawnFault) -> Self {
        match fault {
            SpawnFault::UnknownClosure(name) => SpawnError::UnknownClosure(name),
            SpawnFault::BadArgument(reason) => SpawnError::BadArgument(reason),
        }
    }
}

/// One frame of the peer protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// Deliver `env` to the mailbox of `to` on the receiving node.
    UserToPid {
        /// Target process.
        to: Pid,
        /// Sealed payload.
        env: Envelope,
    },
    /// Deliver `env` to channel `index` on the receiving node.
    UserToPort {
        /// Channel index on the owning node.
        index: u64,
        /// Sealed payload.
        env: Envelope,
    },
    /// Materialize `closure` as a new process and reply with its pid.
    SpawnReq {
        /// Correlates the reply.
        seq: u64,
        /// What to spawn.
        closure: Closure,
    },
    /// Reply to a spawn request.
    SpawnRep {
        /// Sequence from the request.
        seq: u64,
        /// The new pid, or why there is none.
        result: Result<Pid, SpawnFault>,
    },
    /// Nodes the sender knows about.
    PeerAnnounce {
        /// Learned node identifiers, sender included.
        nodes: Vec<NodeId>,
    },
    /// Keepalive probe.
    Ping {
        /// Echoed in the pong.
        seq: u64,
    },
    /// Keepalive response.
    Pong {
        /// Sequence from the ping.
        seq: u64,
    },
}

impl Frame {
    /// The tag byte written for this frame.
    pub fn tag(&self) -> u8 {
        match self {
            Frame::UserToPid { .. } => tags::USER_TO_PID,
            Frame::UserToPort { .. } => tags::USER_TO_PORT,
            Frame::SpawnReq { .. } => tags::SPAWN_REQ,
            Frame::SpawnRep { .. } => tags::SPAWN_REP,
            Frame::PeerAnnounce { .. } => tags::PEER_ANNOUNCE,
            Frame::Ping { .. } => tags::PING,
            Frame::Pong { .. } => tags::PONG,
        }
    }
}

/// Encodes a frame as length + tag + body.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, FrameError> {
    let body = match frame {
        Frame::UserToPid { to, env } => postcard::to_allocvec(&(to, env)),
        Frame::UserToPort { index, env } => postcard::to_allocvec(&(index, env)),
        Frame::SpawnReq { seq, closure } => postcard::to_allocvec(&(seq, closure)),
        Frame::SpawnRep { seq, result } => postcard::to_allocvec(&(seq, result)),
        Frame::PeerAnnounce { nodes } => postcard::to_allocvec(nodes),
        Frame::Ping { seq } => postcard::to_allocvec(seq),
        Frame::Pong { seq } => postcard::to_allocvec(seq),
    }
    .map_err(FrameError::Codec)?;

    let len = 1 + body.len() as u64;
    if len > MAX_FRAME_LEN as u64 {
        return Err(FrameError::BadLength { len: len as u32 });
    }

    let mut buf = Vec::with_capacity(4 + len as usize);
    buf.extend_from_slice(&(len as u32).to_be_bytes());
    buf.push(frame.tag());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Decodes a frame body given its tag.
pub fn decode_frame(tag: u8, body: &[u8]) -> Result<Frame, FrameError> {
    let frame = match tag {
        tags::USER_TO_PID => {
            let (to, env) = postcard::from_bytes(body).map_err(FrameError::Codec)?;
            Frame::UserToPid { to, env }
        }
        tags::USER_TO_PORT => {
            let (index, env) = postcard::from_bytes(body).map_err(FrameError::Codec)?;
            Frame::UserToPort { index, env }
        }
        tags::SPAWN_REQ => {
            let (seq, closure) = postcard::from_bytes(body).map_err(FrameError::Codec)?;
            Frame::SpawnReq { seq, closure }
        }
        tags::SPAWN_REP => {
            let (seq, result) = postcard::from_bytes(body).map_err(FrameError::Codec)?;
            Frame::SpawnRep { seq, result }
        }
        tags::PEER_ANNOUNCE => Frame::PeerAnnounce {
            nodes: postcard::from_bytes(body).map_err(FrameError::Codec)?,
        },
        tags::PING => Frame::Ping {
            seq: postcard::from_bytes(body).map_err(FrameError::Codec)?,
        },
        tags::PONG => Frame::Pong {
            seq: postcard::from_bytes(body).map_err(FrameError::Codec)?,
        },
        other => return Err(FrameError::UnknownTag(other)),
    };
    Ok(frame)
}

/// Writes one frame.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_frame(frame)?;
    writer.write_all(&bytes).await?;
    Ok(())
}

/// Reads one frame, enforcing the length bounds.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len < 1 || len > MAX_FRAME_LEN {
        return Err(FrameError::BadLength { len });
    }

    let mut tag = [0u8; 1];
    reader.read_exact(&mut tag).await?;
    let mut body = vec![0u8; len as usize - 1];
    reader.read_exact(&mut body).await?;
    decode_frame(tag[0], &body)
}

/// Handshake message exchanged before framed mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    /// Shared cluster token.
    pub magic: String,
    /// The sender's identity.
    pub node: NodeId,
}

/// Writes a length-prefixed handshake message.
pub async fn write_hello<W>(writer: &mut W, hello: &Hello) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let body = postcard::to_allocvec(hello).map_err(FrameError::Codec)?;
    if body.len() as u64 > MAX_HELLO_LEN as u64 {
        return Err(FrameError::BadLength {
            len: body.len() as u32,
        });
    }
    let mut buf = Vec::with_capacity(4 + body.len());
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buf.extend_from_slice(&body);
    writer.write_all(&buf).await?;
    Ok(())
}

/// Reads a length-prefixed handshake message.
pub async fn read_hello<R>(reader: &mut R) -> Result<Hello, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len < 1 || len > MAX_HELLO_LEN {
        return Err(FrameError::BadLength { len });
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    postcard::from_bytes(&body).map_err(FrameError::Codec)
}
