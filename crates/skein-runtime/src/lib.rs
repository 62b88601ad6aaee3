//! # skein-runtime
//!
//! Node-local concurrency machinery for skein:
//!
//! - [`Mailbox`] / [`MailboxSender`] - per-process FIFO of typed envelopes
//!   with selective receive
//! - [`Selector`] - multi-arm typed receive over a mailbox
//! - [`ProcessTable`] - identity allocation, spawning, termination notices
//! - [`ChannelTable`], [`SendPort`], [`ReceivePort`] - typed channels whose
//!   send half is serializable
//!
//! Everything here is single-node; routing between nodes lives in the
//! `skein` crate, which drives these tables from its send router and
//! inbound frame dispatch.

#![deny(missing_docs)]

mod channel;
mod error;
mod mailbox;
mod process;
mod select;
mod table;

pub use channel::{ChannelTable, ReceivePort, SendPort};
pub use error::{ChannelError, ReceiveError, SendError};
pub use mailbox::{Mailbox, MailboxSender};
pub use process::{ProcessHandle, ProcessStatus};
pub use select::Selector;
pub use table::ProcessTable;

pub use skein_core::{
    Closure, DecodeError, EncodeError, Envelope, ExitNotice, ExitReason, NodeId, Pid, Wire,
};
