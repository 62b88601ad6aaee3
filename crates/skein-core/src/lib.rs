//! # skein-core
//!
//! Identity and wire-capability types shared by every skein crate:
//!
//! - [`NodeId`] - stable identity of one runtime instance
//! - [`Pid`] - stable identity of one process on one node
//! - [`Wire`] - the encodable capability: a value that can become a
//!   `(type tag, bytes)` pair and be reconstructed from one
//! - [`Envelope`] - the opaque typed unit stored in mailboxes and framed
//!   on the wire
//! - [`Closure`] - a serializable reference to a registered top-level body
//! - [`ExitReason`] / [`ExitNotice`] - process termination reporting

#![deny(missing_docs)]

mod closure;
mod exit;
mod node;
mod pid;
mod wire;

pub use closure::Closure;
pub use exit::{ExitNotice, ExitReason};
pub use node::NodeId;
pub use pid::Pid;
pub use wire::{DecodeError, EncodeError, Envelope, Wire};
