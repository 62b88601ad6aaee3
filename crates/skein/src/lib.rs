//! # skein
//!
//! A distributed message-passing runtime: Erlang-style lightweight
//! processes with mailboxes and selective receive, location-transparent
//! send, remote spawn through registered closures, and typed channels
//! whose send half travels across the wire.
//!
//! # Overview
//!
//! A cluster is a set of cooperating nodes running the same binary. Each
//! node binds a TCP listener, discovers peers by probing configured
//! hosts across a port range, and exchanges length-prefixed frames over
//! one connection per peer. Processes are tokio tasks with a mailbox;
//! sending to a [`Pid`] works the same whether the target is local or on
//! another node.
//!
//! # Quick start
//!
//! ```ignore
//! use skein::{ClosureRegistry, NodeConfig, Node};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut closures = ClosureRegistry::new();
//!     closures.register("app.worker", |seed: u64, ctx| async move {
//!         while let Ok(n) = ctx.receive::<u64>().await {
//!             tracing::info!("got {}", n + seed);
//!         }
//!     });
//!
//!     let node = Node::start(NodeConfig::new("localhost"), closures).await?;
//!     let handle = node.handle();
//!
//!     let pid = handle.spawn_local(|ctx| async move {
//!         if let Ok(greeting) = ctx.receive::<String>().await {
//!             println!("{}", greeting);
//!         }
//!     });
//!     handle.send(&pid, &"hello".to_string()).await?;
//!
//!     node.run().await;
//!     node.shutdown().await;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]

pub mod config;
pub mod proto;

mod closure;
mod context;
mod directory;
mod errors;
mod node;
mod role;
mod transport;

pub use closure::{ClosureRegistry, EchoRequest, ECHO_CLOSURE};
pub use config::{ConfigError, NodeConfig, DEFAULT_MAGIC};
pub use context::Context;
pub use directory::{Discover, PeerDirectory, PeerStatus, PortRangeProber};
pub use errors::{ConnectError, SpawnError, StartError};
pub use node::{Node, NodeHandle};

pub use skein_core::{
    Closure, DecodeError, EncodeError, Envelope, ExitNotice, ExitReason, NodeId, Pid, Wire,
};
pub use skein_runtime::{
    ChannelError, Mailbox, ReceiveError, ReceivePort, Selector, SendError, SendPort,
};
