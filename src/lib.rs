//! Redirection-aware command router for clustered key-value store clients.
//!
//! A clustered store partitions its keyspace into slots, each owned by
//! exactly one node at a time. Ownership moves at runtime (resharding,
//! failover), and the store tells clients about it in-band: a node that no
//! longer owns a command's slot answers with a redirect instead of a
//! result. This crate routes command batches to a bound connection, parses
//! those redirect signals out of completions, resolves the named target
//! into a pooled connection, and re-dispatches, all without blocking the
//! caller's task.
//!
//! # Example
//!
//! ```rust,no_run
//! use slotwise::testing::{ScriptedConnection, StaticResolver};
//! use slotwise::{Command, CommandBatch, NoopClusterEventListener, RedirectingWriter, RouterConfig};
//! use bytes::Bytes;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connection = Arc::new(ScriptedConnection::new());
//!     let resolver = Arc::new(StaticResolver::new(connection.clone()));
//!     let writer = RedirectingWriter::new(
//!         connection,
//!         resolver,
//!         Arc::new(NoopClusterEventListener),
//!         RouterConfig::default(),
//!     );
//!
//!     let (command, handle) = Command::new("GET", Bytes::from_static(b"user:123"));
//!     writer.write(CommandBatch::from(vec![command]));
//!
//!     // Redirects, if any, are followed transparently.
//!     let value = handle.wait().await?;
//!     println!("{:?}", value);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Caller                       │
//! │   write(batch)        handle.wait().await    │
//! └──────────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌──────────────────────────────────────────────┐
//! │            RedirectingWriter                 │
//! │  • intent classification per batch           │
//! │  • MOVED/ASK parsing from completions        │
//! │  • budget-bounded re-dispatch                │
//! └──────────────────────────────────────────────┘
//!         │                        │
//!         ▼                        ▼
//! ┌────────────────┐   ┌────────────────────────┐
//! │ NodeConnection │   │  ConnectionResolver     │
//! │ (bound/target) │   │  (pool, consumed)       │
//! └────────────────┘   └────────────────────────┘
//! ```
//!
//! # Redirect protocol
//!
//! - **MOVED** is permanent: slot ownership changed. The command is
//!   resubmitted as a single ordinary command to the new owner, and the
//!   [`ClusterEventListener`] hook is told a topology refresh is warranted.
//! - **ASK** is transient: during live migration the target only accepts
//!   the command if primed with an `ASKING` directive immediately before
//!   it, submitted together as one pair. Only the original command's result
//!   reaches the caller.
//!
//! Each command carries a redirect budget ([`RouterConfig::max_redirects`],
//! default 5). Exhaustion fails the command instead of resolving again.
//!
//! # Ordering
//!
//! Commands of one batch keep their relative order on the connection they
//! are first dispatched to. A command that is redirected individually
//! leaves batch order and rejoins the caller only through its own
//! completion handle.

pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod routing;
pub mod testing;

// Re-export the public surface for convenience.
pub use command::{
    Command, CommandBatch, CommandOutcome, CompletionHandle, CompletionSlot, Dispatch, SlotId,
};
pub use config::RouterConfig;
pub use connection::{
    ClusterEventListener, ConnectionResolver, NodeAddr, NodeConnection, NoopClusterEventListener,
};
pub use error::{Error, ProtocolError, ResolutionError, Result};
pub use routing::{is_write_command, Envelope, Intent, RedirectSignal, RedirectingWriter};
