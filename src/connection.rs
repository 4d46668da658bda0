//! Consumed interfaces: connections, the connection resolver and the
//! cluster event hook.
//!
//! The router never owns connections. It borrows handles from a
//! [`ConnectionResolver`] (typically backed by a pool keyed on node
//! identity) for the duration of one redirect and submits through them.

use crate::command::{Dispatch, SlotId};
use crate::error::Result;
use crate::routing::Intent;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Address of one store node.
///
/// `host` may be an IPv4 dotted quad, a DNS name, or an IPv6 literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeAddr {
    pub host: String,
    pub port: u16,
}

impl NodeAddr {
    /// Create a node address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A live, usable connection to one store node.
///
/// `submit` is fire-and-forget: completion is delivered through each
/// dispatch's reply sender from the connection's own event loop. Commands
/// submitted in one call must be transmitted in order (pipelining order).
pub trait NodeConnection: Send + Sync {
    /// Dispatch commands onto this connection in order.
    fn submit(&self, commands: Vec<Dispatch>);

    /// Terminate the underlying transport.
    fn disconnect(&self);
}

/// Resolves an intent plus a target into a pooled connection handle.
///
/// Resolution is asynchronous and may lazily establish a new connection
/// (handshake, auth). Failures surface as typed resolution errors, never
/// merged with store-level errors.
#[async_trait]
pub trait ConnectionResolver: Send + Sync {
    /// Resolve an ad-hoc target not yet reflected in topology, as named by
    /// a redirect.
    async fn resolve_addr(
        &self,
        intent: Intent,
        host: &str,
        port: u16,
    ) -> Result<Arc<dyn NodeConnection>>;

    /// Resolve the current owner of a slot from topology.
    async fn resolve_slot(&self, intent: Intent, slot: SlotId) -> Result<Arc<dyn NodeConnection>>;
}

/// Fire-and-forget notifications about cluster behavior observed while
/// routing.
///
/// A MOVED redirect means shard ownership changed and the slot map is
/// stale; the outer topology layer decides whether and when to refresh.
/// All methods default to no-ops.
pub trait ClusterEventListener: Send + Sync {
    /// A permanent redirect was observed for `slot`.
    fn on_moved(&self, slot: SlotId, addr: &NodeAddr) {
        let _ = (slot, addr);
    }

    /// A transient migration redirect was observed for `slot`.
    fn on_ask(&self, slot: SlotId, addr: &NodeAddr) {
        let _ = (slot, addr);
    }

    /// A command exhausted its redirect budget.
    fn on_redirects_exhausted(&self) {}
}

/// Listener that ignores all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopClusterEventListener;

impl ClusterEventListener for NoopClusterEventListener {}
