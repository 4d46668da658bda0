//! Test doubles for exercising the router without a live cluster.
//!
//! These are deterministic: a [`ScriptedConnection`] answers each dispatch
//! synchronously from a scripted queue, so tests never sleep or race.

use crate::command::{CommandOutcome, Dispatch, SlotId};
use crate::connection::{ConnectionResolver, NodeConnection};
use crate::error::{ResolutionError, Result};
use crate::routing::Intent;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// A dispatch as seen by a [`ScriptedConnection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedDispatch {
    pub name: String,
    pub args: Bytes,
}

/// Connection double that records every `submit` call and replies from a
/// scripted outcome queue.
///
/// Dispatches beyond the script park their reply senders; dropping the
/// connection then completes them as closed.
#[derive(Default)]
pub struct ScriptedConnection {
    script: Mutex<VecDeque<CommandOutcome>>,
    submissions: Mutex<Vec<Vec<RecordedDispatch>>>,
    parked: Mutex<Vec<oneshot::Sender<CommandOutcome>>>,
    disconnects: AtomicUsize,
}

impl ScriptedConnection {
    /// Create a connection with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a connection pre-loaded with outcomes.
    pub fn with_script<I: IntoIterator<Item = CommandOutcome>>(outcomes: I) -> Self {
        let conn = Self::new();
        conn.script.lock().extend(outcomes);
        conn
    }

    /// Append one outcome to the script.
    pub fn push_outcome(&self, outcome: CommandOutcome) {
        self.script.lock().push_back(outcome);
    }

    /// Every `submit` call, in order, with the dispatches it carried.
    pub fn submissions(&self) -> Vec<Vec<RecordedDispatch>> {
        self.submissions.lock().clone()
    }

    /// Command names per `submit` call.
    pub fn submitted_names(&self) -> Vec<Vec<String>> {
        self.submissions
            .lock()
            .iter()
            .map(|batch| batch.iter().map(|d| d.name.clone()).collect())
            .collect()
    }

    /// Number of dispatches awaiting a manual reply.
    pub fn parked_count(&self) -> usize {
        self.parked.lock().len()
    }

    /// Complete the oldest parked dispatch.
    pub fn complete_parked(&self, outcome: CommandOutcome) -> bool {
        let mut parked = self.parked.lock();
        if parked.is_empty() {
            return false;
        }
        let tx = parked.remove(0);
        let _ = tx.send(outcome);
        true
    }

    /// Drop every parked reply sender, as a closing connection would.
    pub fn close_parked(&self) {
        self.parked.lock().clear();
    }

    /// How many times `disconnect` was called.
    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl NodeConnection for ScriptedConnection {
    fn submit(&self, commands: Vec<Dispatch>) {
        let mut recorded = Vec::with_capacity(commands.len());
        let mut script = self.script.lock();
        let mut parked = self.parked.lock();
        for dispatch in commands {
            recorded.push(RecordedDispatch {
                name: dispatch.name,
                args: dispatch.args,
            });
            match script.pop_front() {
                Some(outcome) => {
                    let _ = dispatch.reply.send(outcome);
                }
                None => parked.push(dispatch.reply),
            }
        }
        self.submissions.lock().push(recorded);
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Resolver double that always yields the same connection and records every
/// resolution call.
pub struct StaticResolver {
    connection: Arc<dyn NodeConnection>,
    addr_calls: Mutex<Vec<(Intent, String, u16)>>,
    slot_calls: Mutex<Vec<(Intent, SlotId)>>,
}

impl StaticResolver {
    /// Resolve everything to `connection`.
    pub fn new(connection: Arc<dyn NodeConnection>) -> Self {
        Self {
            connection,
            addr_calls: Mutex::new(Vec::new()),
            slot_calls: Mutex::new(Vec::new()),
        }
    }

    /// Recorded `resolve_addr` calls.
    pub fn addr_calls(&self) -> Vec<(Intent, String, u16)> {
        self.addr_calls.lock().clone()
    }

    /// Recorded `resolve_slot` calls.
    pub fn slot_calls(&self) -> Vec<(Intent, SlotId)> {
        self.slot_calls.lock().clone()
    }

    /// Total resolution calls of either kind.
    pub fn call_count(&self) -> usize {
        self.addr_calls.lock().len() + self.slot_calls.lock().len()
    }
}

#[async_trait]
impl ConnectionResolver for StaticResolver {
    async fn resolve_addr(
        &self,
        intent: Intent,
        host: &str,
        port: u16,
    ) -> Result<Arc<dyn NodeConnection>> {
        self.addr_calls.lock().push((intent, host.to_string(), port));
        Ok(self.connection.clone())
    }

    async fn resolve_slot(&self, intent: Intent, slot: SlotId) -> Result<Arc<dyn NodeConnection>> {
        self.slot_calls.lock().push((intent, slot));
        Ok(self.connection.clone())
    }
}

/// Resolver double that fails every resolution.
#[derive(Default)]
pub struct FailingResolver {
    calls: AtomicUsize,
}

impl FailingResolver {
    /// Create a failing resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of resolutions attempted against this resolver.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn refuse(&self, addr: String) -> Result<Arc<dyn NodeConnection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ResolutionError::ConnectionFailed {
            addr,
            reason: "refused by test double".to_string(),
        }
        .into())
    }
}

#[async_trait]
impl ConnectionResolver for FailingResolver {
    async fn resolve_addr(
        &self,
        intent: Intent,
        host: &str,
        port: u16,
    ) -> Result<Arc<dyn NodeConnection>> {
        let _ = intent;
        self.refuse(format!("{}:{}", host, port))
    }

    async fn resolve_slot(&self, intent: Intent, slot: SlotId) -> Result<Arc<dyn NodeConnection>> {
        let _ = intent;
        self.refuse(format!("slot {}", slot))
    }
}
