//! Command descriptors, batches and completion plumbing.
//!
//! A [`Command`] is an immutable request descriptor plus a single-settlement
//! completion slot. The caller keeps the [`CompletionHandle`] and awaits it;
//! the router and the connections it borrows only ever settle the slot.

use crate::error::{Error, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Keyspace slot identifier.
pub type SlotId = u16;

/// What a connection reports for one dispatched command: the response
/// payload, or the store's error string verbatim.
pub type CommandOutcome = std::result::Result<Bytes, String>;

/// One command handed to a connection for transmission.
///
/// `submit` is fire-and-forget; the connection reports the outcome through
/// `reply` once the store answers. Dropping `reply` without sending counts
/// as the connection closing under the command.
#[derive(Debug)]
pub struct Dispatch {
    /// Uppercase command identifier, e.g. `GET`.
    pub name: String,
    /// Encoded argument payload.
    pub args: Bytes,
    /// Outcome channel back to the router.
    pub reply: oneshot::Sender<CommandOutcome>,
}

/// An immutable command descriptor owned by the caller until completion.
#[derive(Debug)]
pub struct Command {
    name: String,
    args: Bytes,
    completion: CompletionSlot,
}

impl Command {
    /// Create a command and the handle the caller awaits for its result.
    pub fn new(name: impl Into<String>, args: impl Into<Bytes>) -> (Self, CompletionHandle) {
        let (completion, handle) = CompletionSlot::new();
        (
            Self {
                name: name.into(),
                args: args.into(),
                completion,
            },
            handle,
        )
    }

    /// Uppercase command identifier.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Encoded argument payload.
    pub fn args(&self) -> &Bytes {
        &self.args
    }

    pub(crate) fn into_parts(self) -> (String, Bytes, CompletionSlot) {
        (self.name, self.args, self.completion)
    }
}

/// An ordered sequence of commands submitted together.
///
/// Relative order is preserved on the connection the batch is first
/// dispatched to. A command that is later redirected individually leaves
/// batch order and rejoins the caller only through its own completion.
#[derive(Debug, Default)]
pub struct CommandBatch {
    commands: Vec<Command>,
}

impl CommandBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command, preserving submission order.
    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Number of commands in the batch.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the batch holds no commands.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Iterate over command descriptors in order.
    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }

    pub(crate) fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}

impl From<Vec<Command>> for CommandBatch {
    fn from(commands: Vec<Command>) -> Self {
        Self { commands }
    }
}

impl FromIterator<Command> for CommandBatch {
    fn from_iter<I: IntoIterator<Item = Command>>(iter: I) -> Self {
        Self {
            commands: iter.into_iter().collect(),
        }
    }
}

/// Single-settlement result slot for one command.
///
/// The first settlement wins; later settlements are silent no-ops. This is
/// what makes late deliveries after an outer timeout harmless.
#[derive(Debug, Clone)]
pub struct CompletionSlot {
    inner: Arc<Mutex<Option<oneshot::Sender<Result<Bytes>>>>>,
}

impl CompletionSlot {
    /// Create a slot and the handle that awaits its settlement.
    pub fn new() -> (Self, CompletionHandle) {
        let (tx, rx) = oneshot::channel();
        let slot = Self {
            inner: Arc::new(Mutex::new(Some(tx))),
        };
        let handle = CompletionHandle {
            rx,
            slot: slot.clone(),
        };
        (slot, handle)
    }

    /// Settle the slot. Returns `true` if this call was the terminal
    /// delivery, `false` if the slot was already settled.
    pub fn settle(&self, result: Result<Bytes>) -> bool {
        let Some(tx) = self.inner.lock().take() else {
            return false;
        };
        // A dropped handle is indistinguishable from a delivered result to
        // the router; either way the slot is terminal now.
        let _ = tx.send(result);
        true
    }

    /// Whether a terminal delivery already happened.
    pub fn is_settled(&self) -> bool {
        self.inner.lock().is_none()
    }
}

/// Caller-side future for one command's terminal result.
#[derive(Debug)]
pub struct CompletionHandle {
    rx: oneshot::Receiver<Result<Bytes>>,
    slot: CompletionSlot,
}

impl CompletionHandle {
    /// Await the command's terminal delivery.
    pub async fn wait(self) -> Result<Bytes> {
        self.rx.await.unwrap_or(Err(Error::Cancelled))
    }

    /// Settle the command exceptionally from the caller side, as an outer
    /// timeout would.
    ///
    /// Returns `true` if this was the terminal delivery. The router notices
    /// the settled slot and stops re-submitting; a late store result is
    /// silently absorbed.
    pub fn abandon(&self) -> bool {
        self.slot.settle(Err(Error::Cancelled))
    }
}
