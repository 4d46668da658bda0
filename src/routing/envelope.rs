//! Per-command redirect bookkeeping.

use crate::command::{CommandOutcome, CompletionSlot, Dispatch};
use crate::connection::NodeConnection;
use crate::error::{Error, Result};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::oneshot;

/// One in-flight command: its descriptor, the caller's completion slot, the
/// connection it currently awaits completion from, and how much redirect
/// budget remains.
///
/// The lifecycle ends either at a terminal non-redirect completion or at
/// budget exhaustion; either way the slot is settled exactly once.
pub struct Envelope {
    name: String,
    args: Bytes,
    completion: CompletionSlot,
    connection: Arc<dyn NodeConnection>,
    remaining: u32,
    max_redirects: u32,
}

impl Envelope {
    /// Wrap a command bound to the connection that first dispatches it.
    pub fn new(
        name: String,
        args: Bytes,
        completion: CompletionSlot,
        connection: Arc<dyn NodeConnection>,
        max_redirects: u32,
    ) -> Self {
        Self {
            name,
            args,
            completion,
            connection,
            remaining: max_redirects,
            max_redirects,
        }
    }

    /// Command identifier, for single-command intent recomputation.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The connection this command currently awaits completion from.
    pub fn connection(&self) -> &Arc<dyn NodeConnection> {
        &self.connection
    }

    /// Rebind to the connection a redirect resolved.
    pub fn rebind(&mut self, connection: Arc<dyn NodeConnection>) {
        self.connection = connection;
    }

    /// Consume one unit of redirect budget.
    ///
    /// Returns the exhaustion error without decrementing when the budget is
    /// already spent; the caller must settle and stop resolving.
    pub fn consume_redirect(&mut self) -> Result<()> {
        if self.remaining == 0 {
            return Err(Error::RedirectsExhausted {
                max: self.max_redirects,
            });
        }
        self.remaining -= 1;
        Ok(())
    }

    /// Redirect budget still available.
    pub fn remaining_redirects(&self) -> u32 {
        self.remaining
    }

    /// Build a dispatch for (re-)submission of this command.
    pub fn dispatch(&self, reply: oneshot::Sender<CommandOutcome>) -> Dispatch {
        Dispatch {
            name: self.name.clone(),
            args: self.args.clone(),
            reply,
        }
    }

    /// Whether the caller's slot already saw its terminal delivery.
    pub fn is_settled(&self) -> bool {
        self.completion.is_settled()
    }

    /// Deliver the terminal result. No-op if already settled.
    pub fn settle(&self, result: Result<Bytes>) -> bool {
        self.completion.settle(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedConnection;

    fn envelope(max_redirects: u32) -> (Envelope, crate::command::CompletionHandle) {
        let (completion, handle) = CompletionSlot::new();
        let conn: Arc<dyn NodeConnection> = Arc::new(ScriptedConnection::new());
        (
            Envelope::new(
                "GET".to_string(),
                Bytes::from_static(b"KEY"),
                completion,
                conn,
                max_redirects,
            ),
            handle,
        )
    }

    #[test]
    fn test_budget_counts_down() {
        let (mut env, _handle) = envelope(2);
        assert_eq!(env.remaining_redirects(), 2);

        assert!(env.consume_redirect().is_ok());
        assert!(env.consume_redirect().is_ok());
        assert_eq!(env.remaining_redirects(), 0);

        match env.consume_redirect() {
            Err(Error::RedirectsExhausted { max: 2 }) => {}
            other => panic!("expected RedirectsExhausted, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_budget_exhausts_immediately() {
        let (mut env, _handle) = envelope(0);
        assert!(matches!(
            env.consume_redirect(),
            Err(Error::RedirectsExhausted { max: 0 })
        ));
    }

    #[test]
    fn test_settle_is_idempotent() {
        let (env, _handle) = envelope(1);
        assert!(env.settle(Ok(Bytes::from_static(b"v"))));
        assert!(env.is_settled());
        assert!(!env.settle(Err(Error::ConnectionClosed)));
    }
}
