//! The redirecting writer: dispatches batches and transparently follows the
//! store's MOVED/ASK redirect protocol.
//!
//! Redirection is purely a reaction to completion content. The first
//! dispatch of a batch goes to the bound default connection unchanged; only
//! when a completion carries a redirect payload does the writer resolve the
//! named target and re-submit, bounded by the per-command redirect budget.

use crate::command::{CommandBatch, CommandOutcome, Dispatch};
use crate::config::RouterConfig;
use crate::connection::{ClusterEventListener, ConnectionResolver, NodeConnection};
use crate::error::Error;
use crate::routing::{Envelope, Intent, RedirectSignal};
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Priming directive a migration target requires immediately before the
/// redirected command.
const ASKING: &str = "ASKING";

/// Routes command batches to the bound connection and follows redirects.
///
/// One writer serves one client instance. Completions arrive concurrently
/// from independent connection event loops; each in-flight command is
/// driven by its own task and settles its caller's slot exactly once.
pub struct RedirectingWriter {
    default_connection: Arc<dyn NodeConnection>,
    resolver: Arc<RwLock<Arc<dyn ConnectionResolver>>>,
    listener: Arc<dyn ClusterEventListener>,
    config: RouterConfig,
}

impl RedirectingWriter {
    /// Create a writer bound to `default_connection`.
    pub fn new(
        default_connection: Arc<dyn NodeConnection>,
        resolver: Arc<dyn ConnectionResolver>,
        listener: Arc<dyn ClusterEventListener>,
        config: RouterConfig,
    ) -> Self {
        Self {
            default_connection,
            resolver: Arc::new(RwLock::new(resolver)),
            listener,
            config,
        }
    }

    /// Dispatch a batch to the bound default connection.
    ///
    /// The batch goes out unchanged and in order in a single `submit` call;
    /// per-command driver tasks then react to completions. Must be called
    /// within a tokio runtime. Results reach the caller through each
    /// command's completion handle.
    pub fn write(&self, batch: CommandBatch) {
        let intent = Intent::for_commands(batch.iter());
        tracing::debug!(
            intent = %intent,
            commands = batch.len(),
            "dispatching batch to default connection"
        );

        let commands = batch.into_commands();
        let mut dispatches = Vec::with_capacity(commands.len());
        let mut drivers = Vec::with_capacity(commands.len());
        for command in commands {
            let (name, args, completion) = command.into_parts();
            let (tx, rx) = oneshot::channel();
            dispatches.push(Dispatch {
                name: name.clone(),
                args: args.clone(),
                reply: tx,
            });
            let envelope = Envelope::new(
                name,
                args,
                completion,
                self.default_connection.clone(),
                self.config.max_redirects,
            );
            drivers.push((envelope, rx));
        }

        self.default_connection.submit(dispatches);
        for (envelope, reply) in drivers {
            tokio::spawn(drive(
                envelope,
                reply,
                self.resolver.clone(),
                self.listener.clone(),
            ));
        }
    }

    /// Forward a disconnect to the bound default connection.
    ///
    /// Direct pass-through; in-flight redirect bookkeeping is untouched.
    pub fn disconnect(&self) {
        self.default_connection.disconnect();
    }

    /// Atomically replace the resolver used for future redirect
    /// resolutions.
    ///
    /// A resolution already snapshotted by an in-flight command completes
    /// against the previous resolver.
    pub fn swap_resolver(&self, resolver: Arc<dyn ConnectionResolver>) {
        *self.resolver.write() = resolver;
    }
}

/// Drive one command to its terminal delivery.
///
/// Loops over completions: success and ordinary store errors settle the
/// caller's slot; redirects consume budget, resolve the named target and
/// re-submit. Never blocks; resolution is awaited and re-submission happens
/// after the await.
async fn drive(
    mut envelope: Envelope,
    mut reply: oneshot::Receiver<CommandOutcome>,
    resolver: Arc<RwLock<Arc<dyn ConnectionResolver>>>,
    listener: Arc<dyn ClusterEventListener>,
) {
    loop {
        let outcome = match reply.await {
            Ok(outcome) => outcome,
            Err(_) => {
                envelope.settle(Err(Error::ConnectionClosed));
                return;
            }
        };

        let error = match outcome {
            Ok(payload) => {
                envelope.settle(Ok(payload));
                return;
            }
            Err(error) => error,
        };

        let signal = match RedirectSignal::classify(&error) {
            Ok(signal) => signal,
            Err(protocol_error) => {
                tracing::warn!(payload = %error, "malformed redirect payload from store");
                envelope.settle(Err(protocol_error));
                return;
            }
        };

        let (ask, slot, addr) = match signal {
            RedirectSignal::None => {
                // Ordinary store error, propagated verbatim.
                envelope.settle(Err(Error::Store(error)));
                return;
            }
            RedirectSignal::Ask { slot, addr } => (true, slot, addr),
            RedirectSignal::Moved { slot, addr } => (false, slot, addr),
        };

        if let Err(exhausted) = envelope.consume_redirect() {
            tracing::warn!(slot, addr = %addr, "redirect budget exhausted");
            listener.on_redirects_exhausted();
            envelope.settle(Err(exhausted));
            return;
        }

        if ask {
            listener.on_ask(slot, &addr);
        } else {
            listener.on_moved(slot, &addr);
        }
        let kind = if ask { "ask" } else { "moved" };
        tracing::debug!(
            kind,
            slot,
            addr = %addr,
            remaining = envelope.remaining_redirects(),
            "following redirect"
        );

        // Snapshot the resolver; a swap after this point does not affect
        // this resolution.
        let resolver = resolver.read().clone();
        let intent = Intent::for_names([envelope.name()]);
        let connection = match resolver.resolve_addr(intent, &addr.host, addr.port).await {
            Ok(connection) => connection,
            Err(resolution_error) => {
                envelope.settle(Err(resolution_error));
                return;
            }
        };

        if envelope.is_settled() {
            // Abandoned while resolving; the pool keeps the connection.
            return;
        }

        let (tx, rx) = oneshot::channel();
        reply = rx;
        envelope.rebind(connection);
        if ask {
            // The priming directive and the command go out as one
            // submission; the directive's completion is discarded.
            let (prime_tx, _prime_rx) = oneshot::channel();
            envelope.connection().submit(vec![
                Dispatch {
                    name: ASKING.to_string(),
                    args: Bytes::new(),
                    reply: prime_tx,
                },
                envelope.dispatch(tx),
            ]);
        } else {
            envelope.connection().submit(vec![envelope.dispatch(tx)]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, SlotId};
    use crate::connection::{NodeAddr, NoopClusterEventListener};
    use crate::error::ResolutionError;
    use crate::error::Result;
    use crate::testing::{FailingResolver, ScriptedConnection, StaticResolver};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn writer(
        default_connection: Arc<ScriptedConnection>,
        resolver: Arc<dyn ConnectionResolver>,
        config: RouterConfig,
    ) -> RedirectingWriter {
        RedirectingWriter::new(
            default_connection,
            resolver,
            Arc::new(NoopClusterEventListener),
            config,
        )
    }

    fn single(name: &str) -> (CommandBatch, crate::command::CompletionHandle) {
        let (cmd, handle) = Command::new(name, Bytes::from_static(b"KEY"));
        (CommandBatch::from(vec![cmd]), handle)
    }

    #[derive(Default)]
    struct RecordingListener {
        moved: Mutex<Vec<(SlotId, NodeAddr)>>,
        asked: Mutex<Vec<(SlotId, NodeAddr)>>,
    }

    impl ClusterEventListener for RecordingListener {
        fn on_moved(&self, slot: SlotId, addr: &NodeAddr) {
            self.moved.lock().push((slot, addr.clone()));
        }

        fn on_ask(&self, slot: SlotId, addr: &NodeAddr) {
            self.asked.lock().push((slot, addr.clone()));
        }
    }

    /// Resolver double whose first `resolve_addr` parks until the gate
    /// fires, so tests can act while a resolution is in flight.
    struct GatingResolver {
        connection: Arc<dyn NodeConnection>,
        gate: Mutex<Option<oneshot::Receiver<()>>>,
        calls: AtomicUsize,
    }

    impl GatingResolver {
        fn new(
            connection: Arc<dyn NodeConnection>,
        ) -> (Arc<Self>, oneshot::Sender<()>) {
            let (gate_tx, gate_rx) = oneshot::channel();
            (
                Arc::new(Self {
                    connection,
                    gate: Mutex::new(Some(gate_rx)),
                    calls: AtomicUsize::new(0),
                }),
                gate_tx,
            )
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ConnectionResolver for GatingResolver {
        async fn resolve_addr(
            &self,
            _intent: Intent,
            _host: &str,
            _port: u16,
        ) -> Result<Arc<dyn NodeConnection>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.gate.lock().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            Ok(self.connection.clone())
        }

        async fn resolve_slot(
            &self,
            _intent: Intent,
            _slot: SlotId,
        ) -> Result<Arc<dyn NodeConnection>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.connection.clone())
        }
    }

    #[tokio::test]
    async fn test_batch_goes_to_default_connection_in_order() {
        let default = Arc::new(ScriptedConnection::with_script([
            Ok(Bytes::from_static(b"a")),
            Ok(Bytes::from_static(b"b")),
            Ok(Bytes::from_static(b"c")),
        ]));
        let resolver = Arc::new(StaticResolver::new(default.clone()));
        let writer = writer(default.clone(), resolver.clone(), RouterConfig::default());

        let mut batch = CommandBatch::new();
        let mut handles = Vec::new();
        for name in ["GET", "SET", "DEL"] {
            let (cmd, handle) = Command::new(name, Bytes::from_static(b"KEY"));
            batch.push(cmd);
            handles.push(handle);
        }
        writer.write(batch);

        for handle in handles {
            handle.wait().await.unwrap();
        }

        // One submit call carrying the whole batch, order preserved.
        assert_eq!(
            default.submitted_names(),
            vec![vec!["GET".to_string(), "SET".to_string(), "DEL".to_string()]]
        );
        // No completion was a redirect, so nothing resolved.
        assert_eq!(resolver.call_count(), 0);
    }

    #[tokio::test]
    async fn test_moved_resubmits_single_command() {
        let default = Arc::new(ScriptedConnection::with_script([Err(
            "MOVED 1234 127.0.0.1:6381".to_string(),
        )]));
        let target = Arc::new(ScriptedConnection::with_script([Ok(Bytes::from_static(
            b"value",
        ))]));
        let resolver = Arc::new(StaticResolver::new(target.clone()));
        let writer = writer(default, resolver.clone(), RouterConfig::default());

        let (batch, handle) = single("GET");
        writer.write(batch);

        let result = handle.wait().await.unwrap();
        assert_eq!(result, Bytes::from_static(b"value"));

        // Exactly one re-submission, a single command, no priming pair.
        assert_eq!(target.submitted_names(), vec![vec!["GET".to_string()]]);
        assert_eq!(
            resolver.addr_calls(),
            vec![(Intent::Read, "127.0.0.1".to_string(), 6381)]
        );
    }

    #[tokio::test]
    async fn test_ask_submits_priming_pair() {
        let default = Arc::new(ScriptedConnection::with_script([Err(
            "ASK 1234 127.0.0.1:6381".to_string(),
        )]));
        let target = Arc::new(ScriptedConnection::with_script([
            Ok(Bytes::from_static(b"OK")),
            Ok(Bytes::from_static(b"value")),
        ]));
        let resolver = Arc::new(StaticResolver::new(target.clone()));
        let writer = writer(default, resolver.clone(), RouterConfig::default());

        let (batch, handle) = single("GET");
        writer.write(batch);

        // Only the original command's result reaches the caller.
        let result = handle.wait().await.unwrap();
        assert_eq!(result, Bytes::from_static(b"value"));

        // One submission carrying the pair, directive first.
        assert_eq!(
            target.submitted_names(),
            vec![vec!["ASKING".to_string(), "GET".to_string()]]
        );
        assert_eq!(resolver.call_count(), 1);
    }

    #[tokio::test]
    async fn test_redirect_intent_recomputed_for_single_command() {
        let default = Arc::new(ScriptedConnection::with_script([Err(
            "MOVED 99 10.0.0.5:7000".to_string(),
        )]));
        let target = Arc::new(ScriptedConnection::with_script([Ok(Bytes::new())]));
        let resolver = Arc::new(StaticResolver::new(target.clone()));
        let writer = writer(default, resolver.clone(), RouterConfig::default());

        let (batch, handle) = single("SET");
        writer.write(batch);
        handle.wait().await.unwrap();

        assert_eq!(
            resolver.addr_calls(),
            vec![(Intent::Write, "10.0.0.5".to_string(), 7000)]
        );
    }

    #[tokio::test]
    async fn test_redirect_exhaustion_stops_resolving() {
        let default = Arc::new(ScriptedConnection::with_script([Err(
            "MOVED 1 127.0.0.1:6381".to_string(),
        )]));
        let target = Arc::new(ScriptedConnection::with_script([
            Err("MOVED 1 127.0.0.1:6382".to_string()),
            Err("MOVED 1 127.0.0.1:6383".to_string()),
        ]));
        let resolver = Arc::new(StaticResolver::new(target.clone()));
        let writer = writer(default, resolver.clone(), RouterConfig::new().with_max_redirects(2));

        let (batch, handle) = single("GET");
        writer.write(batch);

        match handle.wait().await {
            Err(Error::RedirectsExhausted { max: 2 }) => {}
            other => panic!("expected RedirectsExhausted, got {:?}", other),
        }
        // Budget of two means exactly two resolutions, then exhaustion
        // without a further resolver call.
        assert_eq!(resolver.call_count(), 2);
    }

    #[tokio::test]
    async fn test_store_error_propagates_verbatim() {
        let message = "WRONGTYPE Operation against a key holding the wrong kind of value";
        let default = Arc::new(ScriptedConnection::with_script([Err(message.to_string())]));
        let resolver = Arc::new(StaticResolver::new(default.clone()));
        let writer = writer(default, resolver.clone(), RouterConfig::default());

        let (batch, handle) = single("GET");
        writer.write(batch);

        match handle.wait().await {
            Err(Error::Store(msg)) => assert_eq!(msg, message),
            other => panic!("expected Store error, got {:?}", other),
        }
        assert_eq!(resolver.call_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_redirect_surfaces_protocol_error() {
        let default = Arc::new(ScriptedConnection::with_script([Err(
            "MOVED 1234 nocolon".to_string(),
        )]));
        let resolver = Arc::new(StaticResolver::new(default.clone()));
        let writer = writer(default, resolver.clone(), RouterConfig::default());

        let (batch, handle) = single("GET");
        writer.write(batch);

        match handle.wait().await {
            Err(Error::Protocol(_)) => {}
            other => panic!("expected Protocol error, got {:?}", other),
        }
        assert_eq!(resolver.call_count(), 0);
    }

    #[tokio::test]
    async fn test_resolution_failure_surfaces_typed_error() {
        let default = Arc::new(ScriptedConnection::with_script([Err(
            "MOVED 1234 127.0.0.1:6381".to_string(),
        )]));
        let resolver = Arc::new(FailingResolver::new());
        let writer = writer(default, resolver.clone(), RouterConfig::default());

        let (batch, handle) = single("GET");
        writer.write(batch);

        match handle.wait().await {
            Err(Error::Resolution(ResolutionError::ConnectionFailed { .. })) => {}
            other => panic!("expected Resolution error, got {:?}", other),
        }
        assert_eq!(resolver.call_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_forwards_to_default_connection() {
        let default = Arc::new(ScriptedConnection::new());
        let resolver = Arc::new(StaticResolver::new(default.clone()));
        let writer = writer(default.clone(), resolver, RouterConfig::default());

        writer.disconnect();
        writer.disconnect();

        assert_eq!(default.disconnect_count(), 2);
        assert!(default.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_swapped_resolver_serves_subsequent_redirects() {
        let default = Arc::new(ScriptedConnection::with_script([
            Err("MOVED 1 127.0.0.1:6381".to_string()),
            Err("MOVED 1 127.0.0.1:6381".to_string()),
        ]));
        let target_a = Arc::new(ScriptedConnection::with_script([Ok(Bytes::new())]));
        let target_b = Arc::new(ScriptedConnection::with_script([Ok(Bytes::new())]));
        let resolver_a = Arc::new(StaticResolver::new(target_a.clone()));
        let resolver_b = Arc::new(StaticResolver::new(target_b.clone()));
        let writer = writer(default, resolver_a.clone(), RouterConfig::default());

        let (batch, handle) = single("GET");
        writer.write(batch);
        handle.wait().await.unwrap();
        assert_eq!(resolver_a.call_count(), 1);
        assert_eq!(target_a.submissions().len(), 1);

        writer.swap_resolver(resolver_b.clone());

        let (batch, handle) = single("GET");
        writer.write(batch);
        handle.wait().await.unwrap();

        // The old resolver saw no further calls after the swap.
        assert_eq!(resolver_a.call_count(), 1);
        assert_eq!(resolver_b.call_count(), 1);
        assert_eq!(target_b.submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_swap_during_in_flight_resolution_keeps_old_resolver() {
        let default = Arc::new(ScriptedConnection::with_script([Err(
            "MOVED 1 127.0.0.1:6381".to_string(),
        )]));
        let target_old = Arc::new(ScriptedConnection::with_script([Ok(Bytes::from_static(
            b"old",
        ))]));
        let target_new = Arc::new(ScriptedConnection::new());
        let (resolver_old, gate) = GatingResolver::new(target_old.clone());
        let resolver_new = Arc::new(StaticResolver::new(target_new.clone()));
        let writer = writer(default, resolver_old.clone(), RouterConfig::default());

        let (batch, handle) = single("GET");
        writer.write(batch);

        // Wait until the redirect's resolution is parked inside the old
        // resolver, then swap underneath it.
        while resolver_old.call_count() == 0 {
            tokio::task::yield_now().await;
        }
        writer.swap_resolver(resolver_new.clone());
        gate.send(()).unwrap();

        let result = handle.wait().await.unwrap();
        assert_eq!(result, Bytes::from_static(b"old"));

        // The in-flight resolution completed against the old resolver's
        // connection; the new resolver never saw a call.
        assert_eq!(target_old.submitted_names(), vec![vec!["GET".to_string()]]);
        assert_eq!(resolver_new.call_count(), 0);
        assert!(target_new.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_command_is_not_resubmitted() {
        let default = Arc::new(ScriptedConnection::with_script([Err(
            "MOVED 1 127.0.0.1:6381".to_string(),
        )]));
        let target = Arc::new(ScriptedConnection::new());
        let (resolver, gate) = GatingResolver::new(target.clone());
        let writer = writer(default, resolver.clone(), RouterConfig::default());

        let (batch, handle) = single("GET");
        writer.write(batch);

        // Abandon while the resolution is parked, then let it complete.
        while resolver.call_count() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(handle.abandon());
        gate.send(()).unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        // The resolution was allowed to finish, but the settled command
        // was not dispatched to the resolved connection.
        assert!(target.submissions().is_empty());
        match handle.wait().await {
            Err(Error::Cancelled) => {}
            other => panic!("expected Cancelled, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_listener_sees_redirect_events() {
        let default = Arc::new(ScriptedConnection::with_script([
            Err("MOVED 1234 127.0.0.1:6381".to_string()),
            Err("ASK 77 10.0.0.9:7001".to_string()),
        ]));
        let target = Arc::new(ScriptedConnection::with_script([
            Ok(Bytes::new()),
            Ok(Bytes::new()),
            Ok(Bytes::new()),
        ]));
        let resolver = Arc::new(StaticResolver::new(target.clone()));
        let listener = Arc::new(RecordingListener::default());
        let writer = RedirectingWriter::new(
            default,
            resolver,
            listener.clone(),
            RouterConfig::default(),
        );

        let mut batch = CommandBatch::new();
        let mut handles = Vec::new();
        for _ in 0..2 {
            let (cmd, handle) = Command::new("GET", Bytes::from_static(b"KEY"));
            batch.push(cmd);
            handles.push(handle);
        }
        writer.write(batch);
        for handle in handles {
            handle.wait().await.unwrap();
        }

        assert_eq!(
            listener.moved.lock().clone(),
            vec![(1234, NodeAddr::new("127.0.0.1", 6381))]
        );
        assert_eq!(
            listener.asked.lock().clone(),
            vec![(77, NodeAddr::new("10.0.0.9", 7001))]
        );
    }

    #[tokio::test]
    async fn test_closed_connection_settles_command() {
        let default = Arc::new(ScriptedConnection::new());
        let resolver = Arc::new(StaticResolver::new(default.clone()));
        let writer = writer(default.clone(), resolver, RouterConfig::default());

        let (batch, handle) = single("GET");
        writer.write(batch);

        // Unscripted dispatch parks its reply; dropping it simulates the
        // connection closing under the command.
        assert_eq!(default.parked_count(), 1);
        default.close_parked();

        match handle.wait().await {
            Err(Error::ConnectionClosed) => {}
            other => panic!("expected ConnectionClosed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_manually_completed_redirect_round_trip() {
        let default = Arc::new(ScriptedConnection::new());
        let resolver = Arc::new(StaticResolver::new(default.clone()));
        let writer = writer(default.clone(), resolver, RouterConfig::default());

        let (batch, handle) = single("GET");
        writer.write(batch);

        assert!(default.complete_parked(Err("MOVED 1 127.0.0.1:6381".to_string())));

        // The driver task resolves and re-parks the resubmission.
        while default.parked_count() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(default.complete_parked(Ok(Bytes::from_static(b"v"))));

        let result = handle.wait().await.unwrap();
        assert_eq!(result, Bytes::from_static(b"v"));
    }
}
