//! The message broker.
//!
//! Producers hand messages to [`Broker::send`], which enqueues them into a
//! bounded input queue. A single router task, started with [`Broker::run`]
//! or [`Broker::spawn`], drains the queue and delivers into the inboxes
//! registered with [`Broker::register_user`].
//!
//! ```text
//! producers ──send──▶ [input queue] ──▶ router loop ──try_send──▶ inboxes
//! ```
//!
//! The broker follows `Running -> Draining -> Closed`: cancelling its token
//! moves it to `Draining`, and it is `Closed` once the router loop exits.

use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::message::{Message, UserId};
use crate::metrics;
use crate::registry::{Inbox, Registry};
use crate::router::{run_loop, Router};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Broker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    /// Accepting and routing messages.
    Running,
    /// Cancelled, router loop not yet exited.
    Draining,
    /// Router loop has exited. Terminal.
    Closed,
}

#[derive(Debug)]
struct Inner {
    input: mpsc::Sender<Message>,
    /// Taken by the first call to `run` or `spawn`.
    pending_input: Mutex<Option<mpsc::Receiver<Message>>>,
    registry: Arc<Registry>,
    cancel: CancellationToken,
    closed: CancellationToken,
}

/// In-process chat message broker.
///
/// Cloning is cheap; clones share the same queue, registry and lifecycle.
#[derive(Debug, Clone)]
pub struct Broker {
    inner: Arc<Inner>,
}

impl Broker {
    /// Create a broker bound to `context` with default configuration.
    ///
    /// The broker listens on a child of `context`: cancelling `context`
    /// shuts the broker down, [`Broker::shutdown`] does not cancel `context`.
    #[must_use]
    pub fn new(context: &CancellationToken) -> Self {
        Self::with_config(context, BrokerConfig::default())
    }

    /// Create a broker with custom configuration.
    #[must_use]
    pub fn with_config(context: &CancellationToken, config: BrokerConfig) -> Self {
        let capacity = config.effective_queue_capacity();
        let (input, pending_input) = mpsc::channel(capacity);
        debug!(queue_capacity = capacity, "Creating broker");

        Self {
            inner: Arc::new(Inner {
                input,
                pending_input: Mutex::new(Some(pending_input)),
                registry: Arc::new(Registry::new()),
                cancel: context.child_token(),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Run the router loop on the current task until the broker is closed.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AlreadyRunning`] if the loop was started before.
    pub async fn run(&self) -> Result<(), BrokerError> {
        let input = self.take_input()?;
        info!("Broker running");
        run_loop(
            Router::new(Arc::clone(&self.inner.registry)),
            input,
            self.inner.cancel.clone(),
            self.inner.closed.clone(),
        )
        .await;
        info!("Broker closed");
        Ok(())
    }

    /// Run the router loop on a new tokio task.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AlreadyRunning`] if the loop was started before.
    pub fn spawn(&self) -> Result<JoinHandle<()>, BrokerError> {
        let input = self.take_input()?;
        let router = Router::new(Arc::clone(&self.inner.registry));
        let cancel = self.inner.cancel.clone();
        let closed = self.inner.closed.clone();
        info!("Broker spawned");
        Ok(tokio::spawn(run_loop(router, input, cancel, closed)))
    }

    fn take_input(&self) -> Result<mpsc::Receiver<Message>, BrokerError> {
        self.inner
            .pending_input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(BrokerError::AlreadyRunning)
    }

    /// Submit a message for routing.
    ///
    /// Waits while the input queue is full. Success means the message entered
    /// the queue, not that anyone received it.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::BrokerShutdown`] if the router loop has exited, or
    ///   exits while waiting.
    /// - [`BrokerError::Cancelled`] if the context is cancelled, or gets
    ///   cancelled while waiting for queue space.
    pub async fn send(&self, message: Message) -> Result<(), BrokerError> {
        self.check_accepting()?;

        let result = tokio::select! {
            biased;

            () = self.inner.closed.cancelled() => Err(BrokerError::BrokerShutdown),
            () = self.inner.cancel.cancelled() => Err(BrokerError::Cancelled),
            sent = self.inner.input.send(message) => {
                sent.map_err(|_| BrokerError::BrokerShutdown)
            }
        };

        record_send(result)
    }

    /// Submit a message without waiting for queue space.
    ///
    /// # Errors
    ///
    /// Same as [`Broker::send`], plus [`BrokerError::QueueFull`] when the
    /// input queue has no free slot.
    pub fn try_send(&self, message: Message) -> Result<(), BrokerError> {
        self.check_accepting()?;

        let result = self.inner.input.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BrokerError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => BrokerError::BrokerShutdown,
        });

        record_send(result)
    }

    fn check_accepting(&self) -> Result<(), BrokerError> {
        let err = if self.inner.closed.is_cancelled() {
            BrokerError::BrokerShutdown
        } else if self.inner.cancel.is_cancelled() {
            BrokerError::Cancelled
        } else {
            return Ok(());
        };
        metrics::record_rejected(err.as_label());
        Err(err)
    }

    /// Register `inbox` under `id`.
    ///
    /// A previous registration under the same id is replaced and its inbox
    /// closed. Returns `true` if that happened.
    pub fn register_user(&self, id: impl Into<UserId>, inbox: Inbox) -> bool {
        let replaced = self.inner.registry.register(id, inbox);
        metrics::set_registered_users(self.inner.registry.len());
        replaced
    }

    /// Remove `id` and close its inbox. Unknown ids are ignored.
    ///
    /// Returns `true` if the user was registered.
    pub fn unregister_user(&self, id: &str) -> bool {
        let removed = self.inner.registry.unregister(id);
        if removed {
            metrics::set_registered_users(self.inner.registry.len());
        }
        removed
    }

    /// Check if `id` is registered.
    #[must_use]
    pub fn is_registered(&self, id: &str) -> bool {
        self.inner.registry.contains(id)
    }

    /// Number of registered users.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Cancel this broker.
    ///
    /// The router loop exits at its next wait and queued messages are
    /// discarded. Idempotent.
    pub fn shutdown(&self) {
        if !self.inner.cancel.is_cancelled() {
            info!("Broker shutdown requested");
        }
        self.inner.cancel.cancel();
    }

    /// Wait until the router loop has exited.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await;
    }

    /// Check if the router loop has exited.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> BrokerState {
        if self.inner.closed.is_cancelled() {
            BrokerState::Closed
        } else if self.inner.cancel.is_cancelled() {
            BrokerState::Draining
        } else {
            BrokerState::Running
        }
    }
}

fn record_send(result: Result<(), BrokerError>) -> Result<(), BrokerError> {
    match result {
        Ok(()) => metrics::record_accepted(),
        Err(e) => metrics::record_rejected(e.as_label()),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{inbox, InboxReceiver};
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    /// Register a roomy inbox and return it. A direct message reaching it
    /// after other sends proves the router has processed those first.
    fn marker_inbox(broker: &Broker) -> InboxReceiver {
        let (tx, rx) = inbox(64);
        broker.register_user("marker", tx);
        rx
    }

    /// Wait until everything sent before this call has been routed.
    ///
    /// The marker inbox also receives broadcasts; those are skipped.
    async fn flush(broker: &Broker, marker: &mut InboxReceiver) {
        broker
            .send(Message::direct("test", "marker", "flush"))
            .await
            .unwrap();
        loop {
            let msg = timeout(WAIT, marker.recv()).await.unwrap().unwrap();
            if !msg.broadcast && msg.content == "flush" {
                return;
            }
        }
    }

    #[tokio::test]
    async fn test_broadcast_drops_for_full_inboxes() {
        let ctx = CancellationToken::new();
        let broker = Broker::new(&ctx);
        let (alice_tx, mut alice) = inbox(1);
        let (bob_tx, mut bob) = inbox(1);
        broker.register_user("alice", alice_tx);
        broker.register_user("bob", bob_tx);
        let mut marker = marker_inbox(&broker);
        broker.spawn().unwrap();

        broker.send(Message::broadcast("carol", "hi")).await.unwrap();
        broker.send(Message::broadcast("carol", "again")).await.unwrap();
        flush(&broker, &mut marker).await;

        assert_eq!(alice.try_recv().unwrap().content, "hi");
        assert!(alice.try_recv().is_err());
        assert_eq!(bob.try_recv().unwrap().content, "hi");
        assert!(bob.try_recv().is_err());

        ctx.cancel();
    }

    #[tokio::test]
    async fn test_direct_to_unknown_user_is_silently_dropped() {
        let ctx = CancellationToken::new();
        let broker = Broker::new(&ctx);
        let (alice_tx, mut alice) = inbox(4);
        broker.register_user("alice", alice_tx);
        let mut marker = marker_inbox(&broker);
        broker.spawn().unwrap();

        let sent = timeout(WAIT, broker.send(Message::direct("alice", "bob", "hey"))).await;
        assert_eq!(sent.unwrap(), Ok(()));
        flush(&broker, &mut marker).await;

        assert!(alice.try_recv().is_err());
        ctx.cancel();
    }

    #[tokio::test]
    async fn test_direct_message_reaches_only_recipient() {
        let ctx = CancellationToken::new();
        let broker = Broker::new(&ctx);
        let (alice_tx, mut alice) = inbox(4);
        let (bob_tx, mut bob) = inbox(4);
        broker.register_user("alice", alice_tx);
        broker.register_user("bob", bob_tx);
        broker.spawn().unwrap();

        broker
            .send(Message::direct("alice", "bob", "secret").with_timestamp(7))
            .await
            .unwrap();

        let msg = timeout(WAIT, bob.recv()).await.unwrap().unwrap();
        assert_eq!(msg.sender, "alice");
        assert_eq!(msg.content, "secret");
        assert_eq!(msg.timestamp, 7);
        assert!(alice.try_recv().is_err());
        ctx.cancel();
    }

    #[tokio::test]
    async fn test_unregister_closes_inbox_and_stops_delivery() {
        let ctx = CancellationToken::new();
        let broker = Broker::new(&ctx);
        let (alice_tx, mut alice) = inbox(4);
        broker.register_user("alice", alice_tx);
        let mut marker = marker_inbox(&broker);
        broker.spawn().unwrap();

        assert!(broker.unregister_user("alice"));
        broker.send(Message::broadcast("bob", "all")).await.unwrap();
        broker
            .send(Message::direct("bob", "alice", "you"))
            .await
            .unwrap();
        flush(&broker, &mut marker).await;

        assert!(alice.recv().await.is_none());
        assert!(!broker.is_registered("alice"));
        ctx.cancel();
    }

    #[tokio::test]
    async fn test_unregister_unknown_is_noop() {
        let ctx = CancellationToken::new();
        let broker = Broker::new(&ctx);
        let (tx, _rx) = inbox(1);
        broker.register_user("alice", tx);

        assert!(!broker.unregister_user("nobody"));
        assert!(broker.unregister_user("alice"));
        assert!(!broker.unregister_user("alice"));
        assert_eq!(broker.user_count(), 0);
    }

    #[tokio::test]
    async fn test_reregister_closes_superseded_inbox() {
        let ctx = CancellationToken::new();
        let broker = Broker::new(&ctx);
        let (old_tx, mut old_rx) = inbox(4);
        let (new_tx, mut new_rx) = inbox(4);
        broker.register_user("alice", old_tx);
        assert!(broker.register_user("alice", new_tx));
        broker.spawn().unwrap();

        broker
            .send(Message::direct("bob", "alice", "hello"))
            .await
            .unwrap();

        assert!(old_rx.recv().await.is_none());
        let msg = timeout(WAIT, new_rx.recv()).await.unwrap().unwrap();
        assert_eq!(msg.content, "hello");
        ctx.cancel();
    }

    #[tokio::test]
    async fn test_cancel_discards_queued_messages() {
        let ctx = CancellationToken::new();
        let broker = Broker::with_config(&ctx, BrokerConfig::default().with_queue_capacity(8));
        let (alice_tx, mut alice) = inbox(8);
        broker.register_user("alice", alice_tx);

        for i in 0..5 {
            broker
                .send(Message::broadcast("bob", format!("queued {i}")))
                .await
                .unwrap();
        }
        ctx.cancel();
        assert_eq!(broker.state(), BrokerState::Draining);

        timeout(WAIT, broker.run()).await.unwrap().unwrap();

        assert!(broker.is_closed());
        assert_eq!(broker.state(), BrokerState::Closed);
        assert!(alice.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_after_close_reports_shutdown() {
        let ctx = CancellationToken::new();
        let broker = Broker::new(&ctx);
        let handle = broker.spawn().unwrap();

        broker.shutdown();
        timeout(WAIT, handle).await.unwrap().unwrap();
        timeout(WAIT, broker.closed()).await.unwrap();

        let result = timeout(WAIT, broker.send(Message::broadcast("alice", "late"))).await;
        assert_eq!(result.unwrap(), Err(BrokerError::BrokerShutdown));
        assert_eq!(
            broker.try_send(Message::broadcast("alice", "late")),
            Err(BrokerError::BrokerShutdown)
        );
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_send_after_cancel_reports_cancelled() {
        let ctx = CancellationToken::new();
        let broker = Broker::new(&ctx);

        ctx.cancel();
        assert_eq!(
            broker.send(Message::broadcast("alice", "late")).await,
            Err(BrokerError::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_blocked_send_unblocks_on_cancel() {
        let ctx = CancellationToken::new();
        let broker = Broker::with_config(&ctx, BrokerConfig::default().with_queue_capacity(1));

        broker.send(Message::broadcast("alice", "fills")).await.unwrap();
        assert_eq!(
            broker.try_send(Message::broadcast("alice", "full")),
            Err(BrokerError::QueueFull)
        );

        let blocked = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.send(Message::broadcast("alice", "waits")).await })
        };
        tokio::task::yield_now().await;
        assert!(!blocked.is_finished());

        ctx.cancel();
        let result = timeout(WAIT, blocked).await.unwrap().unwrap();
        assert_eq!(result, Err(BrokerError::Cancelled));
    }

    #[tokio::test]
    async fn test_run_twice_is_rejected() {
        let ctx = CancellationToken::new();
        let broker = Broker::new(&ctx);
        let handle = broker.spawn().unwrap();

        assert_eq!(broker.run().await, Err(BrokerError::AlreadyRunning));
        assert!(matches!(broker.spawn(), Err(BrokerError::AlreadyRunning)));

        ctx.cancel();
        timeout(WAIT, handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_register_works_in_every_state() {
        let ctx = CancellationToken::new();
        let broker = Broker::new(&ctx);
        let (tx, _rx) = inbox(1);
        assert_eq!(broker.state(), BrokerState::Running);
        broker.register_user("early", tx);

        broker.shutdown();
        broker.run().await.unwrap();

        let (tx, mut rx) = inbox(1);
        broker.register_user("late", tx);
        assert_eq!(broker.user_count(), 2);
        assert!(broker.unregister_user("late"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_producers_keep_per_producer_order() {
        let ctx = CancellationToken::new();
        let broker = Broker::with_config(&ctx, BrokerConfig::default().with_queue_capacity(4));
        let (tx, mut rx) = inbox(1024);
        broker.register_user("sink", tx);
        broker.spawn().unwrap();

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let broker = broker.clone();
                tokio::spawn(async move {
                    for i in 0..50 {
                        let msg = Message::direct(format!("p{p}"), "sink", i.to_string());
                        broker.send(msg).await.unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            timeout(WAIT, producer).await.unwrap().unwrap();
        }

        let mut last = std::collections::HashMap::new();
        for _ in 0..200 {
            let msg = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
            let n: i32 = msg.content.parse().unwrap();
            let prev = last.insert(msg.sender.clone(), n).unwrap_or(-1);
            assert_eq!(n, prev + 1);
        }
        ctx.cancel();
    }
}
