//! Message routing.
//!
//! [`Router`] makes the delivery decision for one message. [`run_loop`] is the
//! single task that feeds it from the input queue until cancellation. All
//! deliveries are non-blocking: a full or closed inbox costs that recipient
//! the message and nothing else.

use crate::message::Message;
use crate::metrics::{self, reasons};
use crate::registry::{deliver, Delivery, Registry};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

/// What happened to one routed message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteOutcome {
    /// Inboxes the message was placed into.
    pub delivered: usize,
    /// Recipients that lost the message.
    pub dropped: usize,
}

/// Routing decisions over a shared registry.
#[derive(Debug, Clone)]
pub struct Router {
    registry: Arc<Registry>,
}

impl Router {
    /// Create a router over `registry`.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Route one message.
    pub fn route(&self, message: &Arc<Message>) -> RouteOutcome {
        if message.broadcast {
            self.broadcast(message)
        } else if message.recipient.is_empty() {
            metrics::record_drop(reasons::NO_RECIPIENT);
            trace!(sender = %message.sender, "Dropped direct message without recipient");
            RouteOutcome {
                delivered: 0,
                dropped: 1,
            }
        } else {
            self.direct(message)
        }
    }

    fn broadcast(&self, message: &Arc<Message>) -> RouteOutcome {
        let mut outcome = RouteOutcome::default();
        self.registry.for_each(|user, inbox| {
            let delivery = deliver(inbox, message);
            tally(&mut outcome, delivery);
            if delivery != Delivery::Delivered {
                trace!(user = %user, ?delivery, "Broadcast skipped recipient");
            }
        });
        trace!(
            sender = %message.sender,
            delivered = outcome.delivered,
            dropped = outcome.dropped,
            "Broadcast routed"
        );
        outcome
    }

    fn direct(&self, message: &Arc<Message>) -> RouteOutcome {
        let mut outcome = RouteOutcome::default();
        match self.registry.deliver_to(&message.recipient, message) {
            Some(delivery) => tally(&mut outcome, delivery),
            None => {
                metrics::record_drop(reasons::UNKNOWN_RECIPIENT);
                outcome.dropped = 1;
            }
        }
        trace!(
            sender = %message.sender,
            recipient = %message.recipient,
            delivered = outcome.delivered,
            "Direct message routed"
        );
        outcome
    }
}

fn tally(outcome: &mut RouteOutcome, delivery: Delivery) {
    match delivery {
        Delivery::Delivered => outcome.delivered += 1,
        Delivery::Full => {
            metrics::record_drop(reasons::INBOX_FULL);
            outcome.dropped += 1;
        }
        Delivery::Closed => {
            metrics::record_drop(reasons::INBOX_CLOSED);
            outcome.dropped += 1;
        }
    }
}

/// Route messages from `input` until `cancel` fires.
///
/// On exit the input receiver is dropped, discarding anything still queued,
/// and `closed` is cancelled.
pub async fn run_loop(
    router: Router,
    mut input: mpsc::Receiver<Message>,
    cancel: CancellationToken,
    closed: CancellationToken,
) {
    info!("Router loop started");

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            next = input.recv() => match next {
                Some(message) => {
                    let started = Instant::now();
                    let outcome = router.route(&Arc::new(message));
                    metrics::record_deliveries(outcome.delivered);
                    metrics::record_route_latency(started.elapsed().as_secs_f64());
                }
                // The broker holds a sender for its whole life, so this only
                // happens if the broker was dropped without cancelling.
                None => break,
            },
        }
    }

    let discarded = input.len();
    input.close();
    drop(input);
    closed.cancel();
    info!(discarded, "Router loop stopped");
}
