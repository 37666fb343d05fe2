//! Simulated chat sessions.
//!
//! Each user session registers an inbox, reads from it until the broker
//! closes it, and optionally leaves and rejoins on a fixed cadence. Producers
//! alternate between broadcasts and direct messages.

use crate::config::SimulationConfig;
use chatcore::{inbox, Broker, BrokerError, CancellationToken, InboxReceiver, Message};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Counters collected over a simulation run.
#[derive(Debug, Default)]
pub struct SimStats {
    /// Messages accepted by the broker.
    pub sent: AtomicU64,
    /// Messages refused by the broker.
    pub rejected: AtomicU64,
    /// Messages read from inboxes.
    pub received: AtomicU64,
    /// Times a session saw its inbox closed.
    pub inbox_closures: AtomicU64,
}

impl SimStats {
    /// Snapshot as `(sent, rejected, received, inbox_closures)`.
    #[must_use]
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.sent.load(Ordering::Relaxed),
            self.rejected.load(Ordering::Relaxed),
            self.received.load(Ordering::Relaxed),
            self.inbox_closures.load(Ordering::Relaxed),
        )
    }
}

fn user_name(index: usize) -> String {
    format!("user-{index}")
}

/// Run sessions and producers against `broker` until `stop` is cancelled.
///
/// The broker must already be running.
pub async fn run(
    broker: Broker,
    config: SimulationConfig,
    stop: CancellationToken,
) -> Arc<SimStats> {
    let stats = Arc::new(SimStats::default());
    let mut tasks = JoinSet::new();

    for i in 0..config.users {
        tasks.spawn(session(
            broker.clone(),
            user_name(i),
            config.clone(),
            stop.clone(),
            Arc::clone(&stats),
        ));
    }
    for p in 0..config.producers {
        tasks.spawn(producer(
            broker.clone(),
            p,
            config.clone(),
            stop.clone(),
            Arc::clone(&stats),
        ));
    }

    info!(
        users = config.users,
        producers = config.producers,
        "Simulation started"
    );

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!("Simulation task failed: {}", e);
        }
    }

    let (sent, rejected, received, closures) = stats.snapshot();
    info!(sent, rejected, received, closures, "Simulation finished");
    stats
}

async fn session(
    broker: Broker,
    user: String,
    config: SimulationConfig,
    stop: CancellationToken,
    stats: Arc<SimStats>,
) {
    loop {
        let (tx, rx) = inbox(config.inbox_capacity.max(1));
        broker.register_user(user.clone(), tx);
        debug!(user = %user, "Session joined");

        let left = match config.session() {
            Some(length) => {
                let leave = tokio::time::sleep(length);
                tokio::pin!(leave);
                tokio::select! {
                    () = drain(rx, &stats) => false,
                    () = &mut leave => true,
                    () = stop.cancelled() => false,
                }
            }
            None => {
                tokio::select! {
                    () = drain(rx, &stats) => false,
                    () = stop.cancelled() => false,
                }
            }
        };

        broker.unregister_user(&user);
        if !left || stop.is_cancelled() {
            debug!(user = %user, "Session ended");
            return;
        }
        debug!(user = %user, "Session left, rejoining");
    }
}

/// Read until the broker closes the inbox.
async fn drain(mut rx: InboxReceiver, stats: &SimStats) {
    while let Some(message) = rx.recv().await {
        stats.received.fetch_add(1, Ordering::Relaxed);
        debug!(from = %message.sender, content = %message.content, "Received");
    }
    stats.inbox_closures.fetch_add(1, Ordering::Relaxed);
}

async fn producer(
    broker: Broker,
    index: usize,
    config: SimulationConfig,
    stop: CancellationToken,
    stats: Arc<SimStats>,
) {
    let sender = format!("producer-{index}");
    let mut ticker = tokio::time::interval(config.message_interval());
    let mut seq: u64 = 0;

    loop {
        tokio::select! {
            () = stop.cancelled() => return,
            _ = ticker.tick() => {}
        }

        seq += 1;
        let direct = config.direct_every > 0 && seq % config.direct_every == 0;
        let message = if direct && config.users > 0 {
            let target = user_name((seq as usize + index) % config.users);
            Message::direct(sender.as_str(), target, format!("direct #{seq}"))
        } else {
            Message::broadcast(sender.as_str(), format!("broadcast #{seq}"))
        };

        match broker.send(message).await {
            Ok(()) => {
                stats.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e @ (BrokerError::Cancelled | BrokerError::BrokerShutdown)) => {
                stats.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(producer = %sender, error = %e, "Producer stopping");
                return;
            }
            Err(e) => {
                stats.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(producer = %sender, error = %e, "Send failed");
            }
        }
    }
}
