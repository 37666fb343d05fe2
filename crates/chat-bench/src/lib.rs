//! Shared fixtures for chatcore benchmarks.

use chatcore::{inbox, InboxReceiver, Registry, Router};
use std::sync::Arc;

/// Build a router with `users` registered inboxes of `capacity` each.
///
/// The receivers must be kept alive, otherwise deliveries see closed inboxes.
#[must_use]
pub fn router_with_users(users: usize, capacity: usize) -> (Router, Vec<InboxReceiver>) {
    let registry = Arc::new(Registry::new());
    let receivers = (0..users)
        .map(|i| {
            let (tx, rx) = inbox(capacity);
            registry.register(format!("user-{i}"), tx);
            rx
        })
        .collect();
    (Router::new(registry), receivers)
}

/// Empty every receiver without waiting.
pub fn drain_all(receivers: &mut [InboxReceiver]) {
    for rx in receivers {
        while rx.try_recv().is_ok() {}
    }
}
