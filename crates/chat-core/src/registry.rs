//! User registry.
//!
//! Maps user identifiers to the sending half of each user's inbox. The
//! consumer keeps the receiving half and reads from it independently of the
//! broker.

use crate::message::{Message, UserId};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Sending half of a user's inbox, held by the registry.
pub type Inbox = mpsc::Sender<Arc<Message>>;

/// Receiving half of a user's inbox, held by the consumer.
pub type InboxReceiver = mpsc::Receiver<Arc<Message>>;

/// Create a bounded inbox pair.
///
/// # Panics
///
/// Panics if `capacity` is zero.
#[must_use]
pub fn inbox(capacity: usize) -> (Inbox, InboxReceiver) {
    mpsc::channel(capacity)
}

/// Result of a single non-blocking delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The message is in the inbox.
    Delivered,
    /// The inbox buffer was full.
    Full,
    /// The consumer dropped its receiver.
    Closed,
}

/// Try to put `message` into `inbox` without waiting.
pub fn deliver(inbox: &Inbox, message: &Arc<Message>) -> Delivery {
    match inbox.try_send(Arc::clone(message)) {
        Ok(()) => Delivery::Delivered,
        Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
        Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
    }
}

/// Concurrent map from user identifier to inbox.
///
/// Reads (lookup, broadcast iteration) take shared shard locks and run
/// concurrently; register and unregister take the shard's exclusive lock.
#[derive(Debug, Default)]
pub struct Registry {
    users: DashMap<UserId, Inbox>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `inbox` under `id`.
    ///
    /// An existing entry for `id` is replaced and its inbox sender dropped,
    /// so the superseded consumer sees its stream end. Returns `true` if an
    /// entry was replaced.
    pub fn register(&self, id: impl Into<UserId>, inbox: Inbox) -> bool {
        let id = id.into();
        match self.users.insert(id.clone(), inbox) {
            Some(previous) => {
                drop(previous);
                debug!(user = %id, "Replaced existing registration, previous inbox closed");
                true
            }
            None => {
                debug!(user = %id, "User registered");
                false
            }
        }
    }

    /// Remove the entry for `id` and close its inbox.
    ///
    /// Returns `true` if the user was registered.
    pub fn unregister(&self, id: &str) -> bool {
        match self.users.remove(id) {
            Some((_, inbox)) => {
                drop(inbox);
                debug!(user = %id, "User unregistered, inbox closed");
                true
            }
            None => false,
        }
    }

    /// Look up the inbox registered under `id`.
    ///
    /// # Notes
    ///
    /// The returned sender is a clone. While any clone is alive,
    /// [`Registry::unregister`] cannot close the consumer's inbox, so callers
    /// should drop it as soon as they are done with it.
    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<Inbox> {
        self.users.get(id).map(|entry| entry.value().clone())
    }

    /// Attempt delivery to `id` while holding the entry's read lock.
    ///
    /// Returns `None` if `id` is not registered.
    pub fn deliver_to(&self, id: &str, message: &Arc<Message>) -> Option<Delivery> {
        self.users.get(id).map(|entry| deliver(entry.value(), message))
    }

    /// Call `f` for every registered user.
    ///
    /// Registrations that race with the iteration may or may not be seen.
    pub fn for_each(&self, mut f: impl FnMut(&str, &Inbox)) {
        for entry in self.users.iter() {
            f(entry.key(), entry.value());
        }
    }

    /// Check if `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.users.contains_key(id)
    }

    /// Number of registered users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Check if no users are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
