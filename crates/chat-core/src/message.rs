//! Chat message types.
//!
//! A [`Message`] is an immutable description of one chat event. The broker
//! never validates or rewrites its fields; it only reads `broadcast` and
//! `recipient` to decide where the message goes.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A user identifier.
pub type UserId = String;

/// Current Unix time in milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// One chat event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Sending user.
    pub sender: UserId,
    /// Receiving user. Ignored when `broadcast` is set.
    #[serde(default)]
    pub recipient: UserId,
    /// Message body.
    pub content: String,
    /// Deliver to every registered user.
    #[serde(default)]
    pub broadcast: bool,
    /// Caller-assigned timestamp.
    pub timestamp: i64,
}

impl Message {
    /// Create a direct message addressed to `recipient`.
    #[must_use]
    pub fn direct(
        sender: impl Into<UserId>,
        recipient: impl Into<UserId>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
            content: content.into(),
            broadcast: false,
            timestamp: now_millis(),
        }
    }

    /// Create a message for every registered user.
    #[must_use]
    pub fn broadcast(sender: impl Into<UserId>, content: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            recipient: UserId::new(),
            content: content.into(),
            broadcast: true,
            timestamp: now_millis(),
        }
    }

    /// Replace the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Whether the router has anyone to hand this message to.
    ///
    /// A direct message with an empty recipient can never be delivered.
    #[must_use]
    pub fn is_routable(&self) -> bool {
        self.broadcast || !self.recipient.is_empty()
    }
}
