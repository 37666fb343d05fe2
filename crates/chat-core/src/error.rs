//! Broker errors.

use thiserror::Error;

/// Errors returned when the broker refuses to accept a message or start.
///
/// Failed deliveries are never reported here; a message that could not reach
/// a recipient is dropped silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// The broker's context was cancelled.
    #[error("broker context cancelled")]
    Cancelled,

    /// The router loop has exited.
    #[error("broker has been shut down")]
    BrokerShutdown,

    /// The input queue is full (non-blocking send only).
    #[error("broker input queue is full")]
    QueueFull,

    /// The router loop was already started.
    #[error("broker router loop already started")]
    AlreadyRunning,
}

impl BrokerError {
    /// Short label used for metrics.
    #[must_use]
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::BrokerShutdown => "shutdown",
            Self::QueueFull => "queue_full",
            Self::AlreadyRunning => "already_running",
        }
    }
}
