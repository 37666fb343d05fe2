//! Broker instrumentation.
//!
//! Records through the `metrics` facade; nothing is exported unless the host
//! process installs a recorder.

use metrics::{counter, gauge, histogram};

/// Metric names.
pub mod names {
    pub const MESSAGES_ACCEPTED: &str = "chatcore_messages_accepted_total";
    pub const MESSAGES_REJECTED: &str = "chatcore_messages_rejected_total";
    pub const DELIVERIES_TOTAL: &str = "chatcore_deliveries_total";
    pub const DROPS_TOTAL: &str = "chatcore_drops_total";
    pub const USERS_REGISTERED: &str = "chatcore_users_registered";
    pub const ROUTE_SECONDS: &str = "chatcore_route_seconds";
}

/// Drop reasons used as the `reason` label.
pub mod reasons {
    pub const INBOX_FULL: &str = "inbox_full";
    pub const INBOX_CLOSED: &str = "inbox_closed";
    pub const UNKNOWN_RECIPIENT: &str = "unknown_recipient";
    pub const NO_RECIPIENT: &str = "no_recipient";
}

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    metrics::describe_counter!(
        names::MESSAGES_ACCEPTED,
        "Messages accepted into the input queue"
    );
    metrics::describe_counter!(
        names::MESSAGES_REJECTED,
        "Messages refused by send, by reason"
    );
    metrics::describe_counter!(names::DELIVERIES_TOTAL, "Messages placed into an inbox");
    metrics::describe_counter!(names::DROPS_TOTAL, "Per-recipient drops, by reason");
    metrics::describe_gauge!(names::USERS_REGISTERED, "Currently registered users");
    metrics::describe_histogram!(
        names::ROUTE_SECONDS,
        "Time spent routing one message in seconds"
    );
}

pub(crate) fn record_accepted() {
    counter!(names::MESSAGES_ACCEPTED).increment(1);
}

pub(crate) fn record_rejected(reason: &'static str) {
    counter!(names::MESSAGES_REJECTED, "reason" => reason).increment(1);
}

pub(crate) fn record_deliveries(count: usize) {
    if count > 0 {
        counter!(names::DELIVERIES_TOTAL).increment(count as u64);
    }
}

pub(crate) fn record_drop(reason: &'static str) {
    counter!(names::DROPS_TOTAL, "reason" => reason).increment(1);
}

pub(crate) fn set_registered_users(count: usize) {
    gauge!(names::USERS_REGISTERED).set(count as f64);
}

pub(crate) fn record_route_latency(seconds: f64) {
    histogram!(names::ROUTE_SECONDS).record(seconds);
}
