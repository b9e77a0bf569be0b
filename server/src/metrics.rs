//! Server metrics.

use metriken::{Counter, Gauge, metric};

#[metric(
    name = "connections_accepted",
    description = "Total number of connections accepted"
)]
pub static CONNECTIONS_ACCEPTED: Counter = Counter::new();

#[metric(
    name = "connections_active",
    description = "Number of currently open connections"
)]
pub static CONNECTIONS_ACTIVE: Gauge = Gauge::new();

#[metric(
    name = "connections_closed",
    description = "Total number of connections closed"
)]
pub static CONNECTIONS_CLOSED: Counter = Counter::new();

#[metric(name = "requests_received", description = "Total requests parsed")]
pub static REQUESTS_RECEIVED: Counter = Counter::new();

#[metric(name = "responses_sent", description = "Total responses serialized")]
pub static RESPONSES_SENT: Counter = Counter::new();

#[metric(
    name = "protocol_errors",
    description = "Requests that failed to parse"
)]
pub static PROTOCOL_ERRORS: Counter = Counter::new();

/// Log a one-line traffic summary; used at shutdown.
pub fn log_summary() {
    tracing::info!(
        connections = CONNECTIONS_ACCEPTED.value(),
        requests = REQUESTS_RECEIVED.value(),
        responses = RESPONSES_SENT.value(),
        protocol_errors = PROTOCOL_ERRORS.value(),
        "traffic summary"
    );
}
