// src/core/metrics.rs

//! Defines and registers Prometheus metrics for server monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{Counter, Gauge, TextEncoder, register_counter, register_gauge};

lazy_static! {
    // --- Connection Gauges and Counters ---
    /// The number of clients currently connected to the server.
    pub static ref CONNECTED_CLIENTS: Gauge =
        register_gauge!("titan_connected_clients", "Number of currently connected clients.").unwrap();
    /// The total number of connections accepted by the listener since startup.
    pub static ref CONNECTIONS_RECEIVED_TOTAL: Counter =
        register_counter!("titan_connections_received_total", "Total number of connections received.").unwrap();
    /// The total number of frames decoded, control frames included.
    pub static ref FRAMES_RECEIVED_TOTAL: Counter =
        register_counter!("titan_frames_received_total", "Total number of frames received.").unwrap();
    /// The total number of application messages handed to the message handler.
    pub static ref MESSAGES_DISPATCHED_TOTAL: Counter =
        register_counter!("titan_messages_dispatched_total", "Total number of messages dispatched to handlers.").unwrap();
    /// The total number of message handlers cancelled for exceeding the handler timeout.
    pub static ref HANDLER_TIMEOUTS_TOTAL: Counter =
        register_counter!("titan_handler_timeouts_total", "Total number of message handlers that timed out.").unwrap();

    // --- Delivery Queue ---
    /// The total number of requests enqueued for delivery.
    pub static ref REQUESTS_ENQUEUED_TOTAL: Counter =
        register_counter!("titan_requests_enqueued_total", "Total number of requests enqueued for delivery.").unwrap();
    /// The total number of requests successfully handed off to the router.
    pub static ref REQUESTS_DELIVERED_TOTAL: Counter =
        register_counter!("titan_requests_delivered_total", "Total number of requests handed off to the router.").unwrap();
    /// The total number of failed hand-offs. Each failure leaves the request queued.
    pub static ref DELIVERY_FAILURES_TOTAL: Counter =
        register_counter!("titan_delivery_failures_total", "Total number of failed hand-off attempts.").unwrap();
    /// The number of requests waiting in all per-user queues.
    pub static ref PENDING_REQUESTS: Gauge =
        register_gauge!("titan_pending_requests", "Number of requests waiting for delivery.").unwrap();

    // --- Sampled on scrape ---
    /// Users with a queue entry, empty or not.
    pub static ref QUEUED_USERS: Gauge =
        register_gauge!("titan_queued_users", "Number of users with a delivery queue.").unwrap();
    /// Users currently associated with a connection.
    pub static ref ASSOCIATED_USERS: Gauge =
        register_gauge!("titan_associated_users", "Number of users associated with a connection.").unwrap();
    /// Delivered requests whose reply has not arrived yet.
    pub static ref AWAITING_REPLIES: Gauge =
        register_gauge!("titan_awaiting_replies", "Number of delivered requests awaiting a reply.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
