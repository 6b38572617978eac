//! Prometheus metrics for chat-fanout-service.
//!
//! Collectors live in the default registry; `/metrics` renders them.

use actix_web::HttpResponse;
use lazy_static::lazy_static;
use prometheus::{
    register_int_counter_vec, register_int_gauge_vec, Encoder, IntCounterVec, IntGaugeVec,
    TextEncoder,
};

lazy_static! {
    /// Open WebSocket connections by route.
    pub static ref CONNECTIONS_ACTIVE: IntGaugeVec = register_int_gauge_vec!(
        "chat_fanout_connections_active",
        "Open WebSocket connections segmented by route",
        &["route"]
    )
    .expect("failed to register chat_fanout_connections_active");

    /// Client-authored lines handled by the inbound gateway.
    pub static ref INBOUND_MESSAGES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "chat_fanout_inbound_messages_total",
        "Inbound client messages segmented by outcome",
        &["outcome"]
    )
    .expect("failed to register chat_fanout_inbound_messages_total");

    /// Broker deliveries seen by the bridge (received/decode_failure/overflow_dropped).
    pub static ref BRIDGE_MESSAGES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "chat_fanout_bridge_messages_total",
        "Broker deliveries processed by the bridge segmented by topic and outcome",
        &["topic", "outcome"]
    )
    .expect("failed to register chat_fanout_bridge_messages_total");

    pub static ref DELIVERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "chat_fanout_deliveries_total",
        "Messages written to client connections segmented by topic",
        &["topic"]
    )
    .expect("failed to register chat_fanout_deliveries_total");

    /// Terminal dispatcher states (detached/failed).
    pub static ref DISPATCHER_OUTCOMES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "chat_fanout_dispatcher_outcomes_total",
        "Dispatcher terminations segmented by topic and final state",
        &["topic", "state"]
    )
    .expect("failed to register chat_fanout_dispatcher_outcomes_total");
}

/// Actix handler that renders Prometheus metrics in text format.
pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
