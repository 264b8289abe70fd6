/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Prometheus metrics for the relay.

use actix_web::HttpResponse;
use lazy_static::lazy_static;
use prometheus::{
    register_int_counter_vec, register_int_gauge, Encoder, IntCounterVec, IntGauge, TextEncoder,
};
use tracing::error;

lazy_static! {
    /// Sessions currently alive (from accepted handshake to actor stop)
    pub static ref RELAY_SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        "relay_sessions_active",
        "Number of relay sessions currently alive"
    )
    .expect("Failed to create relay_sessions_active metric");

    /// Sessions started, per route
    pub static ref RELAY_SESSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "relay_sessions_total",
        "Total number of relay sessions started",
        &["route"]
    )
    .expect("Failed to create relay_sessions_total metric");

    /// Session terminations by cause and the peer that caused them
    pub static ref RELAY_SESSION_TERMINATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "relay_session_terminations_total",
        "Total number of relay session terminations",
        &["route", "cause", "peer"]
    )
    .expect("Failed to create relay_session_terminations_total metric");

    /// Bytes copied between peers
    pub static ref RELAY_BYTES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "relay_bytes_total",
        "Total number of bytes relayed",
        &["route", "direction"]
    )
    .expect("Failed to create relay_bytes_total metric");
}

pub async fn metrics_handler() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(buffer),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            HttpResponse::InternalServerError().body("Failed to encode metrics")
        }
    }
}
