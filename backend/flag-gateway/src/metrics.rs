//! Prometheus metrics for flag-gateway
//!
//! All collectors are registered in the default registry and exposed on
//! `GET /metrics`.

use actix_web::{http::header::ContentType, HttpResponse};
use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};
use tracing::error;

lazy_static! {
    /// Cache reads by outcome (hit / stale / miss)
    static ref CACHE_LOOKUPS: IntCounterVec = register_int_counter_vec!(
        "flag_gateway_cache_lookups_total",
        "Cache reads by outcome",
        &["outcome"]
    )
    .expect("Failed to register flag_gateway_cache_lookups_total");

    /// Origin resolutions by outcome
    static ref ORIGIN_FETCHES: IntCounterVec = register_int_counter_vec!(
        "flag_gateway_origin_fetches_total",
        "Origin resolutions by outcome",
        &["outcome"]
    )
    .expect("Failed to register flag_gateway_origin_fetches_total");

    /// Background refreshes by outcome
    static ref BACKGROUND_REFRESHES: IntCounterVec = register_int_counter_vec!(
        "flag_gateway_background_refreshes_total",
        "Stale-entry refreshes by outcome",
        &["outcome"]
    )
    .expect("Failed to register flag_gateway_background_refreshes_total");

    static ref RATE_LIMITED: IntCounter = register_int_counter!(
        "flag_gateway_rate_limited_total",
        "Requests rejected by the rate limiter"
    )
    .expect("Failed to register flag_gateway_rate_limited_total");

    static ref COALESCED_JOINS: IntCounter = register_int_counter!(
        "flag_gateway_coalesced_joins_total",
        "Callers that joined an in-flight origin fetch"
    )
    .expect("Failed to register flag_gateway_coalesced_joins_total");
}

pub fn record_cache_lookup(outcome: &str) {
    CACHE_LOOKUPS.with_label_values(&[outcome]).inc();
}

#[cfg(test)]
pub(crate) fn cache_lookup_count(outcome: &str) -> u64 {
    CACHE_LOOKUPS.with_label_values(&[outcome]).get()
}

pub fn record_origin_fetch(outcome: &str) {
    ORIGIN_FETCHES.with_label_values(&[outcome]).inc();
}

pub fn record_background_refresh(outcome: &str) {
    BACKGROUND_REFRESHES.with_label_values(&[outcome]).inc();
}

pub fn record_rate_limited() {
    RATE_LIMITED.inc();
}

pub fn record_coalesced_join() {
    COALESCED_JOINS.inc();
}

/// Render the default registry in text exposition format
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// `GET /metrics`
pub async fn metrics_handler() -> HttpResponse {
    match render() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            HttpResponse::InternalServerError()
                .content_type(ContentType::plaintext())
                .body(e.to_string())
        }
    }
}
