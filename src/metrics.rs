//! Prometheus metrics.
//!
//! All metrics live in the global default registry and are rendered by
//! `encode_metrics()` for the `/metrics` endpoint.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram, register_int_counter, register_int_counter_vec,
    Encoder, Histogram, IntCounter, IntCounterVec, TextEncoder,
};

static TOKENS_ISSUED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "forexfinder_claim_tokens_issued_total",
        "Location claim tokens issued"
    ))
    .expect("failed to register forexfinder_claim_tokens_issued_total")
});

static REDEMPTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "forexfinder_claim_redemptions_total",
            "Claim token redemption attempts by outcome"
        ),
        &["outcome"]
    )
    .expect("failed to register forexfinder_claim_redemptions_total")
});

static SEARCHES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "forexfinder_searches_total",
        "Nearby rate searches served"
    ))
    .expect("failed to register forexfinder_searches_total")
});

static SEARCH_RESULTS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(histogram_opts!(
        "forexfinder_search_results",
        "Results returned per nearby search",
        vec![0.0, 1.0, 2.0, 3.0, 5.0, 8.0, 10.0]
    ))
    .expect("failed to register forexfinder_search_results")
});

pub fn record_issued() {
    TOKENS_ISSUED.inc();
}

/// `outcome` is one of a fixed set of labels (redeemed, already_used, or a
/// rejection reason), so cardinality stays bounded.
pub fn record_redemption(outcome: &str) {
    REDEMPTIONS.with_label_values(&[outcome]).inc();
}

pub fn record_search(results: usize) {
    SEARCHES.inc();
    SEARCH_RESULTS.observe(results as f64);
}

/// Render every registered metric in the Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::error!("failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
