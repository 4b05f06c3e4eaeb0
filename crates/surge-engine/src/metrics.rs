//! Prometheus metrics for a load run.
//!
//! Metrics are registered lazily on first access using once_cell::Lazy and
//! can be dumped in the text exposition format at the end of a run.

use crate::error::EngineResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter_vec, register_int_gauge, Encoder, Histogram,
    IntCounterVec, IntGauge, TextEncoder,
};

/// Requests sent, by outcome (success/failure) and prompt origin
pub static REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "surge_requests_total",
        "Total number of completion requests sent",
        &["outcome", "origin"]
    )
    .expect("Failed to register request counter")
});

/// Request latency histogram
pub static REQUEST_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "surge_request_duration_seconds",
        "Completion request duration in seconds",
        // Inference latencies: 100ms up to the 60s request timeout
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 45.0, 60.0]
    )
    .expect("Failed to register request duration histogram")
});

/// Workers currently Starting or Running
pub static ACTIVE_WORKERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("surge_active_workers", "Live virtual workers")
        .expect("Failed to register active workers gauge")
});

/// Workers marked Retiring but not yet stopped
pub static RETIRING_WORKERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "surge_retiring_workers",
        "Virtual workers draining during graceful ramp-down"
    )
    .expect("Failed to register retiring workers gauge")
});

/// Prompt refresh attempts by result (success/empty/failure)
pub static PROMPT_REFRESH: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "surge_prompt_refresh_total",
        "Audience question refresh attempts",
        &["result"]
    )
    .expect("Failed to register prompt refresh counter")
});

/// Render every registered metric in the Prometheus text format.
pub fn gather_text() -> EngineResult<String> {
    // Touch the statics so they appear even when nothing was recorded.
    Lazy::force(&REQUESTS_TOTAL);
    Lazy::force(&REQUEST_DURATION);
    Lazy::force(&ACTIVE_WORKERS);
    Lazy::force(&RETIRING_WORKERS);
    Lazy::force(&PROMPT_REFRESH);

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
