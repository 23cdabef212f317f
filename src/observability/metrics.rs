//! Client metrics.
//!
//! # Metrics
//! - `api_client_requests_total` (counter): logical requests by module, outcome
//! - `api_client_request_duration_seconds` (histogram): logical request latency
//! - `api_client_retries_total` (counter): resubmissions by module, reason
//! - `api_client_host_rotations_total` (counter): host rotations by module
//! - `api_client_clock_skew_corrections_total` (counter): adopted skew values
//! - `api_client_config_fetches_total` (counter): config loads by source, outcome

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Instant;

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(
        "api_client_requests_total",
        "Logical requests completed, by module and outcome"
    );
    describe_histogram!(
        "api_client_request_duration_seconds",
        "Logical request duration including retries"
    );
    describe_counter!(
        "api_client_retries_total",
        "Request resubmissions, by module and reason"
    );
    describe_counter!(
        "api_client_host_rotations_total",
        "Active host rotations, by module"
    );
    describe_counter!(
        "api_client_clock_skew_corrections_total",
        "Clock skew values learned from Date headers"
    );
    describe_counter!(
        "api_client_config_fetches_total",
        "Configuration loads, by source and outcome"
    );
}

pub fn record_request(module: &str, outcome: &'static str, start: Instant) {
    let labels = [("module", module.to_string()), ("outcome", outcome.to_string())];
    counter!("api_client_requests_total", &labels).increment(1);
    histogram!("api_client_request_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_retry(module: &str, reason: &'static str) {
    counter!(
        "api_client_retries_total",
        "module" => module.to_string(),
        "reason" => reason
    )
    .increment(1);
}

pub fn record_rotation(module: &str) {
    counter!("api_client_host_rotations_total", "module" => module.to_string()).increment(1);
}

pub fn record_skew_correction() {
    counter!("api_client_clock_skew_corrections_total").increment(1);
}

pub fn record_config_fetch(source: &'static str, outcome: &'static str) {
    counter!(
        "api_client_config_fetches_total",
        "source" => source,
        "outcome" => outcome
    )
    .increment(1);
}
