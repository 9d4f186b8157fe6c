//! Lightweight metrics helpers for Lectern.
//!
//! Thin wrappers over the `metrics` crate macros. No exporter is installed here; the embedding
//! application can register any compatible recorder.
//!
//! Provided metrics (labels vary by family):
//! * `lectern_requests_total` (counter)
//! * `lectern_request_duration_seconds` (histogram)
//! * `lectern_external_calls_total` (counter, `endpoint`, `outcome`)
//! * `lectern_external_call_duration_seconds` (histogram, `endpoint`)
//! * `lectern_fallbacks_total` (counter, `variant`, `step`)
//! * `lectern_unavailable_total` (counter, `variant`)
//! * `lectern_cache_notifications_total` (counter, `kind`, `outcome`)
//! * `lectern_rating_writes_total` (counter, `kind`)
use std::time::{Duration, Instant};

use metrics::{Unit, counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::Lazy;

pub const LECTERN_REQUESTS_TOTAL: &str = "lectern_requests_total";
pub const LECTERN_REQUEST_DURATION_SECONDS: &str = "lectern_request_duration_seconds";
pub const LECTERN_EXTERNAL_CALLS_TOTAL: &str = "lectern_external_calls_total";
pub const LECTERN_EXTERNAL_CALL_DURATION_SECONDS: &str = "lectern_external_call_duration_seconds";
pub const LECTERN_FALLBACKS_TOTAL: &str = "lectern_fallbacks_total";
pub const LECTERN_UNAVAILABLE_TOTAL: &str = "lectern_unavailable_total";
pub const LECTERN_CACHE_NOTIFICATIONS_TOTAL: &str = "lectern_cache_notifications_total";
pub const LECTERN_RATING_WRITES_TOTAL: &str = "lectern_rating_writes_total";

static DESCRIPTIONS: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        LECTERN_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of HTTP requests served."
    );
    describe_histogram!(
        LECTERN_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of HTTP requests served."
    );
    describe_counter!(
        LECTERN_EXTERNAL_CALLS_TOTAL,
        Unit::Count,
        "Calls made to the recommendation service, by endpoint and outcome."
    );
    describe_histogram!(
        LECTERN_EXTERNAL_CALL_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of calls made to the recommendation service."
    );
    describe_counter!(
        LECTERN_FALLBACKS_TOTAL,
        Unit::Count,
        "Local fallback computations served instead of a service answer."
    );
    describe_counter!(
        LECTERN_UNAVAILABLE_TOTAL,
        Unit::Count,
        "Recommendation requests answered with service-unavailable."
    );
    describe_counter!(
        LECTERN_CACHE_NOTIFICATIONS_TOTAL,
        Unit::Count,
        "Best-effort cache notifications sent after rating writes."
    );
    describe_counter!(
        LECTERN_RATING_WRITES_TOTAL,
        Unit::Count,
        "Committed rating writes (insert or update)."
    );
});

/// Increment the total request counter for an inbound request.
pub fn increment_request_total(path: &str, method: &str, status: u16) {
    counter!(
        LECTERN_REQUESTS_TOTAL,
        "path" => path.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a completed inbound request's duration.
pub fn record_request_duration(path: &str, method: &str, duration: Duration) {
    histogram!(
        LECTERN_REQUEST_DURATION_SECONDS,
        "path" => path.to_string(),
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

/// `outcome` is `success` or a failure cause label.
pub fn increment_external_call(endpoint: &'static str, outcome: &'static str) {
    counter!(
        LECTERN_EXTERNAL_CALLS_TOTAL,
        "endpoint" => endpoint,
        "outcome" => outcome
    )
    .increment(1);
}

pub fn increment_fallback(variant: &'static str, step: &'static str) {
    counter!(LECTERN_FALLBACKS_TOTAL, "variant" => variant, "step" => step).increment(1);
}

pub fn increment_unavailable(variant: &'static str) {
    counter!(LECTERN_UNAVAILABLE_TOTAL, "variant" => variant).increment(1);
}

pub fn increment_cache_notification(kind: &'static str, outcome: &'static str) {
    counter!(
        LECTERN_CACHE_NOTIFICATIONS_TOTAL,
        "kind" => kind,
        "outcome" => outcome
    )
    .increment(1);
}

pub fn increment_rating_write(inserted: bool) {
    let kind = if inserted { "insert" } else { "update" };
    counter!(LECTERN_RATING_WRITES_TOTAL, "kind" => kind).increment(1);
}

/// RAII helper measuring inbound request duration.
pub struct RequestTimer {
    start: Instant,
    path: String,
    method: String,
}

impl RequestTimer {
    pub fn new(path: &str, method: &str) -> Self {
        Self {
            start: Instant::now(),
            path: path.to_string(),
            method: method.to_string(),
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        record_request_duration(&self.path, &self.method, self.start.elapsed());
    }
}

/// RAII helper measuring one call to the recommendation service.
pub struct ExternalCallTimer {
    start: Instant,
    endpoint: &'static str,
}

impl ExternalCallTimer {
    pub fn new(endpoint: &'static str) -> Self {
        Self {
            start: Instant::now(),
            endpoint,
        }
    }
}

impl Drop for ExternalCallTimer {
    fn drop(&mut self) {
        histogram!(LECTERN_EXTERNAL_CALL_DURATION_SECONDS, "endpoint" => self.endpoint)
            .record(self.start.elapsed().as_secs_f64());
    }
}

/// Initialize metric descriptions (idempotent).
pub fn init_metrics() -> eyre::Result<()> {
    Lazy::force(&DESCRIPTIONS);
    tracing::debug!("Lectern metric descriptions registered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timers_record_on_drop() {
        drop(RequestTimer::new("/books/popular", "GET"));
        drop(ExternalCallTimer::new("similar_items"));
    }

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
    }
}
