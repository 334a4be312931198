//! Metrics module
//!
//! Provides Prometheus metrics for uploads.

pub mod server;

use crate::upload::ErrorKind;
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    HistogramVec,
};

lazy_static! {
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "spool_uploads_total",
        "Total number of uploads",
        &["route", "status"]
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "spool_upload_bytes_total",
        "Total bytes stored"
    ).unwrap();

    pub static ref UPLOAD_DURATION: HistogramVec = register_histogram_vec!(
        "spool_upload_duration_seconds",
        "Upload duration in seconds, streaming included",
        &["route"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0]
    ).unwrap();

    pub static ref UPLOAD_ERRORS: CounterVec = register_counter_vec!(
        "spool_upload_errors_total",
        "Failed uploads by error kind",
        &["kind"]
    ).unwrap();

    pub static ref CLEANUP_FAILURES: Counter = register_counter!(
        "spool_cleanup_failures_total",
        "Temp files that could not be removed after a failed upload"
    ).unwrap();
}

/// Record a successful upload
pub fn record_upload_success(route: &str, bytes: u64) {
    UPLOADS_TOTAL.with_label_values(&[route, "success"]).inc();
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
}

/// Record a failed upload
pub fn record_upload_failure(route: &str, kind: ErrorKind) {
    UPLOADS_TOTAL.with_label_values(&[route, "failure"]).inc();
    UPLOAD_ERRORS.with_label_values(&[kind.as_str()]).inc();
}

/// Record upload duration
pub fn record_upload_duration(route: &str, duration_secs: f64) {
    UPLOAD_DURATION
        .with_label_values(&[route])
        .observe(duration_secs);
}

/// Record a temp file left behind
pub fn record_cleanup_failure() {
    CLEANUP_FAILURES.inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_upload_success() {
        let before = UPLOADS_TOTAL
            .with_label_values(&["metrics-test", "success"])
            .get();
        record_upload_success("metrics-test", 1024);
        let after = UPLOADS_TOTAL
            .with_label_values(&["metrics-test", "success"])
            .get();
        assert_eq!(after - before, 1.0);
    }

    #[test]
    fn test_record_upload_failure() {
        record_upload_failure("metrics-test", ErrorKind::TooLarge);
        assert!(UPLOAD_ERRORS.with_label_values(&["too_large"]).get() >= 1.0);
    }

    #[test]
    fn test_record_duration_and_cleanup() {
        record_upload_duration("metrics-test", 0.05);
        record_cleanup_failure();
        // Just verify it doesn't panic
    }
}
