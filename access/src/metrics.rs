//! Metrics for the access subsystem.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `festival_access_verdicts_total{code}` - Gate verdicts by code
//! - `festival_access_credentials_issued_total` - Credentials issued
//! - `festival_access_credentials_swept_total` - Expired unused credentials deleted
//! - `festival_access_proximity_sessions_expired_total` - Pending sessions expired by sweeps
//! - `festival_access_biometric_attempts_total{verified}` - Verification attempts
//! - `festival_access_key_rotations_total{key_type}` - Data key rotations
//!
//! ## Histograms
//! - `festival_access_validation_duration_seconds` - End-to-end gate validation latency

use metrics::{describe_counter, describe_histogram};

/// Register descriptions for every metric this crate records.
///
/// Call once at startup, before any metrics are recorded.
pub fn register_metrics() {
    // Validation
    describe_counter!(
        "festival_access_verdicts_total",
        "Gate validation verdicts by code (VALID, CREDENTIAL_ALREADY_USED, ...)"
    );
    describe_histogram!(
        "festival_access_validation_duration_seconds",
        "Time taken to validate a scan, including the admission commit"
    );

    // Credentials
    describe_counter!(
        "festival_access_credentials_issued_total",
        "Total number of credentials issued"
    );
    describe_counter!(
        "festival_access_credentials_swept_total",
        "Expired unused credentials removed by sweeps"
    );

    // Proximity
    describe_counter!(
        "festival_access_proximity_sessions_expired_total",
        "Pending proximity sessions expired by sweeps"
    );

    // Biometrics
    describe_counter!(
        "festival_access_biometric_attempts_total",
        "Biometric verification attempts by outcome"
    );

    // Keys
    describe_counter!(
        "festival_access_key_rotations_total",
        "Data encryption key rotations by key type"
    );

    tracing::info!("Festival access metrics registered");
}
