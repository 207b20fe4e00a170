//! Operation metrics for s3kit.
//!
//! Defines metric name constants and records them through the `metrics`
//! facade.  The library installs no recorder; without one every call is
//! a no-op, and an embedding application decides where metrics go.

use metrics::{counter, describe_counter};

// -- Metric name constants ----------------------------------------------------

/// Total client operations (counter). Labels: operation, status.
pub const OPERATIONS_TOTAL: &str = "s3kit_operations_total";

/// Total bytes uploaded through `upload_with_metadata` (counter).
pub const BYTES_UPLOADED_TOTAL: &str = "s3kit_bytes_uploaded_total";

/// Presigned URL cache lookups (counter). Labels: result (hit, miss).
pub const PRESIGN_CACHE_TOTAL: &str = "s3kit_presign_cache_total";

/// Register metric descriptions with the global recorder.
pub fn describe_metrics() {
    describe_counter!(OPERATIONS_TOTAL, "Total client operations by outcome");
    describe_counter!(BYTES_UPLOADED_TOTAL, "Total bytes uploaded");
    describe_counter!(PRESIGN_CACHE_TOTAL, "Presigned URL cache lookups");
}

/// Outcome label value for an operation.
pub fn status_label(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "error"
    }
}

/// Record one completed operation.
pub fn record_operation(operation: &'static str, ok: bool) {
    counter!(OPERATIONS_TOTAL, "operation" => operation, "status" => status_label(ok)).increment(1);
}

// -- Tests --------------------------------------------------------------------
