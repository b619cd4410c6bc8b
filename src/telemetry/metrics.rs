//! Metric instrument factories for worker-beacon.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"worker-beacon"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for worker-beacon instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("worker-beacon")
}

/// Counter: location report decisions.
/// Labels: `trigger`, `result` ("inserted" | "updated" | "skipped" | "failed").
pub fn location_reports() -> Counter<u64> {
    meter()
        .u64_counter("beacon.location.reports")
        .with_description("Location report decisions by trigger and result")
        .build()
}

/// Counter: geofence transitions received from the provider.
/// Labels: `action` ("ENTER" | "EXIT").
pub fn geofence_transitions() -> Counter<u64> {
    meter()
        .u64_counter("beacon.geofence.transitions")
        .with_description("Number of geofence transitions")
        .build()
}

/// Counter: document store calls (query, update, insert).
/// Labels: `collection`, `operation`.
pub fn document_operations() -> Counter<u64> {
    meter()
        .u64_counter("beacon.document.operations")
        .with_description("Number of document store operations")
        .build()
}

/// Histogram: time to write the location document, in milliseconds.
/// Labels: `operation` ("insert" | "update").
pub fn document_write_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("beacon.document.write_ms")
        .with_description("Location document write latency")
        .with_unit("ms")
        .build()
}
