//! Integration tests for telemetry initialization and span helpers.

use worker_beacon::telemetry::tracking;

#[test]
fn telemetry_initializes_without_endpoint() {
    // Note: tracing subscriber can only be set once per process.
    let config = worker_beacon::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "beacon-test".to_string(),
        log_level: "debug".to_string(),
    };
    // This may return Err if a global subscriber was already set by
    // another test in this process; that is acceptable.
    let _guard = worker_beacon::telemetry::init_telemetry(config);
}

#[test]
fn trigger_span_records_outcome() {
    let span = tracking::start_trigger_span("geofence_exit");
    tracking::record_outcome(&span, "updated");
}

#[test]
fn report_transition_event_is_scoped_to_span() {
    let span = tracking::start_trigger_span("location");
    tracking::record_report_transition(&span, "sent_absent", "sent_present");
}

#[test]
fn metric_instruments_build_without_provider() {
    use opentelemetry::KeyValue;
    use worker_beacon::telemetry::metrics;

    metrics::location_reports().add(
        1,
        &[
            KeyValue::new("trigger", "toggle_on"),
            KeyValue::new("result", "inserted"),
        ],
    );
    metrics::geofence_transitions().add(1, &[KeyValue::new("action", "ENTER")]);
    metrics::document_write_ms().record(3.5, &[KeyValue::new("operation", "update")]);
}
