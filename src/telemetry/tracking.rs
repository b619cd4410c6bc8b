//! Span helpers for trigger handling in the reporting service.

use tracing::Span;

/// Start a span for one trigger (toggle, geofence crossing, location).
///
/// The `beacon.outcome` field is declared empty and filled by
/// [`record_outcome`].
pub fn start_trigger_span(trigger: &str) -> Span {
    tracing::info_span!(
        "beacon.trigger",
        "beacon.trigger" = trigger,
        "beacon.outcome" = tracing::field::Empty,
    )
}

/// Record how the trigger ended on its span.
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("beacon.outcome", outcome);
}

/// Emit a report-state change event scoped to the given span.
pub fn record_report_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "report_state_transition");
    });
}
