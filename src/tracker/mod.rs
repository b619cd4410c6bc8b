//! Location reporting: dedup rule, displacement throttle, and the
//! serialized service that applies them to provider events.

pub mod displacement;
pub mod reporter;
pub mod service;

pub use displacement::{DisplacementGate, GateDecision};
pub use reporter::{AbsentReason, Candidate, ReportOutcome, Reporter, SkipReason};
pub use service::{
    DisplayCallback, ReportingServiceBuilder, RunningService, ServiceHandle, ServiceSnapshot,
};

/// What caused a report decision. Used for logs and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    ToggleOn,
    ToggleOff,
    GeofenceEnter,
    GeofenceExit,
    Location,
    ProviderChange,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::ToggleOn => "toggle_on",
            Trigger::ToggleOff => "toggle_off",
            Trigger::GeofenceEnter => "geofence_enter",
            Trigger::GeofenceExit => "geofence_exit",
            Trigger::Location => "location",
            Trigger::ProviderChange => "provider_change",
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
