//! Core data model.
//!
//! Locations and geofence transitions arrive from the provider; the
//! worker's location document goes to the remote store; tracking flags
//! stay on the device.

pub mod flags;
pub mod location;

pub use flags::{ReportState, TrackingFlags};
pub use location::*;
