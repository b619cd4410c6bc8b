//! # worker-beacon
//!
//! Location reporting for field workers. Consumes background geolocation
//! and geofence events, decides when a worker's position (or the "absent"
//! sentinel) must reach the remote per-worker document, and deduplicates
//! writes with flags kept on the device.
//!
//! Provides the reporting service (tokio actor), key-value and document
//! store contracts with file, memory and Postgres backends, a simulated
//! geolocation provider, and OpenTelemetry observability.

pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod geofence;
pub mod model;
pub mod provider;
pub mod storage;
pub mod telemetry;
pub mod tracker;

pub use error::{Error, Result};
