//! Shared fixtures for reporting-service integration tests.

#![allow(dead_code)]

use std::time::Duration;
use worker_beacon::config::TrackerConfig;
use worker_beacon::document::{MemoryDocumentStore, WriteRecord};
use worker_beacon::geofence::GeofenceRegistry;
use worker_beacon::model::{
    Coordinates, GeofenceAction, GeofenceTransition, LocationUpdate, ProviderEvent, ReportState,
    TrackingFlags,
};
use worker_beacon::provider::SimulatedProvider;
use worker_beacon::storage::{FlagStore, KeyValueStore, MemoryKv};
use worker_beacon::tracker::{ReportingServiceBuilder, RunningService, ServiceHandle};

pub const WORKER_ID: i64 = 4521;
pub const COLLECTION: &str = "worker_locations";

pub struct Fixture {
    pub provider: SimulatedProvider,
    pub kv: MemoryKv,
    pub docs: MemoryDocumentStore,
    pub service: RunningService,
    pub handle: ServiceHandle,
}

impl Fixture {
    /// Service with a logged-in worker and untouched flags.
    pub async fn new() -> Self {
        Self::with_flags(None).await
    }

    /// Service started over pre-existing flags, as after an app restart.
    pub async fn with_flags(flags: Option<TrackingFlags>) -> Self {
        let kv = MemoryKv::new();
        kv.set("unique", &WORKER_ID.to_string()).await.unwrap();
        if let Some(flags) = flags {
            FlagStore::new(kv.clone()).save(&flags).await.unwrap();
        }
        Self::start(SimulatedProvider::new(), kv, MemoryDocumentStore::new()).await
    }

    pub async fn start(provider: SimulatedProvider, kv: MemoryKv, docs: MemoryDocumentStore) -> Self {
        provider.set_current_position(Some(here()));
        let service = ReportingServiceBuilder::new(provider.clone(), kv.clone(), docs.clone())
            .config(TrackerConfig::default())
            .geofences(GeofenceRegistry::empty())
            .spawn()
            .await
            .expect("service should start");
        let handle = service.handle();
        Self {
            provider,
            kv,
            docs,
            service,
            handle,
        }
    }

    pub async fn flags(&self) -> TrackingFlags {
        FlagStore::new(self.kv.clone()).load().await
    }

    pub async fn writes(&self) -> Vec<WriteRecord> {
        self.docs.writes().await
    }

    pub async fn dispatch(&self, event: ProviderEvent) -> worker_beacon::tracker::ReportOutcome {
        self.handle.dispatch(event).await.expect("service running")
    }
}

pub fn flags(state: ReportState, document_id: Option<&str>, tracking_enabled: bool) -> TrackingFlags {
    TrackingFlags {
        last_report: state,
        document_id: document_id.map(str::to_string),
        tracking_enabled,
    }
}

/// A point inside the service area used throughout the tests.
pub fn here() -> Coordinates {
    Coordinates::new(12.9716, 77.5946)
}

pub fn location(latitude: f64, longitude: f64, odometer: f64) -> ProviderEvent {
    ProviderEvent::Location(LocationUpdate::new(latitude, longitude, odometer))
}

pub fn geofence(action: GeofenceAction, identifier: &str, odometer: f64) -> ProviderEvent {
    ProviderEvent::Geofence(GeofenceTransition {
        action,
        identifier: identifier.to_string(),
        location: LocationUpdate {
            coords: here(),
            odometer,
        },
    })
}

/// Coordinates written by a record, read back from its fields.
pub fn written_coords(record: &WriteRecord) -> Coordinates {
    let location = &record.fields["location"];
    Coordinates::new(
        location["latitude"].as_f64().unwrap(),
        location["longitude"].as_f64().unwrap(),
    )
}

/// Poll `check` until it holds or two seconds pass.
pub async fn wait_for<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
