//! Geolocation provider contract.
//!
//! The provider owns the GPS, the odometer and polygon evaluation. It is
//! configured once, started and stopped by the tracking toggle, and pushes
//! [`ProviderEvent`]s to every subscriber from its own background context.

pub mod simulated;

pub use simulated::SimulatedProvider;

use crate::config::{Accuracy, TrackerConfig};
use crate::error::Result;
use crate::geofence::Geofence;
use crate::model::{Coordinates, ProviderEvent};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Options passed to [`GeolocationProvider::configure`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderOptions {
    pub desired_accuracy: Accuracy,
    pub distance_filter_m: f64,
    pub stop_on_terminate: bool,
    pub start_on_boot: bool,
    pub foreground_service: bool,
    pub enable_headless: bool,
}

impl From<&TrackerConfig> for ProviderOptions {
    fn from(config: &TrackerConfig) -> Self {
        Self {
            desired_accuracy: config.desired_accuracy,
            distance_filter_m: config.distance_filter_m,
            stop_on_terminate: config.stop_on_terminate,
            start_on_boot: config.start_on_boot,
            foreground_service: config.foreground_service,
            enable_headless: config.enable_headless,
        }
    }
}

/// A one-shot position read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionRequest {
    pub timeout: Duration,
    /// Oldest cached fix the provider may return instead of a fresh one.
    pub maximum_age: Duration,
    pub desired_accuracy: Accuracy,
}

impl From<&TrackerConfig> for PositionRequest {
    fn from(config: &TrackerConfig) -> Self {
        Self {
            timeout: config.position_timeout(),
            maximum_age: config.position_max_age(),
            desired_accuracy: config.desired_accuracy,
        }
    }
}

pub trait GeolocationProvider: Send + Sync + 'static {
    fn configure(&self, options: &ProviderOptions) -> impl Future<Output = Result<()>> + Send;

    /// Resolves once the provider has restored its state and can track.
    fn ready(&self) -> impl Future<Output = Result<()>> + Send;

    fn start(&self) -> impl Future<Output = Result<()>> + Send;

    fn stop(&self) -> impl Future<Output = Result<()>> + Send;

    fn get_current_position(
        &self,
        request: &PositionRequest,
    ) -> impl Future<Output = Result<Coordinates>> + Send;

    fn add_geofences(&self, geofences: &[Geofence]) -> impl Future<Output = Result<()>> + Send;

    /// Subscribe to location, geofence and provider-change events.
    ///
    /// Delivery is lossless and in order; a geofence EXIT must never be
    /// dropped behind a burst of location updates. Dropping the receiver
    /// ends the subscription.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ProviderEvent>;
}

impl<T: GeolocationProvider> GeolocationProvider for Arc<T> {
    fn configure(&self, options: &ProviderOptions) -> impl Future<Output = Result<()>> + Send {
        (**self).configure(options)
    }

    fn ready(&self) -> impl Future<Output = Result<()>> + Send {
        (**self).ready()
    }

    fn start(&self) -> impl Future<Output = Result<()>> + Send {
        (**self).start()
    }

    fn stop(&self) -> impl Future<Output = Result<()>> + Send {
        (**self).stop()
    }

    fn get_current_position(
        &self,
        request: &PositionRequest,
    ) -> impl Future<Output = Result<Coordinates>> + Send {
        (**self).get_current_position(request)
    }

    fn add_geofences(&self, geofences: &[Geofence]) -> impl Future<Output = Result<()>> + Send {
        (**self).add_geofences(geofences)
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ProviderEvent> {
        (**self).subscribe()
    }
}
