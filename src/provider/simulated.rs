//! In-process geolocation provider.
//!
//! Drives the reporting service without a device: positions are fed in
//! by hand or replayed from a recorded track, the odometer integrates
//! great-circle distance, and registered polygons raise ENTER/EXIT on
//! crossings whether or not tracking is running. Tests use the raw [`SimulatedProvider::emit`] path to script
//! exact odometer readings.

use super::{GeolocationProvider, PositionRequest, ProviderOptions};
use crate::error::{Error, Result};
use crate::geofence::Geofence;
use crate::model::{
    Coordinates, GeofenceAction, GeofenceTransition, LocationUpdate, ProviderEvent,
};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Default)]
struct SimState {
    options: Option<ProviderOptions>,
    fail_setup: bool,
    running: bool,
    start_calls: usize,
    stop_calls: usize,
    position_requests: usize,
    /// What `get_current_position` answers. `None` times out.
    current_position: Option<Coordinates>,
    geofences: Vec<Geofence>,
    inside: BTreeSet<String>,
    odometer: f64,
    position: Option<Coordinates>,
    last_emitted: Option<Coordinates>,
}

/// Clones share state and subscribers.
#[derive(Debug, Clone)]
pub struct SimulatedProvider {
    state: Arc<Mutex<SimState>>,
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<ProviderEvent>>>>,
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::default())),
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Deliver to every live subscriber, dropping those that went away.
    fn publish(&self, event: &ProviderEvent) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `configure`, `ready` and `add_geofences` fail.
    pub fn fail_setup(&self, fail: bool) {
        self.state().fail_setup = fail;
    }

    /// Answer for the next one-shot position reads.
    pub fn set_current_position(&self, position: Option<Coordinates>) {
        self.state().current_position = position;
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    pub fn start_calls(&self) -> usize {
        self.state().start_calls
    }

    pub fn stop_calls(&self) -> usize {
        self.state().stop_calls
    }

    pub fn position_requests(&self) -> usize {
        self.state().position_requests
    }

    pub fn options(&self) -> Option<ProviderOptions> {
        self.state().options.clone()
    }

    pub fn geofences(&self) -> Vec<Geofence> {
        self.state().geofences.clone()
    }

    pub fn odometer(&self) -> f64 {
        self.state().odometer
    }

    /// Push an event to subscribers as-is. A location event also moves the
    /// simulated odometer to its reading.
    pub fn emit(&self, event: ProviderEvent) {
        if let ProviderEvent::Location(update) = &event {
            let mut state = self.state();
            state.odometer = update.odometer;
            state.position = Some(update.coords);
        }
        self.publish(&event);
    }

    /// Switch OS location services. Disabling also halts tracking.
    pub fn set_enabled(&self, enabled: bool) {
        if !enabled {
            self.state().running = false;
        }
        self.publish(&ProviderEvent::ProviderChange { enabled });
    }

    /// Move the device. Advances the odometer and raises geofence
    /// crossings whether or not tracking runs; location updates are only
    /// emitted while tracking, once the distance filter is met. Returns
    /// what was emitted.
    pub fn move_to(&self, coords: Coordinates) -> Vec<ProviderEvent> {
        let mut events = Vec::new();
        {
            let mut guard = self.state();
            let state: &mut SimState = &mut guard;

            if let Some(previous) = state.position {
                state.odometer += previous.distance_m(&coords);
            }
            state.position = Some(coords);
            let update = LocationUpdate {
                coords,
                odometer: state.odometer,
            };

            for geofence in &state.geofences {
                let now_inside = geofence.contains(coords);
                let was_inside = state.inside.contains(&geofence.identifier);
                let action = match (was_inside, now_inside) {
                    (false, true) => {
                        state.inside.insert(geofence.identifier.clone());
                        geofence.notify_on_entry.then_some(GeofenceAction::Enter)
                    }
                    (true, false) => {
                        state.inside.remove(&geofence.identifier);
                        geofence.notify_on_exit.then_some(GeofenceAction::Exit)
                    }
                    _ => None,
                };
                if let Some(action) = action {
                    events.push(ProviderEvent::Geofence(GeofenceTransition {
                        action,
                        identifier: geofence.identifier.clone(),
                        location: update,
                    }));
                }
            }

            let filter = state.options.as_ref().map_or(0.0, |o| o.distance_filter_m);
            let moved = state
                .last_emitted
                .map_or(f64::INFINITY, |last| last.distance_m(&coords));
            if state.running && moved >= filter {
                state.last_emitted = Some(coords);
                events.push(ProviderEvent::Location(update));
            }
        }

        for event in &events {
            self.publish(event);
        }
        events
    }

    /// Feed a recorded track through [`SimulatedProvider::move_to`], one
    /// point per `interval`.
    pub async fn replay(&self, track: &[Coordinates], interval: Duration) {
        for point in track {
            let emitted = self.move_to(*point);
            debug!(point = %point, emitted = emitted.len(), "replayed track point");
            tokio::time::sleep(interval).await;
        }
    }

    fn check_setup(&self, what: &str) -> Result<()> {
        if self.state().fail_setup {
            return Err(Error::Provider(format!("{what} rejected by simulated provider")));
        }
        Ok(())
    }
}

/// Read a track file: one JSON `{"latitude": .., "longitude": ..}` per line.
/// Blank lines and `#` comments are skipped.
pub async fn load_track(path: &Path) -> Result<Vec<Coordinates>> {
    let content = tokio::fs::read_to_string(path).await?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(n, line)| {
            serde_json::from_str(line).map_err(|e| {
                Error::Config(format!("{}:{}: bad track point: {e}", path.display(), n + 1))
            })
        })
        .collect()
}

impl GeolocationProvider for SimulatedProvider {
    async fn configure(&self, options: &ProviderOptions) -> Result<()> {
        self.check_setup("configure")?;
        self.state().options = Some(options.clone());
        Ok(())
    }

    async fn ready(&self) -> Result<()> {
        self.check_setup("ready")
    }

    async fn start(&self) -> Result<()> {
        let mut state = self.state();
        state.start_calls += 1;
        state.running = true;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut state = self.state();
        state.stop_calls += 1;
        state.running = false;
        state.last_emitted = None;
        Ok(())
    }

    async fn get_current_position(&self, request: &PositionRequest) -> Result<Coordinates> {
        let mut state = self.state();
        state.position_requests += 1;
        state.current_position.ok_or(Error::Timeout(request.timeout))
    }

    async fn add_geofences(&self, geofences: &[Geofence]) -> Result<()> {
        self.check_setup("add_geofences")?;
        let mut state = self.state();
        for geofence in geofences {
            state
                .geofences
                .retain(|g| g.identifier != geofence.identifier);
            state.geofences.push(geofence.clone());
        }
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ProviderEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;

    fn square() -> Geofence {
        Geofence::new(
            "zone",
            vec![[77.0, 12.0], [77.01, 12.0], [77.01, 12.01], [77.0, 12.01]],
        )
    }

    #[tokio::test]
    async fn crossing_a_polygon_raises_enter_then_exit() {
        let provider = SimulatedProvider::new();
        provider
            .configure(&ProviderOptions::from(&TrackerConfig::default()))
            .await
            .unwrap();
        provider.add_geofences(&[square()]).await.unwrap();
        provider.start().await.unwrap();

        let outside = provider.move_to(Coordinates::new(11.99, 77.005));
        assert!(matches!(outside.as_slice(), [ProviderEvent::Location(_)]));

        let entered = provider.move_to(Coordinates::new(12.005, 77.005));
        assert!(matches!(
            &entered[0],
            ProviderEvent::Geofence(GeofenceTransition { action: GeofenceAction::Enter, .. })
        ));
        assert!(provider.odometer() > 1_000.0);

        let exited = provider.move_to(Coordinates::new(12.02, 77.005));
        assert!(matches!(
            &exited[0],
            ProviderEvent::Geofence(GeofenceTransition { action: GeofenceAction::Exit, .. })
        ));
    }

    #[tokio::test]
    async fn distance_filter_suppresses_small_moves() {
        let provider = SimulatedProvider::new();
        provider
            .configure(&ProviderOptions::from(&TrackerConfig::default()))
            .await
            .unwrap();
        provider.start().await.unwrap();

        assert_eq!(provider.move_to(Coordinates::new(12.0, 77.0)).len(), 1);
        // ~11 m
        assert!(provider.move_to(Coordinates::new(12.0001, 77.0)).is_empty());
        // ~111 m from the last emitted point
        assert_eq!(provider.move_to(Coordinates::new(12.001, 77.0)).len(), 1);
    }

    #[tokio::test]
    async fn stopped_provider_sends_no_locations() {
        let provider = SimulatedProvider::new();
        let mut rx = provider.subscribe();
        assert!(provider.move_to(Coordinates::new(12.0, 77.0)).is_empty());
        assert!(rx.try_recv().is_err());
        assert_eq!(provider.odometer(), 0.0);
    }

    #[tokio::test]
    async fn geofences_fire_while_stopped() {
        let provider = SimulatedProvider::new();
        provider.add_geofences(&[square()]).await.unwrap();
        let mut rx = provider.subscribe();

        let entered = provider.move_to(Coordinates::new(12.005, 77.005));
        assert!(matches!(
            entered.as_slice(),
            [ProviderEvent::Geofence(GeofenceTransition { action: GeofenceAction::Enter, .. })]
        ));

        // Toggling tracking does not forget which polygons contain the device.
        provider.start().await.unwrap();
        provider.stop().await.unwrap();

        let exited = provider.move_to(Coordinates::new(12.02, 77.005));
        assert!(matches!(
            exited.as_slice(),
            [ProviderEvent::Geofence(GeofenceTransition { action: GeofenceAction::Exit, .. })]
        ));
        assert_eq!(rx.try_recv().unwrap(), entered[0]);
        assert_eq!(rx.try_recv().unwrap(), exited[0]);
    }

    #[tokio::test]
    async fn subscription_keeps_every_event() {
        let provider = SimulatedProvider::new();
        let mut rx = provider.subscribe();
        for odometer in 0..1_000 {
            provider.emit(ProviderEvent::Location(LocationUpdate::new(
                12.0,
                77.0,
                f64::from(odometer),
            )));
        }
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 1_000);
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let provider = SimulatedProvider::new();
        drop(provider.subscribe());
        let mut live = provider.subscribe();
        provider.set_enabled(false);
        assert_eq!(
            live.try_recv().unwrap(),
            ProviderEvent::ProviderChange { enabled: false }
        );
        assert_eq!(provider.subscribers.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn position_read_without_fix_times_out() {
        let provider = SimulatedProvider::new();
        let request = PositionRequest::from(&TrackerConfig::default());
        assert!(matches!(
            provider.get_current_position(&request).await,
            Err(Error::Timeout(_))
        ));
        provider.set_current_position(Some(Coordinates::new(1.0, 2.0)));
        assert_eq!(
            provider.get_current_position(&request).await.unwrap(),
            Coordinates::new(1.0, 2.0)
        );
        assert_eq!(provider.position_requests(), 2);
    }

    #[tokio::test]
    async fn track_file_skips_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.jsonl");
        tokio::fs::write(
            &path,
            "# morning route\n{\"latitude\": 12.0, \"longitude\": 77.0}\n\n{\"latitude\": 12.1, \"longitude\": 77.1}\n",
        )
        .await
        .unwrap();
        let track = load_track(&path).await.unwrap();
        assert_eq!(track.len(), 2);
        assert_eq!(track[1], Coordinates::new(12.1, 77.1));
    }
}
