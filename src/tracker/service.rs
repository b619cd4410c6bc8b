//! The reporting service: one task owns all tracking state and handles
//! triggers strictly one at a time.
//!
//! Toggles from the UI and events from the provider are both sent into the
//! same queue, so the load-flags / decide / write / save-flags sequence of
//! one trigger never interleaves with another's.

use super::displacement::{DisplacementGate, GateDecision};
use super::reporter::{AbsentReason, Candidate, ReportOutcome, Reporter, SkipReason};
use super::Trigger;
use crate::config::TrackerConfig;
use crate::document::DocumentStore;
use crate::error::{Error, Result};
use crate::geofence::GeofenceRegistry;
use crate::model::{
    Coordinates, GeofenceAction, GeofenceTransition, LocationUpdate, ProviderEvent,
    TrackingFlags,
};
use crate::provider::{GeolocationProvider, PositionRequest, ProviderOptions};
use crate::storage::KeyValueStore;
use crate::telemetry::metrics;
use crate::telemetry::tracking::{record_outcome, start_trigger_span};
use opentelemetry::KeyValue;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};

const COMMAND_CAPACITY: usize = 64;

/// Receives every raw location for display, before any write gating.
pub type DisplayCallback = Arc<dyn Fn(Coordinates) + Send + Sync>;

enum Command {
    Toggle {
        enabled: bool,
        reply: oneshot::Sender<ReportOutcome>,
    },
    Event {
        event: ProviderEvent,
        reply: Option<oneshot::Sender<ReportOutcome>>,
    },
    Snapshot {
        reply: oneshot::Sender<ServiceSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Point-in-time view of the service state.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSnapshot {
    pub tracking_active: bool,
    /// Odometer at polygon entry; `None` outside every polygon.
    pub entry_odometer: Option<f64>,
    pub flags: TrackingFlags,
    pub events_handled: u64,
}

/// Cheap, cloneable sender into the service queue.
#[derive(Clone)]
pub struct ServiceHandle {
    tx: mpsc::Sender<Command>,
}

impl ServiceHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| Error::ServiceClosed)?;
        rx.await.map_err(|_| Error::ServiceClosed)
    }

    /// Apply the user's tracking toggle and wait for its report decision.
    pub async fn set_tracking(&self, enabled: bool) -> Result<ReportOutcome> {
        self.request(|reply| Command::Toggle { enabled, reply }).await
    }

    /// Handle a provider event and wait for the outcome. Events also reach
    /// the service through the provider subscription; this path is for
    /// headless wake-ups that deliver events directly.
    pub async fn dispatch(&self, event: ProviderEvent) -> Result<ReportOutcome> {
        self.request(|reply| Command::Event {
            event,
            reply: Some(reply),
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<ServiceSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }
}

/// Wires collaborators together and starts the service.
pub struct ReportingServiceBuilder<P, K, D> {
    provider: P,
    kv: K,
    documents: D,
    config: TrackerConfig,
    geofences: GeofenceRegistry,
    on_location: Option<DisplayCallback>,
}

impl<P, K, D> ReportingServiceBuilder<P, K, D>
where
    P: GeolocationProvider,
    K: KeyValueStore,
    D: DocumentStore,
{
    pub fn new(provider: P, kv: K, documents: D) -> Self {
        Self {
            provider,
            kv,
            documents,
            config: TrackerConfig::default(),
            geofences: GeofenceRegistry::empty(),
            on_location: None,
        }
    }

    pub fn config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn geofences(mut self, geofences: GeofenceRegistry) -> Self {
        self.geofences = geofences;
        self
    }

    pub fn on_location_update(
        mut self,
        callback: impl Fn(Coordinates) + Send + Sync + 'static,
    ) -> Self {
        self.on_location = Some(Arc::new(callback));
        self
    }

    /// Configure the provider, register geofences, resume tracking if the
    /// toggle was left on, and spawn the service task.
    ///
    /// Provider setup failures are logged and do not abort startup.
    pub async fn spawn(self) -> Result<RunningService> {
        self.config.validate()?;
        let offset = self.config.report_offset()?;

        let provider = self.provider;
        if let Err(e) = provider.configure(&ProviderOptions::from(&self.config)).await {
            error!("geolocation provider configuration failed: {e}");
        }
        if let Err(e) = provider.ready().await {
            error!("geolocation provider not ready: {e}");
        }
        if !self.geofences.is_empty() {
            let geofences: Vec<_> = self.geofences.iter().cloned().collect();
            match provider.add_geofences(&geofences).await {
                Ok(()) => info!(count = geofences.len(), "geofences registered"),
                Err(e) => error!("geofence registration failed: {e}"),
            }
        }

        let reporter = Reporter::new(
            self.kv,
            self.documents,
            self.config.collection.clone(),
            offset,
        );

        let subscription = provider.subscribe();

        // Restart must not re-send; only resume the provider.
        let mut tracking_active = false;
        if reporter.flags().await.tracking_enabled {
            match provider.start().await {
                Ok(()) => {
                    tracking_active = true;
                    info!("resumed tracking from persisted toggle");
                }
                Err(e) => error!("failed to resume tracking: {e}"),
            }
        }

        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let pump = tokio::spawn(pump_events(subscription, tx.clone()));

        let service = LocationReportingService {
            gate: DisplacementGate::new(self.config.displacement_threshold_m),
            position_request: PositionRequest::from(&self.config),
            provider,
            reporter,
            tracking_active,
            on_location: self.on_location,
            events_handled: 0,
            rx,
        };
        let actor = tokio::spawn(service.run());

        Ok(RunningService {
            handle: ServiceHandle { tx },
            actor,
            pump,
        })
    }
}

/// A spawned service. Keep it alive for as long as tracking should run.
pub struct RunningService {
    handle: ServiceHandle,
    actor: JoinHandle<()>,
    pump: JoinHandle<()>,
}

impl RunningService {
    pub fn handle(&self) -> ServiceHandle {
        self.handle.clone()
    }

    /// Finish queued triggers, drop the provider subscription, and wait
    /// for the service task to end. The provider keeps its own state.
    pub async fn shutdown(self) -> Result<()> {
        self.pump.abort();
        let result = self.handle.request(|reply| Command::Shutdown { reply }).await;
        if let Err(e) = self.actor.await {
            error!("reporting service task failed: {e}");
        }
        result
    }
}

/// Forward provider events into the service queue, in order. Backpressure
/// from a busy service holds events in the subscription rather than
/// dropping them.
async fn pump_events(
    mut events: mpsc::UnboundedReceiver<ProviderEvent>,
    tx: mpsc::Sender<Command>,
) {
    while let Some(event) = events.recv().await {
        if tx.send(Command::Event { event, reply: None }).await.is_err() {
            break;
        }
    }
    debug!("provider subscription ended");
}

struct LocationReportingService<P, K, D> {
    provider: P,
    reporter: Reporter<K, D>,
    gate: DisplacementGate,
    position_request: PositionRequest,
    tracking_active: bool,
    on_location: Option<DisplayCallback>,
    events_handled: u64,
    rx: mpsc::Receiver<Command>,
}

impl<P, K, D> LocationReportingService<P, K, D>
where
    P: GeolocationProvider,
    K: KeyValueStore,
    D: DocumentStore,
{
    async fn run(mut self) {
        info!("reporting service started");
        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Toggle { enabled, reply } => {
                    let trigger = if enabled {
                        Trigger::ToggleOn
                    } else {
                        Trigger::ToggleOff
                    };
                    let span = start_trigger_span(trigger.as_str());
                    let outcome = self.handle_toggle(enabled).instrument(span.clone()).await;
                    record_outcome(&span, outcome.label());
                    let _ = reply.send(outcome);
                }
                Command::Event { event, reply } => {
                    self.events_handled += 1;
                    let span = start_trigger_span(event_trigger(&event).as_str());
                    let outcome = self.handle_event(event).instrument(span.clone()).await;
                    record_outcome(&span, outcome.label());
                    if let Some(reply) = reply {
                        let _ = reply.send(outcome);
                    }
                }
                Command::Snapshot { reply } => {
                    let _ = reply.send(ServiceSnapshot {
                        tracking_active: self.tracking_active,
                        entry_odometer: self.gate.baseline(),
                        flags: self.reporter.flags().await,
                        events_handled: self.events_handled,
                    });
                }
                Command::Shutdown { reply } => {
                    let _ = reply.send(());
                    break;
                }
            }
        }
        info!("reporting service stopped");
    }

    async fn handle_toggle(&mut self, enabled: bool) -> ReportOutcome {
        self.reporter.set_tracking_enabled(enabled).await;
        if enabled {
            self.toggle_on().await
        } else {
            self.toggle_off().await
        }
    }

    async fn toggle_on(&mut self) -> ReportOutcome {
        let outcome = if self.reporter.flags().await.previous_enabled() {
            debug!("current position already reported, skipping one-shot read");
            ReportOutcome::Skipped(SkipReason::AlreadySentPresent)
        } else {
            match self.current_position().await {
                Ok(coords) => {
                    self.reporter
                        .report(
                            Candidate::Present(coords),
                            self.tracking_active,
                            Trigger::ToggleOn,
                        )
                        .await
                }
                // Continuous tracking still starts; the first qualifying
                // update reports instead.
                Err(e) => {
                    warn!("current position unavailable on toggle: {e}");
                    ReportOutcome::Failed(e.to_string())
                }
            }
        };

        match self.provider.start().await {
            Ok(()) => self.tracking_active = true,
            Err(e) => error!("failed to start continuous tracking: {e}"),
        }
        outcome
    }

    async fn toggle_off(&mut self) -> ReportOutcome {
        self.tracking_active = false;
        let outcome = self
            .reporter
            .report(
                Candidate::Absent(AbsentReason::TrackingDisabled),
                self.tracking_active,
                Trigger::ToggleOff,
            )
            .await;
        if let Err(e) = self.provider.stop().await {
            error!("failed to stop continuous tracking: {e}");
        }
        outcome
    }

    async fn current_position(&self) -> Result<Coordinates> {
        let request = self.position_request;
        tokio::time::timeout(request.timeout, self.provider.get_current_position(&request))
            .await
            .map_err(|_| Error::Timeout(request.timeout))?
    }

    async fn handle_event(&mut self, event: ProviderEvent) -> ReportOutcome {
        match event {
            ProviderEvent::Location(update) => self.handle_location(update).await,
            ProviderEvent::Geofence(transition) => self.handle_geofence(transition).await,
            ProviderEvent::ProviderChange { enabled } => {
                self.handle_provider_change(enabled).await
            }
        }
    }

    async fn handle_location(&mut self, update: LocationUpdate) -> ReportOutcome {
        if let Some(callback) = &self.on_location {
            callback(update.coords);
        }

        match self.gate.observe(update.odometer) {
            GateDecision::Outside => ReportOutcome::NoReport,
            GateDecision::Accumulating { displacement } => {
                debug!(displacement, "below displacement threshold");
                ReportOutcome::NoReport
            }
            GateDecision::Rebased { previous } => {
                warn!(previous, odometer = update.odometer, "odometer went backwards, rebased");
                ReportOutcome::NoReport
            }
            GateDecision::Reached { displacement } => {
                debug!(displacement, "displacement threshold reached");
                self.reporter
                    .report(
                        Candidate::Present(update.coords),
                        self.tracking_active,
                        Trigger::Location,
                    )
                    .await
            }
        }
    }

    async fn handle_geofence(&mut self, transition: GeofenceTransition) -> ReportOutcome {
        metrics::geofence_transitions()
            .add(1, &[KeyValue::new("action", transition.action.to_string())]);
        info!(
            action = %transition.action,
            identifier = %transition.identifier,
            odometer = transition.location.odometer,
            "geofence transition"
        );

        match transition.action {
            GeofenceAction::Enter => {
                self.gate.enter(transition.location.odometer);
                ReportOutcome::NoReport
            }
            GeofenceAction::Exit => {
                self.gate.exit();
                self.reporter
                    .report(
                        Candidate::Absent(AbsentReason::GeofenceExit),
                        self.tracking_active,
                        Trigger::GeofenceExit,
                    )
                    .await
            }
        }
    }

    async fn handle_provider_change(&mut self, enabled: bool) -> ReportOutcome {
        if enabled {
            info!("location services enabled");
            if !self.tracking_active && self.reporter.flags().await.tracking_enabled {
                match self.provider.start().await {
                    Ok(()) => self.tracking_active = true,
                    Err(e) => error!("failed to restart tracking: {e}"),
                }
            }
            return ReportOutcome::NoReport;
        }

        warn!("location services disabled");
        self.tracking_active = false;
        self.reporter
            .report(
                Candidate::Absent(AbsentReason::ProviderDisabled),
                self.tracking_active,
                Trigger::ProviderChange,
            )
            .await
    }
}

fn event_trigger(event: &ProviderEvent) -> Trigger {
    match event {
        ProviderEvent::Location(_) => Trigger::Location,
        ProviderEvent::Geofence(t) if t.action == GeofenceAction::Enter => Trigger::GeofenceEnter,
        ProviderEvent::Geofence(_) => Trigger::GeofenceExit,
        ProviderEvent::ProviderChange { .. } => Trigger::ProviderChange,
    }
}
