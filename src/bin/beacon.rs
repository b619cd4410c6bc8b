//! beacon CLI: run the reporting service against a recorded track and
//! inspect device-local state.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use worker_beacon::config::{Config, TrackerConfig};
use worker_beacon::db::Db;
use worker_beacon::document::{DocumentStore, MemoryDocumentStore};
use worker_beacon::geofence::GeofenceRegistry;
use worker_beacon::model::Coordinates;
use worker_beacon::provider::SimulatedProvider;
use worker_beacon::provider::simulated::load_track;
use worker_beacon::storage::{FileKv, FlagStore, KeyValueStore, flags::WORKER_ID_KEY};
use worker_beacon::telemetry::{TelemetryConfig, init_telemetry};
use worker_beacon::tracker::ReportingServiceBuilder;

#[derive(Parser)]
#[command(name = "beacon", about = "Geofence-aware location reporting for field workers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reporting service, replaying a recorded track
    Serve {
        /// JSON-lines track file ({"latitude": .., "longitude": ..} per line)
        #[arg(long)]
        track: PathBuf,
        /// Delay between track points
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
        /// TOML file with a [tracker] table
        #[arg(long)]
        tracker_config: Option<PathBuf>,
        /// Store the worker id before starting (normally set at login)
        #[arg(long)]
        worker_id: Option<i64>,
        /// Switch tracking on before replaying
        #[arg(long)]
        toggle_on: bool,
    },
    /// Inspect or clear the tracking flags
    Flags {
        #[command(subcommand)]
        action: FlagsAction,
    },
    /// Validate a geofence file
    Geofences {
        /// Geofence TOML file
        path: PathBuf,
        /// Report which geofences contain this "lat,lng" point
        #[arg(long)]
        point: Option<String>,
    },
}

#[derive(Subcommand)]
enum FlagsAction {
    /// Print the current flags
    Show,
    /// Forget the last reported state and cached document id
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Serve {
            track,
            interval_ms,
            tracker_config,
            worker_id,
            toggle_on,
        } => {
            let _guard = init_telemetry(TelemetryConfig::from_config(&config, "beacon"))?;
            let opts = ServeOptions {
                track,
                interval: Duration::from_millis(interval_ms),
                tracker: match tracker_config {
                    Some(path) => TrackerConfig::load(&path)?,
                    None => TrackerConfig::default(),
                },
                worker_id,
                toggle_on,
            };
            match config.database_url {
                Some(_) => {
                    let db = Db::from_config(&config).await?;
                    cmd_serve(&config, opts, db).await
                }
                None => {
                    info!("no database configured, reporting to memory");
                    cmd_serve(&config, opts, MemoryDocumentStore::new()).await
                }
            }
        }
        Command::Flags { action } => cmd_flags(&config.state_path, action).await,
        Command::Geofences { path, point } => cmd_geofences(&path, point.as_deref()),
    }
}

struct ServeOptions {
    track: PathBuf,
    interval: Duration,
    tracker: TrackerConfig,
    worker_id: Option<i64>,
    toggle_on: bool,
}

async fn cmd_serve<D: DocumentStore>(
    config: &Config,
    opts: ServeOptions,
    documents: D,
) -> anyhow::Result<()> {
    let track = load_track(&opts.track).await?;
    let geofences = match config.geofences_path {
        Some(ref path) => GeofenceRegistry::load(path)?,
        None => GeofenceRegistry::empty(),
    };

    let kv = FileKv::open(&config.state_path).await?;
    if let Some(id) = opts.worker_id {
        kv.set(WORKER_ID_KEY, &id.to_string()).await?;
    }

    let provider = SimulatedProvider::new();
    provider.set_current_position(track.first().copied());

    let service = ReportingServiceBuilder::new(provider.clone(), kv, documents)
        .config(opts.tracker)
        .geofences(geofences)
        .on_location_update(|coords| info!(%coords, "location"))
        .spawn()
        .await?;
    let handle = service.handle();

    if opts.toggle_on {
        let outcome = handle.set_tracking(true).await?;
        println!("toggle on: {outcome:?}");
    }

    tokio::select! {
        _ = provider.replay(&track, opts.interval) => {
            info!(points = track.len(), "track finished");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
        }
    }

    let snapshot = handle.snapshot().await?;
    println!(
        "tracking: {}  last report: {}  document: {}  events: {}",
        snapshot.tracking_active,
        snapshot.flags.last_report,
        snapshot.flags.document_id.as_deref().unwrap_or("-"),
        snapshot.events_handled,
    );

    service.shutdown().await?;
    Ok(())
}

async fn cmd_flags(state_path: &Path, action: FlagsAction) -> anyhow::Result<()> {
    let store = FlagStore::new(FileKv::open(state_path).await?);
    match action {
        FlagsAction::Show => {
            let flags = store.load().await;
            let worker = match store.worker_id().await {
                Ok(id) => id.to_string(),
                Err(_) => "-".to_string(),
            };
            println!("Worker:           {worker}");
            println!("Tracking:         {}", flags.tracking_enabled);
            println!("Last report:      {}", flags.last_report);
            println!("nullCoordinates:  {}", flags.null_coordinates());
            println!("previousEnabled:  {}", flags.previous_enabled());
            println!(
                "Document:         {}",
                flags.document_id.as_deref().unwrap_or("-")
            );
        }
        FlagsAction::Reset => {
            store.reset().await?;
            println!("Tracking flags cleared.");
        }
    }
    Ok(())
}

fn cmd_geofences(path: &Path, point: Option<&str>) -> anyhow::Result<()> {
    let registry = GeofenceRegistry::load(path)?;
    println!("{:<24}  {:<8}  {:<5}  EXIT", "IDENTIFIER", "VERTICES", "ENTRY");
    println!("{}", "-".repeat(48));
    for g in registry.iter() {
        println!(
            "{:<24}  {:<8}  {:<5}  {}",
            g.identifier,
            g.vertices.len(),
            g.notify_on_entry,
            g.notify_on_exit
        );
    }
    println!("\n{} geofence(s)", registry.len());

    if let Some(point) = point {
        let coords = parse_point(point)?;
        let inside = registry.containing(coords);
        if inside.is_empty() {
            println!("{coords} is outside every geofence");
        } else {
            println!("{coords} is inside: {}", inside.join(", "));
        }
    }
    Ok(())
}

fn parse_point(s: &str) -> anyhow::Result<Coordinates> {
    let (lat, lng) = s
        .split_once(',')
        .ok_or_else(|| anyhow::anyhow!("point must be \"lat,lng\", got {s:?}"))?;
    Ok(Coordinates::new(lat.trim().parse()?, lng.trim().parse()?))
}
