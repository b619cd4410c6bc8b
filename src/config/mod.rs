//! Typed configuration from environment variables.
//!
//! Loads once at startup. Sensitive values wrapped in secrecy::SecretString
//! to prevent log leaks.

pub mod tracker;

pub use tracker::{Accuracy, TrackerConfig};

use crate::error::{Error, Result};
use secrecy::SecretString;
use std::path::PathBuf;

#[derive(Debug)]
pub struct Config {
    /// Postgres URL for the document store. `None` runs against memory.
    pub database_url: Option<SecretString>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// File backing the device-local key-value store.
    pub state_path: PathBuf,
    /// TOML file with service-area geofences.
    pub geofences_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let geofences_path = std::env::var("BEACON_GEOFENCES").ok().map(PathBuf::from);
        if let Some(ref path) = geofences_path
            && path.as_os_str().is_empty()
        {
            return Err(Error::Config("BEACON_GEOFENCES is set but empty".to_string()));
        }

        Ok(Self {
            database_url: std::env::var("WORKER_BEACON_DATABASE_URL")
                .ok()
                .map(SecretString::from),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            state_path: std::env::var("BEACON_STATE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("beacon-state.json")),
            geofences_path,
        })
    }

    /// Like [`Config::from_env`], but the database URL must be present.
    pub fn require_database(&self) -> Result<&SecretString> {
        self.database_url.as_ref().ok_or_else(|| {
            Error::Config(
                "required environment variable WORKER_BEACON_DATABASE_URL is not set".to_string(),
            )
        })
    }
}
