//! Tracking parameters handed to the geolocation provider and the
//! reporting service. Fixed at setup.

use crate::error::{Error, Result};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Requested fix quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accuracy {
    #[default]
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub desired_accuracy: Accuracy,
    /// Minimum movement in meters between location callbacks.
    pub distance_filter_m: f64,
    /// Keep tracking after the app process is terminated.
    pub stop_on_terminate: bool,
    pub start_on_boot: bool,
    pub foreground_service: bool,
    pub enable_headless: bool,
    /// Odometer distance travelled inside a polygon before a new report.
    pub displacement_threshold_m: f64,
    pub position_timeout_secs: u64,
    /// Oldest cached fix accepted when reading the current position.
    pub position_max_age_secs: u64,
    pub collection: String,
    /// Offset of the report timestamp from UTC, in minutes (Asia/Kolkata).
    pub utc_offset_minutes: i32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            desired_accuracy: Accuracy::High,
            distance_filter_m: 50.0,
            stop_on_terminate: false,
            start_on_boot: true,
            foreground_service: true,
            enable_headless: true,
            displacement_threshold_m: 400.0,
            position_timeout_secs: 30,
            position_max_age_secs: 5,
            collection: "worker_locations".to_string(),
            utc_offset_minutes: 330,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TrackerFile {
    #[serde(default)]
    tracker: TrackerConfig,
}

impl TrackerConfig {
    /// Read the `[tracker]` table from a TOML file. Missing keys keep defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let file: TrackerFile = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad tracker config {}: {e}", path.display())))?;
        file.tracker.validate()?;
        Ok(file.tracker)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.distance_filter_m >= 0.0) {
            return Err(Error::Config("distance_filter_m must be >= 0".to_string()));
        }
        if !(self.displacement_threshold_m > 0.0) {
            return Err(Error::Config(
                "displacement_threshold_m must be positive".to_string(),
            ));
        }
        if self.collection.is_empty() {
            return Err(Error::Config("collection must not be empty".to_string()));
        }
        self.report_offset()?;
        Ok(())
    }

    pub fn position_timeout(&self) -> Duration {
        Duration::from_secs(self.position_timeout_secs)
    }

    pub fn position_max_age(&self) -> Duration {
        Duration::from_secs(self.position_max_age_secs)
    }

    /// Timezone used for the document timestamp.
    pub fn report_offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            Error::Config(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_field_tracking_profile() {
        let config = TrackerConfig::default();
        assert_eq!(config.desired_accuracy, Accuracy::High);
        assert_eq!(config.distance_filter_m, 50.0);
        assert!(!config.stop_on_terminate);
        assert!(config.start_on_boot);
        assert_eq!(config.displacement_threshold_m, 400.0);
        assert_eq!(config.position_timeout(), Duration::from_secs(30));
        assert_eq!(config.position_max_age(), Duration::from_secs(5));
        assert_eq!(
            config.report_offset().unwrap(),
            FixedOffset::east_opt(5 * 3600 + 1800).unwrap()
        );
    }

    #[test]
    fn partial_table_keeps_defaults() {
        let file: TrackerFile = toml::from_str(
            r#"
            [tracker]
            displacement_threshold_m = 250.0
            collection = "locations"
            "#,
        )
        .unwrap();
        assert_eq!(file.tracker.displacement_threshold_m, 250.0);
        assert_eq!(file.tracker.collection, "locations");
        assert_eq!(file.tracker.distance_filter_m, 50.0);
    }

    #[test]
    fn rejects_zero_threshold() {
        let config = TrackerConfig {
            displacement_threshold_m: 0.0,
            ..TrackerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
