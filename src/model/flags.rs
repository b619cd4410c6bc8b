//! Device-local tracking flags.
//!
//! The last successful write decides what is worth sending next: a real
//! fix is pointless after a real fix, a sentinel pointless after a
//! sentinel. Both facts live in one enum, so they can never disagree.

use serde::{Deserialize, Serialize};

/// What the remote document last received from this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportState {
    /// No write recorded yet.
    #[default]
    Unknown,
    /// Last write was the (0,0) sentinel.
    SentAbsent,
    /// Last write was a real coordinate pair.
    SentPresent,
}

impl std::fmt::Display for ReportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReportState::Unknown => "unknown",
            ReportState::SentAbsent => "sent_absent",
            ReportState::SentPresent => "sent_present",
        };
        write!(f, "{s}")
    }
}

/// Persisted as a single record so an update is never half-applied.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingFlags {
    pub last_report: ReportState,
    /// Id of this worker's document once discovered or created.
    pub document_id: Option<String>,
    /// The user's tracking toggle.
    pub tracking_enabled: bool,
}

impl TrackingFlags {
    pub fn null_coordinates(&self) -> bool {
        self.last_report == ReportState::SentAbsent
    }

    pub fn previous_enabled(&self) -> bool {
        self.last_report == ReportState::SentPresent
    }

    /// Flags after a successful write of `state` to `document_id`.
    pub fn after_write(&self, state: ReportState, document_id: &str) -> Self {
        Self {
            last_report: state,
            document_id: Some(document_id.to_string()),
            tracking_enabled: self.tracking_enabled,
        }
    }

    /// Rebuild from the independent string keys older installs wrote.
    ///
    /// "true" is the only truthy value; anything else counts as unset.
    pub fn from_legacy(
        null_coordinates: Option<&str>,
        previous_enabled: Option<&str>,
        document_id: Option<&str>,
        tracking_enabled: Option<&str>,
    ) -> Self {
        let last_report = match (
            null_coordinates == Some("true"),
            previous_enabled == Some("true"),
        ) {
            // Both set means a crash between the two writes; the sentinel
            // flag is written second on that path.
            (true, _) => ReportState::SentAbsent,
            (false, true) => ReportState::SentPresent,
            (false, false) => ReportState::Unknown,
        };
        Self {
            last_report,
            document_id: document_id.filter(|id| !id.is_empty()).map(str::to_string),
            tracking_enabled: tracking_enabled == Some("true"),
        }
    }
}
