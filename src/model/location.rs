//! Location, geofence and document types.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Format of `WorkerLocationDocument::timestamp`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ---------------------------------------------------------------------------
// Coordinates
// ---------------------------------------------------------------------------

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// The reserved "no trackable location" pair. Never a real fix.
    pub const SENTINEL: Coordinates = Coordinates {
        latitude: 0.0,
        longitude: 0.0,
    };

    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }

    /// Great-circle distance in meters (haversine, mean earth radius).
    pub fn distance_m(&self, other: &Coordinates) -> f64 {
        const EARTH_RADIUS_M: f64 = 6_371_008.8;
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let dlat = lat2 - lat1;
        let dlng = (other.longitude - self.longitude).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

/// A location callback from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub coords: Coordinates,
    /// Cumulative meters travelled as reported by the provider.
    pub odometer: f64,
}

impl LocationUpdate {
    pub fn new(latitude: f64, longitude: f64, odometer: f64) -> Self {
        Self {
            coords: Coordinates::new(latitude, longitude),
            odometer,
        }
    }
}

// ---------------------------------------------------------------------------
// Geofence events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GeofenceAction {
    Enter,
    Exit,
}

impl std::fmt::Display for GeofenceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GeofenceAction::Enter => "ENTER",
            GeofenceAction::Exit => "EXIT",
        };
        write!(f, "{s}")
    }
}

/// A geofence crossing reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceTransition {
    pub action: GeofenceAction,
    pub identifier: String,
    pub location: LocationUpdate,
}

/// Everything the provider can push at the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderEvent {
    Location(LocationUpdate),
    Geofence(GeofenceTransition),
    /// Location services were switched on or off at the OS level.
    ProviderChange { enabled: bool },
}

// ---------------------------------------------------------------------------
// Remote document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl From<Coordinates> for GeoPoint {
    fn from(c: Coordinates) -> Self {
        Self {
            latitude: c.latitude,
            longitude: c.longitude,
        }
    }
}

/// The single per-worker document in the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerLocationDocument {
    pub location: GeoPoint,
    /// Local wall time, `YYYY-MM-DD HH:mm:ss`.
    pub timestamp: String,
    pub worker_id: i64,
}

impl WorkerLocationDocument {
    pub fn new(
        worker_id: i64,
        coords: Coordinates,
        at: DateTime<Utc>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            location: coords.into(),
            timestamp: at.with_timezone(&offset).format(TIMESTAMP_FORMAT).to_string(),
            worker_id,
        }
    }

    /// Field map as written to the document store.
    pub fn to_fields(&self) -> crate::Result<serde_json::Map<String, serde_json::Value>> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(crate::error::Error::Other(format!(
                "document serialized to non-object: {other}"
            ))),
        }
    }
}
