//! Service-area polygons.
//!
//! Loaded once from TOML and handed to the provider at startup. Vertices
//! are `[lng, lat]` pairs, matching what the provider expects.

use crate::error::{Error, Result};
use crate::model::Coordinates;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A named polygonal geofence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub identifier: String,
    /// `[lng, lat]` vertices. The ring closes implicitly.
    pub vertices: Vec<[f64; 2]>,
    #[serde(default = "default_true")]
    pub notify_on_entry: bool,
    #[serde(default = "default_true")]
    pub notify_on_exit: bool,
}

fn default_true() -> bool {
    true
}

impl Geofence {
    pub fn new(identifier: impl Into<String>, vertices: Vec<[f64; 2]>) -> Self {
        Self {
            identifier: identifier.into(),
            vertices,
            notify_on_entry: true,
            notify_on_exit: true,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.identifier.is_empty() {
            return Err(Error::Config("geofence identifier must not be empty".to_string()));
        }
        if self.vertices.len() < 3 {
            return Err(Error::Config(format!(
                "geofence {} needs at least 3 vertices, has {}",
                self.identifier,
                self.vertices.len()
            )));
        }
        for [lng, lat] in &self.vertices {
            if !(-180.0..=180.0).contains(lng) || !(-90.0..=90.0).contains(lat) {
                return Err(Error::Config(format!(
                    "geofence {} has out-of-range vertex [{lng}, {lat}]",
                    self.identifier
                )));
            }
        }
        Ok(())
    }

    /// Even-odd ray cast. Points exactly on an edge may land either side.
    pub fn contains(&self, point: Coordinates) -> bool {
        let (x, y) = (point.longitude, point.latitude);
        let mut inside = false;
        let n = self.vertices.len();
        let mut j = n.wrapping_sub(1);
        for i in 0..n {
            let [xi, yi] = self.vertices[i];
            let [xj, yj] = self.vertices[j];
            if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct GeofenceFile {
    #[serde(default)]
    geofence: Vec<Geofence>,
}

/// Registered geofences, keyed by identifier.
#[derive(Debug, Clone, Default)]
pub struct GeofenceRegistry {
    geofences: BTreeMap<String, Geofence>,
}

impl GeofenceRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_geofences(geofences: impl IntoIterator<Item = Geofence>) -> Result<Self> {
        let mut registry = Self::empty();
        for geofence in geofences {
            registry.insert(geofence)?;
        }
        Ok(registry)
    }

    /// Parse `[[geofence]]` tables from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: GeofenceFile = toml::from_str(content)?;
        Self::from_geofences(file.geofence)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read geofences {}: {e}", path.display()))
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            Error::Toml(e) => Error::Config(format!("bad geofences {}: {e}", path.display())),
            other => other,
        })
    }

    fn insert(&mut self, geofence: Geofence) -> Result<()> {
        geofence.validate()?;
        if self.geofences.contains_key(&geofence.identifier) {
            return Err(Error::Config(format!(
                "duplicate geofence identifier {}",
                geofence.identifier
            )));
        }
        self.geofences.insert(geofence.identifier.clone(), geofence);
        Ok(())
    }

    pub fn get(&self, identifier: &str) -> Option<&Geofence> {
        self.geofences.get(identifier)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Geofence> {
        self.geofences.values()
    }

    pub fn len(&self) -> usize {
        self.geofences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.geofences.is_empty()
    }

    /// Identifiers of every geofence containing `point`.
    pub fn containing(&self, point: Coordinates) -> Vec<&str> {
        self.geofences
            .values()
            .filter(|g| g.contains(point))
            .map(|g| g.identifier.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Geofence {
        Geofence::new(
            "square",
            vec![[77.0, 12.0], [78.0, 12.0], [78.0, 13.0], [77.0, 13.0]],
        )
    }

    #[test]
    fn contains_uses_lng_lat_order() {
        let g = square();
        assert!(g.contains(Coordinates::new(12.5, 77.5)));
        assert!(!g.contains(Coordinates::new(77.5, 12.5)));
        assert!(!g.contains(Coordinates::new(13.5, 77.5)));
    }

    #[test]
    fn concave_polygon() {
        // U shape open at the top.
        let g = Geofence::new(
            "u",
            vec![
                [0.0, 0.0],
                [3.0, 0.0],
                [3.0, 3.0],
                [2.0, 3.0],
                [2.0, 1.0],
                [1.0, 1.0],
                [1.0, 3.0],
                [0.0, 3.0],
            ],
        );
        assert!(g.contains(Coordinates::new(0.5, 1.5)));
        assert!(!g.contains(Coordinates::new(2.0, 1.5)));
        assert!(g.contains(Coordinates::new(2.5, 2.5)));
    }

    #[test]
    fn parses_toml_with_defaults() {
        let registry = GeofenceRegistry::from_toml(
            r#"
            [[geofence]]
            identifier = "indiranagar"
            vertices = [[77.63, 12.97], [77.65, 12.97], [77.65, 12.99]]

            [[geofence]]
            identifier = "koramangala"
            vertices = [[77.61, 12.92], [77.63, 12.92], [77.63, 12.94]]
            notify_on_exit = false
            "#,
        )
        .unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.get("indiranagar").unwrap().notify_on_exit);
        assert!(!registry.get("koramangala").unwrap().notify_on_exit);
    }

    #[test]
    fn rejects_degenerate_and_duplicate() {
        let line = Geofence::new("line", vec![[0.0, 0.0], [1.0, 1.0]]);
        assert!(GeofenceRegistry::from_geofences([line]).is_err());
        assert!(GeofenceRegistry::from_geofences([square(), square()]).is_err());
        let far = Geofence::new("far", vec![[200.0, 0.0], [1.0, 1.0], [0.0, 1.0]]);
        assert!(GeofenceRegistry::from_geofences([far]).is_err());
    }
}
