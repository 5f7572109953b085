//! Administrative Registry
//!
//! Canonical set of second-level administrative units (ADM2) with repaired
//! geometry, parent-region name and a normalized cross-source join key.
//! The registry is built once per run and shared read-only by the spatial
//! assignment and spillover stages.

use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

pub mod assign;
pub mod geometry;
pub mod join_key;
pub mod loader;

pub use assign::{assign_points, Assigned, Assignment, Located, Predicate};
pub use geometry::{BoundingBox, Coord, Location, MultiPolygon, Polygon};
pub use join_key::JoinKeyNormalizer;
pub use loader::{load_boundaries, BoundaryFields};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("GeoJSON parse error: {0}")]
    GeoJson(#[from] geojson::Error),
    #[error("Boundary source is not a FeatureCollection")]
    NotFeatureCollection,
    #[error("Unit not found: {0}")]
    NotFound(String),
    #[error("Duplicate unit code: {0}")]
    DuplicateUnit(String),
    #[error("Unit {0} has no valid polygon after repair")]
    InvalidGeometry(String),
    #[error("Boundary source contains no units")]
    Empty,
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// One ADM2 unit
#[derive(Debug, Clone, Serialize)]
pub struct AdministrativeUnit {
    pub unit_id: String,
    pub parent_region_name: String,
    pub unit_name: String,
    pub parent_join_key: String,
    #[serde(skip)]
    pub geometry: MultiPolygon,
    #[serde(skip)]
    pub bbox: BoundingBox,
}

impl AdministrativeUnit {
    pub fn new(
        unit_id: impl Into<String>,
        parent_region_name: impl Into<String>,
        unit_name: impl Into<String>,
        parent_join_key: impl Into<String>,
        geometry: MultiPolygon,
    ) -> Self {
        let bbox = geometry.bbox();
        Self {
            unit_id: unit_id.into(),
            parent_region_name: parent_region_name.into(),
            unit_name: unit_name.into(),
            parent_join_key: parent_join_key.into(),
            geometry,
            bbox,
        }
    }

    pub fn locate(&self, p: Coord) -> Location {
        if !self.bbox.contains(p, geometry::BOUNDARY_EPS) {
            return Location::Exterior;
        }
        self.geometry.locate(p)
    }
}

/// Immutable, ordered set of units keyed by `unit_id`
#[derive(Debug, Clone)]
pub struct UnitRegistry {
    units: Vec<AdministrativeUnit>,
    index: HashMap<String, usize>,
}

impl UnitRegistry {
    /// Units keep the order given; ids must be unique.
    pub fn from_units(units: Vec<AdministrativeUnit>) -> Result<Self> {
        let mut index = HashMap::with_capacity(units.len());
        for (i, unit) in units.iter().enumerate() {
            if unit.geometry.is_empty() {
                return Err(RegistryError::InvalidGeometry(unit.unit_id.clone()));
            }
            if index.insert(unit.unit_id.clone(), i).is_some() {
                return Err(RegistryError::DuplicateUnit(unit.unit_id.clone()));
            }
        }
        Ok(Self { units, index })
    }

    pub fn units(&self) -> &[AdministrativeUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn get(&self, unit_id: &str) -> Result<&AdministrativeUnit> {
        self.index_of(unit_id)
            .map(|i| &self.units[i])
            .ok_or_else(|| RegistryError::NotFound(unit_id.to_string()))
    }

    pub fn index_of(&self, unit_id: &str) -> Option<usize> {
        self.index.get(unit_id).copied()
    }

    /// First unit (in registry order) satisfying `predicate` for the point.
    pub fn locate(&self, p: Coord, predicate: Predicate) -> Option<&AdministrativeUnit> {
        self.units
            .iter()
            .find(|u| predicate.accepts(u.locate(p)))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn square_unit(id: &str, region: &str, x0: f64, y0: f64, size: f64) -> AdministrativeUnit {
        let geometry = MultiPolygon::rectangle(x0, y0, x0 + size, y0 + size);
        AdministrativeUnit::new(id, region, format!("Unit {}", id), region, geometry)
    }
}
