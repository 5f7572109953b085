//! Boundary loading from GeoJSON

use crate::geometry::{Coord, MultiPolygon, Polygon};
use crate::{AdministrativeUnit, JoinKeyNormalizer, RegistryError, Result, UnitRegistry};
use geojson::{Feature, GeoJson, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Attribute names in the boundary source
#[derive(Debug, Clone)]
pub struct BoundaryFields {
    pub unit_id: String,
    pub unit_name: String,
    pub parent_region_name: String,
}

impl Default for BoundaryFields {
    fn default() -> Self {
        Self {
            unit_id: "ADM2_PCODE".to_string(),
            unit_name: "ADM2_ES".to_string(),
            parent_region_name: "ADM1_ES".to_string(),
        }
    }
}

/// Property as a trimmed string; numbers are rendered without quotes.
fn property_string(feature: &Feature, name: &str) -> Option<String> {
    let value = feature.property(name)?;
    let s = match value {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn ring_coords(ring: &[Vec<f64>]) -> Vec<Coord> {
    ring.iter()
        .filter(|pos| pos.len() >= 2)
        .map(|pos| Coord::new(pos[0], pos[1]))
        .collect()
}

fn polygons_from_rings(rings: &[Vec<Vec<f64>>]) -> Vec<Polygon> {
    let Some((exterior, holes)) = rings.split_first() else {
        return Vec::new();
    };
    Polygon::repaired(
        ring_coords(exterior),
        holes.iter().map(|h| ring_coords(h)).collect(),
    )
}

fn geometry_of(feature: &Feature) -> MultiPolygon {
    let polygons = match feature.geometry.as_ref().map(|g| &g.value) {
        Some(Value::Polygon(rings)) => polygons_from_rings(rings),
        Some(Value::MultiPolygon(parts)) => {
            parts.iter().flat_map(|p| polygons_from_rings(p)).collect()
        }
        _ => Vec::new(),
    };
    MultiPolygon(polygons)
}

struct PendingUnit {
    parent_region_name: String,
    unit_name: String,
    geometry: MultiPolygon,
}

/// Parse a FeatureCollection into a registry.
///
/// Features sharing a unit code are merged into one multi-part unit by
/// concatenating their parts; parts are not unioned, so an edge shared by
/// two parts of the same unit stays in the geometry. A point on such an
/// edge locates as `Boundary` (it intersects the unit but is not within
/// it), and area sums the parts. Units are ordered by code.
pub fn registry_from_geojson(
    text: &str,
    fields: &BoundaryFields,
    normalizer: &JoinKeyNormalizer,
) -> Result<UnitRegistry> {
    let collection = match text.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(RegistryError::NotFeatureCollection),
    };

    let mut pending: BTreeMap<String, PendingUnit> = BTreeMap::new();
    let mut skipped = 0;

    for feature in &collection.features {
        let Some(unit_id) = property_string(feature, &fields.unit_id) else {
            skipped += 1;
            continue;
        };
        let geometry = geometry_of(feature);

        match pending.get_mut(&unit_id) {
            Some(existing) => existing.geometry.extend(geometry),
            None => {
                pending.insert(
                    unit_id,
                    PendingUnit {
                        parent_region_name: property_string(feature, &fields.parent_region_name)
                            .unwrap_or_default(),
                        unit_name: property_string(feature, &fields.unit_name).unwrap_or_default(),
                        geometry,
                    },
                );
            }
        }
    }

    if skipped > 0 {
        warn!("Skipped {} boundary features without a {} attribute", skipped, fields.unit_id);
    }
    if pending.is_empty() {
        return Err(RegistryError::Empty);
    }

    let units = pending
        .into_iter()
        .map(|(unit_id, p)| {
            if p.geometry.is_empty() {
                return Err(RegistryError::InvalidGeometry(unit_id));
            }
            let join_key = normalizer.normalize(&p.parent_region_name);
            Ok(AdministrativeUnit::new(
                unit_id,
                p.parent_region_name,
                p.unit_name,
                join_key,
                p.geometry,
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    UnitRegistry::from_units(units)
}

/// Load the ADM2 boundary file
pub fn load_boundaries(
    path: impl AsRef<Path>,
    fields: &BoundaryFields,
    normalizer: &JoinKeyNormalizer,
) -> Result<UnitRegistry> {
    let path = path.as_ref();
    info!("Loading ADM2 boundaries from {:?}", path);

    let text = std::fs::read_to_string(path)?;
    let registry = registry_from_geojson(&text, fields, normalizer)?;

    info!("Loaded {} administrative units", registry.len());
    Ok(registry)
}
