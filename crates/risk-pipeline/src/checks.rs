//! Data-quality side channel
//!
//! Anomalies are written under `<out>/checks/` and logged; they never fail
//! a run.

use crate::cache::write_table;
use crate::rates::ZeroPopulationAnomaly;
use crate::reference::ReferenceTables;
use crate::Result;
use admin_registry::UnitRegistry;
use serde::Serialize;
use std::path::Path;
use tracing::warn;

/// Zero-population units larger than this (km², EPSG:3857) are flagged
pub const ZERO_POP_AREA_KM2: f64 = 5.0;

pub const ZERO_POPULATION_FILE: &str = "zero_population_anomalies.csv";
pub const ZERO_POP_AREA_FILE: &str = "pop_zero_area_flags.csv";

const ANOMALY_COLUMNS: [&str; 6] = [
    "parent_region_name",
    "unit_name",
    "unit_id",
    "events_30d",
    "events_90d",
    "events_prev30",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopulationAreaFlag {
    pub parent_region_name: String,
    pub unit_name: String,
    pub unit_id: String,
    pub area_km2: f64,
}

const AREA_FLAG_COLUMNS: [&str; 4] = ["parent_region_name", "unit_name", "unit_id", "area_km2"];

pub fn zero_population_area_flags(
    registry: &UnitRegistry,
    references: &ReferenceTables,
) -> Vec<PopulationAreaFlag> {
    registry
        .units()
        .iter()
        .filter(|u| references.population_total(&u.unit_id) <= 0.0)
        .filter_map(|u| {
            let area_km2 = u.geometry.projected_area_km2();
            (area_km2 > ZERO_POP_AREA_KM2).then(|| PopulationAreaFlag {
                parent_region_name: u.parent_region_name.clone(),
                unit_name: u.unit_name.clone(),
                unit_id: u.unit_id.clone(),
                area_km2,
            })
        })
        .collect()
}

/// Write both diagnostics; files are only created when there is something
/// to report. Returns the number of rows written per file.
pub fn write_checks(
    checks_dir: &Path,
    anomalies: &[ZeroPopulationAnomaly],
    area_flags: &[PopulationAreaFlag],
) -> Result<(usize, usize)> {
    if !anomalies.is_empty() {
        warn!(
            "{} units have events but no exposed population; their rates are forced to 0",
            anomalies.len()
        );
        write_table(&checks_dir.join(ZERO_POPULATION_FILE), &ANOMALY_COLUMNS, anomalies)?;
    }
    if !area_flags.is_empty() {
        warn!(
            "{} units report zero population over more than {} km²",
            area_flags.len(),
            ZERO_POP_AREA_KM2
        );
        write_table(&checks_dir.join(ZERO_POP_AREA_FILE), &AREA_FLAG_COLUMNS, area_flags)?;
    }
    Ok((anomalies.len(), area_flags.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::PopulationRow;
    use admin_registry::{AdministrativeUnit, MultiPolygon};

    #[test]
    fn test_area_flags() {
        let registry = UnitRegistry::from_units(vec![
            AdministrativeUnit::new("BIG", "R", "Big", "R", MultiPolygon::rectangle(0.0, 0.0, 0.1, 0.1)),
            AdministrativeUnit::new("TINY", "R", "Tiny", "R", MultiPolygon::rectangle(1.0, 0.0, 1.001, 0.001)),
            AdministrativeUnit::new("POP", "R", "Populated", "R", MultiPolygon::rectangle(2.0, 0.0, 2.1, 0.1)),
        ])
        .unwrap();
        let mut references = ReferenceTables::default();
        references.population.insert(
            "POP".to_string(),
            PopulationRow {
                unit_id: "POP".to_string(),
                population_total: 100.0,
                exposed_population: 25.0,
            },
        );

        let flags = zero_population_area_flags(&registry, &references);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].unit_id, "BIG");

        let dir = tempfile::tempdir().unwrap();
        assert_eq!(write_checks(dir.path(), &[], &flags).unwrap(), (0, 1));
        assert!(dir.path().join(ZERO_POP_AREA_FILE).exists());
        assert!(!dir.path().join(ZERO_POPULATION_FILE).exists());
    }
}
