//! Fact table and geometry lookup

use crate::cache::write_table;
use crate::rates::UnitRates;
use crate::reference::ReferenceTables;
use crate::{PipelineError, Result};
use admin_registry::UnitRegistry;
use chrono::NaiveDate;
use risk_index::ScoredUnit;
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

/// One row per unit per run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactRow {
    pub run_date: NaiveDate,
    pub parent_region_name: String,
    pub unit_name: String,
    pub unit_id: String,
    pub population_total: f64,
    pub exposed_population: f64,
    pub exposure_weight: f64,
    pub rate_30d: f64,
    pub rate_90d: f64,
    pub rate_delta_raw: f64,
    pub spillover: f64,
    pub forecast_signal: f64,
    pub access_signal: f64,
    pub vulnerability_signal: f64,
    #[serde(rename = "DCR100")]
    pub dcr100: f64,
    #[serde(rename = "PRS100")]
    pub prs100: f64,
    pub priority100: f64,
    pub as_of_date: NaiveDate,
}

pub const FACT_COLUMNS: [&str; 18] = [
    "run_date",
    "parent_region_name",
    "unit_name",
    "unit_id",
    "population_total",
    "exposed_population",
    "exposure_weight",
    "rate_30d",
    "rate_90d",
    "rate_delta_raw",
    "spillover",
    "forecast_signal",
    "access_signal",
    "vulnerability_signal",
    "DCR100",
    "PRS100",
    "priority100",
    "as_of_date",
];

/// Join every per-unit signal into fact rows, in registry order.
///
/// All slices must be aligned with the registry; a mismatch means an
/// upstream stage dropped or duplicated a unit.
pub fn assemble_facts(
    registry: &UnitRegistry,
    references: &ReferenceTables,
    rates: &[UnitRates],
    spillover: &[f64],
    scored: &[ScoredUnit],
    as_of_date: NaiveDate,
    run_date: NaiveDate,
) -> Result<Vec<FactRow>> {
    let n = registry.len();
    if rates.len() != n || spillover.len() != n || scored.len() != n {
        return Err(PipelineError::DataIntegrity(format!(
            "signal tables out of step with {} units (rates {}, spillover {}, scores {})",
            n,
            rates.len(),
            spillover.len(),
            scored.len()
        )));
    }

    registry
        .units()
        .iter()
        .enumerate()
        .map(|(i, unit)| {
            let r = &rates[i];
            if r.unit_id != unit.unit_id {
                return Err(PipelineError::DataIntegrity(format!(
                    "rate row {} is for {}, expected {}",
                    i, r.unit_id, unit.unit_id
                )));
            }
            let s = &scored[i];
            Ok(FactRow {
                run_date,
                parent_region_name: unit.parent_region_name.clone(),
                unit_name: unit.unit_name.clone(),
                unit_id: unit.unit_id.clone(),
                population_total: references.population_total(&unit.unit_id),
                exposed_population: r.exposed_population,
                exposure_weight: s.exposure_weight,
                rate_30d: r.rate_30d,
                rate_90d: r.rate_90d,
                rate_delta_raw: r.rate_delta_raw,
                spillover: spillover[i],
                forecast_signal: s.signals.cast,
                access_signal: s.signals.a,
                vulnerability_signal: s.signals.mvi,
                dcr100: s.score.dcr100(),
                prs100: s.score.prs100(),
                priority100: s.score.priority100(),
                as_of_date,
            })
        })
        .collect()
}

/// Unit centroid for map joins
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeometryRow {
    pub parent_region_name: String,
    pub unit_name: String,
    pub unit_id: String,
    pub lon: f64,
    pub lat: f64,
}

pub const GEOMETRY_COLUMNS: [&str; 5] = ["parent_region_name", "unit_name", "unit_id", "lon", "lat"];

/// Centroids computed in Web Mercator and reported as lon/lat.
pub fn geometry_lookup(registry: &UnitRegistry) -> Vec<GeometryRow> {
    registry
        .units()
        .iter()
        .filter_map(|u| {
            let Some(c) = u.geometry.projected_centroid() else {
                warn!("No centroid for unit {}", u.unit_id);
                return None;
            };
            Some(GeometryRow {
                parent_region_name: u.parent_region_name.clone(),
                unit_name: u.unit_name.clone(),
                unit_id: u.unit_id.clone(),
                lon: c.x,
                lat: c.y,
            })
        })
        .collect()
}

pub fn write_facts(path: &Path, rows: &[FactRow]) -> Result<()> {
    write_table(path, &FACT_COLUMNS, rows)?;
    info!("Wrote {} fact rows to {:?}", rows.len(), path);
    Ok(())
}

pub fn write_geometry(path: &Path, rows: &[GeometryRow]) -> Result<()> {
    write_table(path, &GEOMETRY_COLUMNS, rows)?;
    info!("Wrote {} geometry rows to {:?}", rows.len(), path);
    Ok(())
}

/// Highest-priority rows first; ties keep registry order.
pub fn top_by_priority(rows: &[FactRow], n: usize) -> Vec<&FactRow> {
    let mut sorted: Vec<&FactRow> = rows.iter().collect();
    sorted.sort_by(|a, b| b.priority100.total_cmp(&a.priority100));
    sorted.truncate(n);
    sorted
}
