//! Static reference tables: population, facility counts, poverty rate
//!
//! Each table is built once from its source file and cached as CSV under
//! the data directory. A cached table is reused unless `force_rebuild` is
//! set; a missing cache with a missing source is a configuration error.

use crate::cache::{read_table, write_table};
use crate::{PipelineError, Result};
use admin_registry::join_key::fold_to_ascii;
use admin_registry::{assign_points, Located, Predicate, UnitRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Share of the total population counted as exposed when not supplied
pub const EXPOSED_SHARE: f64 = 0.25;

/// Institutions counted as public health facilities
pub const PUBLIC_INSTITUTIONS: [&str; 6] = ["SSA", "IMB", "IMS", "IST", "SDN", "SMP"];
const ACTIVE_STATUS: &str = "1";
const MOBILE_LEVEL: &str = "6";

/// Rows scanned for the poverty header label
pub const HEADER_SCAN_ROWS: usize = 50;
const POVERTY_HEADER_LABEL: &str = "clave de entidad";
/// Offset of the latest poverty percentage from the state-code column
const POVERTY_PCT_OFFSET: usize = 9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationRow {
    pub unit_id: String,
    pub population_total: f64,
    pub exposed_population: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilityCountRow {
    pub unit_id: String,
    pub unit_name: String,
    pub parent_region_name: String,
    pub facilities: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PovertyRow {
    pub unit_id: String,
    pub region_name: String,
    pub unit_name: String,
    pub poverty_rate: Option<f64>,
}

/// Reference values keyed by unit id
#[derive(Debug, Clone, Default)]
pub struct ReferenceTables {
    pub population: HashMap<String, PopulationRow>,
    pub facilities: HashMap<String, usize>,
    pub poverty: HashMap<String, Option<f64>>,
}

impl ReferenceTables {
    pub fn population_total(&self, unit_id: &str) -> f64 {
        self.population.get(unit_id).map_or(0.0, |p| p.population_total)
    }

    pub fn exposed_population(&self, unit_id: &str) -> f64 {
        self.population.get(unit_id).map_or(0.0, |p| p.exposed_population)
    }

    pub fn facilities(&self, unit_id: &str) -> usize {
        self.facilities.get(unit_id).copied().unwrap_or(0)
    }

    pub fn poverty_rate(&self, unit_id: &str) -> Option<f64> {
        self.poverty.get(unit_id).copied().flatten()
    }
}

/// Reuse `cache` or rebuild it with `build`, then index by unit id.
fn cached_or_build<T, F>(cache: &Path, source: &Path, force: bool, label: &str, build: F) -> Result<Vec<T>>
where
    T: Serialize + for<'de> Deserialize<'de>,
    F: FnOnce(&Path) -> Result<(Vec<T>, &'static [&'static str])>,
{
    if !force {
        if let Some(rows) = read_table::<T>(cache)? {
            info!("Loaded {} {} rows from {:?}", rows.len(), label, cache);
            return Ok(rows);
        }
    }
    if !source.is_file() {
        return Err(PipelineError::Config(format!(
            "{} source not found: {}",
            label,
            source.display()
        )));
    }

    info!("Building {} table from {:?}", label, source);
    let (rows, header) = build(source)?;
    write_table(cache, header, &rows)?;
    info!("Saved {} {} rows to {:?}", rows.len(), label, cache);
    Ok(rows)
}

fn index_unique<T>(rows: Vec<T>, label: &str, key: impl Fn(&T) -> &str) -> Result<HashMap<String, T>> {
    let mut out = HashMap::with_capacity(rows.len());
    for row in rows {
        let id = key(&row).to_string();
        if out.contains_key(&id) {
            return Err(PipelineError::DataIntegrity(format!(
                "{} table lists unit {} more than once",
                label, id
            )));
        }
        out.insert(id, row);
    }
    Ok(out)
}

pub fn load_reference_tables(
    config: &crate::RunConfig,
    registry: &UnitRegistry,
) -> Result<ReferenceTables> {
    let paths = config.paths();
    let force = config.force_rebuild;

    let population = cached_or_build(&paths.population, &config.population_source, force, "population", |src| {
        Ok((build_population(src)?, &POPULATION_COLUMNS[..]))
    })?;
    let facilities = cached_or_build(&paths.facilities, &config.facility_source, force, "facility", |src| {
        Ok((build_facility_counts(src, registry)?, &FACILITY_COLUMNS[..]))
    })?;
    let poverty = cached_or_build(&paths.poverty, &config.poverty_source, force, "poverty", |src| {
        Ok((build_poverty(src)?, &POVERTY_COLUMNS[..]))
    })?;

    let tables = ReferenceTables {
        population: index_unique(population, "population", |r| r.unit_id.as_str())?,
        facilities: index_unique(facilities, "facility", |r| r.unit_id.as_str())?
            .into_iter()
            .map(|(id, r)| (id, r.facilities))
            .collect(),
        poverty: index_unique(poverty, "poverty", |r| r.unit_id.as_str())?
            .into_iter()
            .map(|(id, r)| (id, r.poverty_rate))
            .collect(),
    };

    let missing = registry
        .units()
        .iter()
        .filter(|u| !tables.population.contains_key(&u.unit_id))
        .count();
    if missing > 0 {
        warn!("{} units have no population row; treating them as zero", missing);
    }
    Ok(tables)
}

// ---------------------------------------------------------------------------
// Population
// ---------------------------------------------------------------------------

pub const POPULATION_COLUMNS: [&str; 3] = ["unit_id", "population_total", "exposed_population"];

#[derive(Debug, Deserialize)]
struct RawPopulationRow {
    unit_id: String,
    population_total: Option<f64>,
    #[serde(default)]
    exposed_population: Option<f64>,
}

/// Clamp negatives to 0, round, and derive the exposed share when absent.
pub fn build_population(source: &Path) -> Result<Vec<PopulationRow>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(source)?;
    let headers = reader.headers()?.clone();
    if !headers.iter().any(|h| h == "unit_id") || !headers.iter().any(|h| h == "population_total") {
        return Err(PipelineError::DataIntegrity(format!(
            "population source {} lacks unit_id/population_total columns",
            source.display()
        )));
    }

    let mut rows = Vec::new();
    for raw in reader.deserialize::<RawPopulationRow>() {
        let raw = raw?;
        let total = raw.population_total.filter(|t| t.is_finite()).unwrap_or(0.0).max(0.0);
        let exposed = raw
            .exposed_population
            .filter(|e| e.is_finite())
            .map(|e| e.max(0.0))
            .unwrap_or(total * EXPOSED_SHARE);
        rows.push(PopulationRow {
            unit_id: raw.unit_id.trim().to_string(),
            population_total: total.round(),
            exposed_population: exposed.round(),
        });
    }
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Facilities
// ---------------------------------------------------------------------------

pub const FACILITY_COLUMNS: [&str; 4] = ["unit_id", "unit_name", "parent_region_name", "facilities"];

const COL_INSTITUTION: &str = "clave_de_la_institucion";
const COL_STATUS: &str = "clave_estatus_de_operacion";
const COL_LEVEL: &str = "clave_nivel_atencion";
const COL_LATITUDE: &str = "latitud";
const COL_LONGITUDE: &str = "longitud";

/// Lowercase, ASCII-fold and underscore a column header.
pub fn normalize_header(raw: &str) -> String {
    fold_to_ascii(raw.trim())
        .to_ascii_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

#[derive(Debug, Clone, PartialEq)]
pub struct FacilityPoint {
    pub institution: String,
    pub status: String,
    pub level: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Located for FacilityPoint {
    fn position(&self) -> Option<(f64, f64)> {
        Some((self.longitude?, self.latitude?))
    }
}

impl FacilityPoint {
    /// Public institution, operating, not a mobile unit
    pub fn is_counted(&self) -> bool {
        PUBLIC_INSTITUTIONS.contains(&self.institution.as_str())
            && self.status == ACTIVE_STATUS
            && self.level != MOBILE_LEVEL
    }
}

/// Codes may arrive as `1` or `1.0`; compare on the integer form.
fn code_cell(raw: &str) -> String {
    let s = raw.trim().to_ascii_uppercase();
    match s.strip_suffix(".0") {
        Some(stripped) if stripped.chars().all(|c| c.is_ascii_digit()) && !stripped.is_empty() => {
            stripped.to_string()
        }
        _ => s,
    }
}

pub fn read_facility_points(source: &Path) -> Result<Vec<FacilityPoint>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(source)?;
    let headers: Vec<String> = reader.headers()?.iter().map(normalize_header).collect();
    let column = |name: &str| -> Result<usize> {
        headers.iter().position(|h| h == name).ok_or_else(|| {
            PipelineError::DataIntegrity(format!("facility source lacks column {}", name))
        })
    };
    let (inst, status, level) = (column(COL_INSTITUTION)?, column(COL_STATUS)?, column(COL_LEVEL)?);
    let (lat, lon) = (column(COL_LATITUDE)?, column(COL_LONGITUDE)?);

    let mut points = Vec::new();
    for record in reader.records() {
        let record = record?;
        let cell = |i: usize| record.get(i).unwrap_or("");
        let number = |i: usize| cell(i).trim().parse::<f64>().ok().filter(|x| x.is_finite());
        points.push(FacilityPoint {
            institution: code_cell(cell(inst)),
            status: code_cell(cell(status)),
            level: code_cell(cell(level)),
            latitude: number(lat),
            longitude: number(lon),
        });
    }
    Ok(points)
}

/// Count filtered facilities strictly inside each unit.
pub fn count_facilities(points: Vec<FacilityPoint>, registry: &UnitRegistry) -> Vec<FacilityCountRow> {
    let total = points.len();
    let kept: Vec<FacilityPoint> = points.into_iter().filter(FacilityPoint::is_counted).collect();
    info!("Facility filter kept {} of {} points", kept.len(), total);

    let assignment = assign_points(kept, registry, Predicate::Within);
    let mut counts = vec![0usize; registry.len()];
    for a in assignment.matched() {
        if let Some(i) = a.unit_id.as_deref().and_then(|id| registry.index_of(id)) {
            counts[i] += 1;
        }
    }

    registry
        .units()
        .iter()
        .zip(counts)
        .map(|(u, facilities)| FacilityCountRow {
            unit_id: u.unit_id.clone(),
            unit_name: u.unit_name.clone(),
            parent_region_name: u.parent_region_name.clone(),
            facilities,
        })
        .collect()
}

pub fn build_facility_counts(source: &Path, registry: &UnitRegistry) -> Result<Vec<FacilityCountRow>> {
    Ok(count_facilities(read_facility_points(source)?, registry))
}

// ---------------------------------------------------------------------------
// Poverty
// ---------------------------------------------------------------------------

pub const POVERTY_COLUMNS: [&str; 4] = ["unit_id", "region_name", "unit_name", "poverty_rate"];

/// Percentage with `,` or `.` decimals; missing markers give `None`.
pub fn parse_percentage(raw: &str) -> Option<f64> {
    let s = raw.trim().to_ascii_lowercase();
    if matches!(s.as_str(), "" | "n.d." | "n.d" | "nd" | "na" | "n/a") {
        return None;
    }
    s.replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(0.0, 100.0))
}

fn zero_pad(raw: &str, width: usize) -> Option<String> {
    let s = raw.trim();
    let s = s.strip_suffix(".0").unwrap_or(s);
    if s.is_empty() || s.len() > width || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("{:0>width$}", s, width = width))
}

/// Parse the municipal poverty export.
///
/// The header row sits at a variable offset; it is the first of the
/// leading rows with a cell starting with "clave de entidad". Data columns
/// are read relative to that cell: state code, state name, 5-digit
/// municipality code, municipality name, and the latest percentage.
pub fn parse_poverty_rows(records: &[csv::StringRecord]) -> Result<Vec<PovertyRow>> {
    let header = records.iter().take(HEADER_SCAN_ROWS).enumerate().find_map(|(i, r)| {
        r.iter()
            .position(|cell| cell.trim().to_lowercase().starts_with(POVERTY_HEADER_LABEL))
            .map(|col| (i, col))
    });
    let Some((header_row, base)) = header else {
        return Err(PipelineError::DataIntegrity(format!(
            "poverty source has no '{}' header in its first {} rows",
            POVERTY_HEADER_LABEL, HEADER_SCAN_ROWS
        )));
    };

    let mut seen = std::collections::HashSet::new();
    let mut rows = Vec::new();
    for record in &records[header_row + 1..] {
        let cell = |offset: usize| record.get(base + offset).unwrap_or("").trim();
        let (Some(state), Some(muni)) = (zero_pad(cell(0), 2), zero_pad(cell(2), 5)) else {
            continue;
        };
        let unit_id = format!("MX{}{}", state, &muni[2..]);
        let row = PovertyRow {
            unit_id,
            region_name: cell(1).to_string(),
            unit_name: cell(3).to_string(),
            poverty_rate: parse_percentage(cell(POVERTY_PCT_OFFSET)),
        };
        if seen.insert(row.unit_id.clone()) {
            rows.push(row);
        }
    }
    Ok(rows)
}

pub fn build_poverty(source: &Path) -> Result<Vec<PovertyRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(source)?;
    let records = reader.records().collect::<std::result::Result<Vec<_>, _>>()?;
    let rows = parse_poverty_rows(&records)?;
    let missing = rows.iter().filter(|r| r.poverty_rate.is_none()).count();
    info!("Parsed {} municipal poverty rows ({} without a rate)", rows.len(), missing);
    Ok(rows)
}
