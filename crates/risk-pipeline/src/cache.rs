//! Refresh decision and the on-disk event/forecast caches
//!
//! The two window tables written by a refresh are the cache read back on a
//! skip. A missing table on a skip is treated as empty (with a warning); a
//! table that exists but cannot be read fails the run, so an outage never
//! turns into "zero events everywhere".

use crate::{PipelineError, Result};
use admin_registry::Assigned;
use chrono::{DateTime, NaiveDate, Utc};
use event_feed::EventRecord;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{info, warn};

/// Persisted after every successful refresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub recency_cutoff_date: NaiveDate,
    pub last_run_timestamp: DateTime<Utc>,
}

/// Missing or unparseable metadata reads as `None`.
pub fn read_metadata(path: &Path) -> Option<RunMetadata> {
    let file = File::open(path).ok()?;
    match serde_json::from_reader(BufReader::new(file)) {
        Ok(meta) => Some(meta),
        Err(e) => {
            warn!("Ignoring unreadable run metadata {:?}: {}", path, e);
            None
        }
    }
}

/// Outcome of the best-effort metadata write
#[must_use]
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataWrite {
    Written,
    Failed(String),
}

impl MetadataWrite {
    /// Log a failure; the run carries on either way.
    pub fn log(&self, path: &Path) {
        match self {
            MetadataWrite::Written => info!("Saved run metadata to {:?}", path),
            MetadataWrite::Failed(reason) => {
                warn!("Could not save run metadata to {:?}: {}", path, reason)
            }
        }
    }
}

pub fn write_metadata(path: &Path, meta: &RunMetadata) -> MetadataWrite {
    let result = serde_json::to_string_pretty(meta)
        .map_err(|e| e.to_string())
        .and_then(|body| std::fs::write(path, body).map_err(|e| e.to_string()));
    match result {
        Ok(()) => MetadataWrite::Written,
        Err(reason) => MetadataWrite::Failed(reason),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    /// Refresh turned off by configuration
    Disabled,
    /// Cached tables match the provider's current cutoff
    CutoffUnchanged,
    /// Cached tables missing
    NoCache,
    /// No metadata, or metadata for another cutoff
    CutoffChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshDecision {
    pub refresh: bool,
    pub reason: RefreshReason,
}

/// `refresh = enabled && !(cache present && stored cutoff == current cutoff)`
pub fn decide_refresh(
    refresh_enabled: bool,
    cache_present: bool,
    metadata: Option<&RunMetadata>,
    current_cutoff: NaiveDate,
) -> RefreshDecision {
    let cache_valid =
        cache_present && metadata.map(|m| m.recency_cutoff_date) == Some(current_cutoff);

    let (refresh, reason) = match (refresh_enabled, cache_valid) {
        (false, _) => (false, RefreshReason::Disabled),
        (true, true) => (false, RefreshReason::CutoffUnchanged),
        (true, false) if !cache_present => (true, RefreshReason::NoCache),
        (true, false) => (true, RefreshReason::CutoffChanged),
    };
    RefreshDecision { refresh, reason }
}

/// Flat event row as stored in the window tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRow {
    pub event_id: String,
    pub event_date: Option<NaiveDate>,
    pub event_type: String,
    pub sub_event_type: String,
    pub country: String,
    pub admin1: String,
    pub admin2: String,
    pub location: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub fatalities: Option<f64>,
    pub unit_id: Option<String>,
    pub unit_name: Option<String>,
    pub as_of_date: NaiveDate,
    pub run_date: NaiveDate,
}

/// Column order of [`EventRow`], written even when there are no rows
pub const EVENT_COLUMNS: [&str; 15] = [
    "event_id",
    "event_date",
    "event_type",
    "sub_event_type",
    "country",
    "admin1",
    "admin2",
    "location",
    "latitude",
    "longitude",
    "fatalities",
    "unit_id",
    "unit_name",
    "as_of_date",
    "run_date",
];

impl EventRow {
    pub fn from_assigned(a: Assigned<EventRecord>, as_of_date: NaiveDate, run_date: NaiveDate) -> Self {
        let e = a.record;
        Self {
            event_id: e.event_id,
            event_date: e.event_date,
            event_type: e.event_type,
            sub_event_type: e.sub_event_type,
            country: e.country,
            admin1: e.admin1,
            admin2: e.admin2,
            location: e.location,
            latitude: e.latitude,
            longitude: e.longitude,
            fatalities: e.fatalities,
            unit_id: a.unit_id,
            unit_name: a.unit_name,
            as_of_date,
            run_date,
        }
    }
}

/// Write rows under an explicit header so empty tables still carry it.
pub fn write_table<T: Serialize>(path: &Path, header: &[&str], rows: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    writer.write_record(header)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_event_table(path: &Path, rows: &[EventRow]) -> Result<()> {
    write_table(path, &EVENT_COLUMNS, rows)?;
    info!("Wrote {} events to {:?}", rows.len(), path);
    Ok(())
}

/// Read a cached CSV table. `Ok(None)` when the file does not exist.
pub fn read_table<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<Vec<T>>> {
    if !path.exists() {
        return Ok(None);
    }
    let cache_error = |reason: String| PipelineError::Cache {
        path: path.to_path_buf(),
        reason,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| cache_error(e.to_string()))?;
    let rows = reader
        .deserialize()
        .collect::<std::result::Result<Vec<T>, _>>()
        .map_err(|e| cache_error(e.to_string()))?;
    Ok(Some(rows))
}

/// Cached window table for a skipped refresh
pub fn read_event_table(path: &Path) -> Result<Vec<EventRow>> {
    match read_table(path)? {
        Some(rows) => {
            info!("Loaded {} cached events from {:?}", rows.len(), path);
            Ok(rows)
        }
        None => {
            warn!("Event cache {:?} is missing; treating the window as empty", path);
            Ok(Vec::new())
        }
    }
}

/// Cached regional forecast signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastStateRow {
    pub parent_join_key: String,
    pub region_name: String,
    pub forecast_raw: f64,
    pub forecast_signal: f64,
    pub forecast_date: NaiveDate,
}

pub const FORECAST_COLUMNS: [&str; 5] = [
    "parent_join_key",
    "region_name",
    "forecast_raw",
    "forecast_signal",
    "forecast_date",
];

/// Load the forecast state if it can be reused for `run_month`.
///
/// Reuse requires forecast refresh off and a stored forecast month at or
/// after the run month. An unreadable state is refetched rather than failing.
pub fn reusable_forecast_state(
    path: &Path,
    forecast_refresh: bool,
    run_month: NaiveDate,
) -> Option<Vec<ForecastStateRow>> {
    if forecast_refresh {
        return None;
    }
    let rows: Vec<ForecastStateRow> = match read_table(path) {
        Ok(Some(rows)) => rows,
        Ok(None) => return None,
        Err(e) => {
            warn!("Forecast state unusable, refetching: {}", e);
            return None;
        }
    };
    let saved = rows.first()?.forecast_date;
    if saved >= run_month {
        info!("Reusing forecast state for {} ({} regions)", saved, rows.len());
        Some(rows)
    } else {
        info!("Forecast state for {} predates {}; refetching", saved, run_month);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn meta(cutoff: NaiveDate) -> RunMetadata {
        RunMetadata {
            recency_cutoff_date: cutoff,
            last_run_timestamp: Utc.with_ymd_and_hms(2025, 10, 1, 6, 0, 0).unwrap(),
        }
    }

    fn row(id: &str, unit: Option<&str>) -> EventRow {
        EventRow {
            event_id: id.to_string(),
            event_date: Some(date(2025, 9, 20)),
            event_type: "Battles".to_string(),
            sub_event_type: "Armed clash".to_string(),
            country: "Mexico".to_string(),
            admin1: "Guerrero".to_string(),
            admin2: "Acapulco de Juárez".to_string(),
            location: "Acapulco".to_string(),
            latitude: Some(16.86),
            longitude: Some(-99.88),
            fatalities: None,
            unit_id: unit.map(str::to_string),
            unit_name: unit.map(|_| "Acapulco de Juárez".to_string()),
            as_of_date: date(2025, 9, 30),
            run_date: date(2025, 10, 1),
        }
    }

    #[test]
    fn test_decide_refresh() {
        let cutoff = date(2025, 9, 30);
        let same = meta(cutoff);
        let older = meta(date(2025, 9, 23));

        let d = decide_refresh(true, true, Some(&same), cutoff);
        assert_eq!(d, RefreshDecision { refresh: false, reason: RefreshReason::CutoffUnchanged });

        assert!(decide_refresh(true, true, Some(&older), cutoff).refresh);
        assert!(decide_refresh(true, true, None, cutoff).refresh);
        assert_eq!(decide_refresh(true, false, Some(&same), cutoff).reason, RefreshReason::NoCache);

        let off = decide_refresh(false, false, None, cutoff);
        assert!(!off.refresh);
        assert_eq!(off.reason, RefreshReason::Disabled);
    }

    #[test]
    fn test_metadata_roundtrip_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        assert_eq!(read_metadata(&path), None);

        let m = meta(date(2025, 9, 30));
        assert_eq!(write_metadata(&path, &m), MetadataWrite::Written);
        assert_eq!(read_metadata(&path), Some(m.clone()));

        std::fs::write(&path, "not json").unwrap();
        assert_eq!(read_metadata(&path), None);

        let bad = dir.path().join("missing-dir").join("meta.json");
        assert!(matches!(write_metadata(&bad, &m), MetadataWrite::Failed(_)));
    }

    #[test]
    fn test_event_table_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.csv");
        let rows = vec![row("MEX1", Some("MX12001")), row("MEX2", None)];
        write_event_table(&path, &rows).unwrap();
        assert_eq!(read_event_table(&path).unwrap(), rows);
    }

    #[test]
    fn test_empty_table_keeps_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.csv");
        write_event_table(&path, &[]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("event_id,event_date,"));
        assert!(read_event_table(&path).unwrap().is_empty());
    }

    #[test]
    fn test_missing_vs_corrupt_cache() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.csv");
        assert!(read_event_table(&missing).unwrap().is_empty());

        let corrupt = dir.path().join("corrupt.csv");
        std::fs::write(&corrupt, "event_id,event_date\nMEX1,not-a-date\n").unwrap();
        assert!(matches!(read_event_table(&corrupt), Err(PipelineError::Cache { .. })));
    }

    #[test]
    fn test_forecast_state_reuse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forecast.csv");
        let rows = vec![ForecastStateRow {
            parent_join_key: "Guerrero".to_string(),
            region_name: "Guerrero".to_string(),
            forecast_raw: 40.0,
            forecast_signal: 0.5,
            forecast_date: date(2025, 10, 1),
        }];
        write_table(&path, &FORECAST_COLUMNS, &rows).unwrap();

        assert_eq!(reusable_forecast_state(&path, false, date(2025, 10, 1)), Some(rows));
        assert_eq!(reusable_forecast_state(&path, true, date(2025, 10, 1)), None);
        assert_eq!(reusable_forecast_state(&path, false, date(2025, 11, 1)), None);
    }
}
