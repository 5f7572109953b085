//! Risk Pipeline
//!
//! Daily composite conflict/health-access risk score per ADM2 unit.
//!
//! ```text
//! boundaries ─┬─> reference tables (population, facilities, poverty)
//!             │
//! provider ───┼─> recency cutoff ─> refresh decision ─┬─> fetch (90d ∥ prior ∥ forecast)
//!             │                                       └─> cached window tables
//!             └─> assign events ─> rates ─┬─> spillover ─┐
//!                                         └──────────────┴─> composite index ─> facts
//! ```
//!
//! Everything after the remote join is synchronous and deterministic for a
//! fixed provider state.

use admin_registry::{assign_points, load_boundaries, Predicate, RegistryError, UnitRegistry};
use chrono::{NaiveDate, Utc};
use event_feed::forecast::{aggregate_by_region, month_anchor, select_forecast_months};
use event_feed::{
    clean_events, AccessToken, EventProvider, EventRecord, EventWindow, FeedError, ForecastRecord,
    WindowAnchors,
};
use risk_index::{scale_forecast, score_units, RawSignals};
use spillover_graph::{ContiguityGraph, GraphError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

pub mod cache;
pub mod checks;
pub mod config;
pub mod facts;
pub mod rates;
pub mod reference;

pub use cache::{decide_refresh, EventRow, RefreshDecision, RefreshReason, RunMetadata};
pub use config::{credentials_from_env, CachePaths, RunConfig};
pub use facts::{FactRow, GeometryRow};

use cache::{ForecastStateRow, FORECAST_COLUMNS};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Remote fetch failed: {0}")]
    RemoteFetch(String),
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),
    #[error("Cache file {path:?} is unreadable: {reason}")]
    Cache { path: PathBuf, reason: String },
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<FeedError> for PipelineError {
    fn from(e: FeedError) -> Self {
        match e {
            FeedError::Auth(reason) => PipelineError::Auth(reason),
            other => PipelineError::RemoteFetch(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Facilities per 100k with the population floored at 1
pub fn facilities_per_100k(facilities: usize, exposed_population: f64) -> f64 {
    1e5 * facilities as f64 / exposed_population.max(1.0)
}

/// `None` when the unit has no facility; scored as A = 0
pub fn inverse_facility_density(facilities: usize, exposed_population: f64) -> Option<f64> {
    let density = facilities_per_100k(facilities, exposed_population);
    (density > 0.0 && density.is_finite()).then(|| 1.0 / density)
}

/// What a run did, for logging and tests
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub units: usize,
    pub fact_rows: usize,
    pub zero_exposure_units: usize,
    pub recency_cutoff: NaiveDate,
    pub refresh: RefreshDecision,
    pub forecast_fetched: bool,
    pub forecast_regions: usize,
    pub zero_population_anomalies: usize,
    pub zero_population_area_flags: usize,
    pub facts_path: PathBuf,
    pub geometry_path: PathBuf,
}

async fn fetch_window<P: EventProvider>(
    provider: &P,
    token: &AccessToken,
    enabled: bool,
    window: EventWindow,
) -> event_feed::Result<Option<Vec<EventRecord>>> {
    if !enabled {
        return Ok(None);
    }
    provider.fetch_events(token, &window).await.map(Some)
}

async fn fetch_forecast<P: EventProvider>(
    provider: &P,
    token: &AccessToken,
    enabled: bool,
) -> event_feed::Result<Option<Vec<ForecastRecord>>> {
    if !enabled {
        return Ok(None);
    }
    provider.fetch_forecast(token).await.map(Some)
}

/// Clean, assign (boundary-inclusive) and stamp one fetched window.
fn materialize_window(
    raw: Vec<EventRecord>,
    registry: &UnitRegistry,
    country: &str,
    as_of_date: NaiveDate,
    run_date: NaiveDate,
) -> Vec<EventRow> {
    let cleaned = clean_events(raw, country);
    assign_points(cleaned, registry, Predicate::Intersects)
        .assigned
        .into_iter()
        .map(|a| EventRow::from_assigned(a, as_of_date, run_date))
        .collect()
}

/// Select months, sum per region, scale, key by normalized region name.
fn build_forecast_state(
    records: Vec<ForecastRecord>,
    run_month: NaiveDate,
    config: &RunConfig,
    path: &Path,
) -> Result<Vec<ForecastStateRow>> {
    let selected = select_forecast_months(records, run_month);
    let regions = aggregate_by_region(&selected);
    let totals: Vec<f64> = regions.iter().map(|r| r.total).collect();
    let signals = scale_forecast(&totals);

    let rows: Vec<ForecastStateRow> = regions
        .into_iter()
        .zip(signals)
        .map(|(r, signal)| ForecastStateRow {
            parent_join_key: config.join_keys.normalize(&r.region),
            region_name: r.region,
            forecast_raw: r.total,
            forecast_signal: signal,
            forecast_date: r.forecast_date,
        })
        .collect();

    if rows.is_empty() {
        warn!("Forecast feed returned no usable rows; forecast signal is 0 everywhere");
    } else {
        cache::write_table(path, &FORECAST_COLUMNS, &rows)?;
        info!("Saved forecast state for {} regions to {:?}", rows.len(), path);
    }
    Ok(rows)
}

/// Run the whole pipeline once.
pub async fn run_pipeline<P: EventProvider>(config: &RunConfig, provider: &P) -> Result<RunSummary> {
    config.validate()?;
    let paths = config.paths();
    std::fs::create_dir_all(&config.out_dir)?;
    std::fs::create_dir_all(&config.data_dir)?;

    let registry = load_boundaries(&config.boundary_path, &config.boundary_fields, &config.join_keys)?;
    let references = reference::load_reference_tables(config, &registry)?;

    let token = provider.authenticate().await?;
    let cutoff = provider.recency_cutoff(&token, config.run_date).await?;
    let anchors = WindowAnchors::from_cutoff(cutoff);
    info!(
        "Recency cutoff {}; windows {} and {}",
        cutoff,
        anchors.current_window().date_range(),
        anchors.prior_window().date_range()
    );

    let metadata = cache::read_metadata(&paths.metadata);
    let decision = decide_refresh(
        config.events_refresh,
        paths.event_caches_exist(),
        metadata.as_ref(),
        cutoff,
    );
    info!("Event refresh: {} ({:?})", decision.refresh, decision.reason);

    let run_month = month_anchor(config.run_date);
    let cached_forecast =
        cache::reusable_forecast_state(&paths.forecast_state, config.forecast_refresh, run_month);

    let (current_raw, prior_raw, forecast_raw) = tokio::try_join!(
        fetch_window(provider, &token, decision.refresh, anchors.current_window()),
        fetch_window(provider, &token, decision.refresh, anchors.prior_window()),
        fetch_forecast(provider, &token, cached_forecast.is_none()),
    )?;

    let (current, prior) = match (current_raw, prior_raw) {
        (Some(current_raw), Some(prior_raw)) => {
            let country = config.feed.country.as_str();
            let current = materialize_window(current_raw, &registry, country, cutoff, config.run_date);
            let prior = materialize_window(prior_raw, &registry, country, cutoff, config.run_date);
            cache::write_event_table(&paths.events_current, &current)?;
            cache::write_event_table(&paths.events_prior, &prior)?;

            let meta = RunMetadata {
                recency_cutoff_date: cutoff,
                last_run_timestamp: Utc::now(),
            };
            cache::write_metadata(&paths.metadata, &meta).log(&paths.metadata);
            (current, prior)
        }
        _ => (
            cache::read_event_table(&paths.events_current)?,
            cache::read_event_table(&paths.events_prior)?,
        ),
    };

    let forecast_fetched = forecast_raw.is_some();
    let forecast_rows = match (forecast_raw, cached_forecast) {
        (Some(records), _) => build_forecast_state(records, run_month, config, &paths.forecast_state)?,
        (None, Some(rows)) => rows,
        (None, None) => Vec::new(),
    };
    let mut forecast_by_key: HashMap<&str, f64> = HashMap::new();
    for row in &forecast_rows {
        forecast_by_key
            .entry(row.parent_join_key.as_str())
            .or_insert(row.forecast_signal);
    }

    let exposed: Vec<f64> = registry
        .units()
        .iter()
        .map(|u| references.exposed_population(&u.unit_id))
        .collect();
    let unit_rates = rates::compute_rates(&registry, &exposed, &current, &prior, &anchors);

    let anomalies = rates::zero_population_anomalies(&registry, &unit_rates);
    let area_flags = checks::zero_population_area_flags(&registry, &references);
    checks::write_checks(&paths.checks_dir, &anomalies, &area_flags)?;

    let graph = ContiguityGraph::from_registry(&registry, config.contiguity);
    let rate_30d: Vec<f64> = unit_rates.iter().map(|r| r.rate_30d).collect();
    let spillover = graph.spillover(&rate_30d)?;

    let raw_signals: Vec<RawSignals> = registry
        .units()
        .iter()
        .zip(&unit_rates)
        .zip(&spillover)
        .map(|((unit, r), &s)| RawSignals {
            exposed_population: r.exposed_population,
            rate_30d: r.rate_30d,
            rate_90d: r.rate_90d,
            rate_delta_raw: r.rate_delta_raw,
            spillover: s,
            forecast: forecast_by_key.get(unit.parent_join_key.as_str()).copied(),
            inverse_facility_density: inverse_facility_density(
                references.facilities(&unit.unit_id),
                r.exposed_population,
            ),
            vulnerability_raw: references.poverty_rate(&unit.unit_id),
        })
        .collect();
    let scored = score_units(&raw_signals, &config.scorer);

    let fact_rows = facts::assemble_facts(
        &registry,
        &references,
        &unit_rates,
        &spillover,
        &scored,
        cutoff,
        config.run_date,
    )?;
    facts::write_facts(&paths.facts, &fact_rows)?;
    facts::write_geometry(&paths.geometry, &facts::geometry_lookup(&registry))?;

    let zero_exposure_units = fact_rows.iter().filter(|f| f.exposed_population <= 0.0).count();
    info!("{}", "=".repeat(60));
    info!("Fact rows: {}", fact_rows.len());
    info!("Units with zero exposed population: {}", zero_exposure_units);
    info!("Top units by priority:");
    for f in facts::top_by_priority(&fact_rows, 10) {
        info!(
            "  {:6.2} | {:30} | {}",
            f.priority100, f.unit_name, f.parent_region_name
        );
    }

    Ok(RunSummary {
        units: registry.len(),
        fact_rows: fact_rows.len(),
        zero_exposure_units,
        recency_cutoff: cutoff,
        refresh: decision,
        forecast_fetched,
        forecast_regions: forecast_rows.len(),
        zero_population_anomalies: anomalies.len(),
        zero_population_area_flags: area_flags.len(),
        facts_path: paths.facts,
        geometry_path: paths.geometry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_feed::WindowKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    struct StubProvider {
        cutoff: NaiveDate,
        current: Vec<EventRecord>,
        prior: Vec<EventRecord>,
        forecast: Vec<ForecastRecord>,
        reject_auth: bool,
        event_calls: AtomicUsize,
        forecast_calls: AtomicUsize,
    }

    impl StubProvider {
        fn new(current: Vec<EventRecord>) -> Self {
            Self {
                cutoff: date(2025, 10, 15),
                current,
                prior: Vec::new(),
                forecast: Vec::new(),
                reject_auth: false,
                event_calls: AtomicUsize::new(0),
                forecast_calls: AtomicUsize::new(0),
            }
        }
    }

    impl EventProvider for StubProvider {
        async fn authenticate(&self) -> event_feed::Result<AccessToken> {
            if self.reject_auth {
                return Err(FeedError::Auth("bad credentials".to_string()));
            }
            Ok(AccessToken("stub".to_string()))
        }

        async fn recency_cutoff(&self, _: &AccessToken, _: NaiveDate) -> event_feed::Result<NaiveDate> {
            Ok(self.cutoff)
        }

        async fn fetch_events(&self, _: &AccessToken, window: &EventWindow) -> event_feed::Result<Vec<EventRecord>> {
            self.event_calls.fetch_add(1, Ordering::SeqCst);
            Ok(match window.kind {
                WindowKind::Current => self.current.clone(),
                WindowKind::Prior => self.prior.clone(),
            })
        }

        async fn fetch_forecast(&self, _: &AccessToken) -> event_feed::Result<Vec<ForecastRecord>> {
            self.forecast_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.forecast.clone())
        }
    }

    fn event(id: &str, lon: f64, lat: f64, day: NaiveDate) -> EventRecord {
        EventRecord {
            event_id: id.to_string(),
            event_date: Some(day),
            event_type: "Battles".to_string(),
            sub_event_type: "Armed clash".to_string(),
            country: "Mexico".to_string(),
            admin1: "Guerrero".to_string(),
            admin2: String::new(),
            location: String::new(),
            latitude: Some(lat),
            longitude: Some(lon),
            fatalities: Some(0.0),
        }
    }

    fn feature(code: &str, region: &str, x0: f64) -> String {
        format!(
            r#"{{"type":"Feature","properties":{{"ADM2_PCODE":"{code}","ADM2_ES":"Unit {code}","ADM1_ES":"{region}"}},
               "geometry":{{"type":"Polygon","coordinates":[[[{x0},17.0],[{x1},17.0],[{x1},17.1],[{x0},17.1],[{x0},17.0]]]}}}}"#,
            code = code,
            region = region,
            x0 = x0,
            x1 = x0 + 0.1
        )
    }

    /// Three units in a row: U1 | U2 | U3, U3 without population.
    fn fixture(dir: &Path) -> RunConfig {
        let config = RunConfig::new(dir.join("data"), dir.join("out"), date(2025, 10, 17));
        std::fs::create_dir_all(&config.data_dir).unwrap();

        let features = [
            feature("U1", "Guerrero", -100.0),
            feature("U2", "Guerrero", -99.9),
            feature("U3", "Oaxaca", -99.8),
        ];
        std::fs::write(
            &config.boundary_path,
            format!(r#"{{"type":"FeatureCollection","features":[{}]}}"#, features.join(",")),
        )
        .unwrap();
        std::fs::write(
            &config.population_source,
            "unit_id,population_total,exposed_population\nU1,4000,1000\nU2,8000,2000\nU3,0,0\n",
        )
        .unwrap();
        std::fs::write(
            &config.facility_source,
            "clave_de_la_institucion,clave_estatus_de_operacion,clave_nivel_atencion,latitud,longitud\n\
             SSA,1,1,17.05,-99.95\n",
        )
        .unwrap();
        std::fs::write(&config.poverty_source, ",Clave de entidad,E,M,N,a,b,c,d,e,f\n").unwrap();
        config
    }

    fn read_facts(path: &Path) -> Vec<HashMap<String, String>> {
        let mut reader = csv::Reader::from_path(path).unwrap();
        reader.deserialize().map(|r| r.unwrap()).collect()
    }

    fn column(rows: &[HashMap<String, String>], name: &str) -> Vec<f64> {
        rows.iter().map(|r| r[name].parse().unwrap()).collect()
    }

    #[tokio::test]
    async fn test_three_unit_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture(dir.path());
        let provider = StubProvider::new(vec![event("MEX1", -99.95, 17.05, date(2025, 10, 1))]);

        let summary = run_pipeline(&config, &provider).await.unwrap();
        assert_eq!(summary.units, 3);
        assert_eq!(summary.fact_rows, 3);
        assert_eq!(summary.zero_exposure_units, 1);
        assert!(summary.refresh.refresh);
        assert_eq!(provider.event_calls.load(Ordering::SeqCst), 2);

        let rows = read_facts(&summary.facts_path);
        let ids: Vec<&str> = rows.iter().map(|r| r["unit_id"].as_str()).collect();
        assert_eq!(ids, vec!["U1", "U2", "U3"]);
        assert_eq!(column(&rows, "rate_30d"), vec![100.0, 0.0, 0.0]);
        assert_eq!(column(&rows, "spillover"), vec![0.0, 50.0, 0.0]);
        for p in column(&rows, "priority100") {
            assert!((0.0..=100.0).contains(&p));
        }
        assert_eq!(rows[0]["as_of_date"], "2025-10-15");
        assert_eq!(rows[0]["run_date"], "2025-10-17");

        let paths = config.paths();
        assert!(paths.events_current.exists());
        assert!(paths.events_prior.exists());
        assert!(paths.geometry.exists());
        assert_eq!(
            cache::read_metadata(&paths.metadata).map(|m| m.recency_cutoff_date),
            Some(date(2025, 10, 15))
        );
    }

    #[tokio::test]
    async fn test_refresh_skipped_when_cutoff_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = fixture(dir.path());
        let provider = StubProvider::new(vec![event("MEX1", -99.95, 17.05, date(2025, 10, 1))]);

        let first = run_pipeline(&config, &provider).await.unwrap();
        assert_eq!(provider.event_calls.load(Ordering::SeqCst), 2);

        let second = run_pipeline(&config, &provider).await.unwrap();
        assert_eq!(second.refresh.reason, RefreshReason::CutoffUnchanged);

        config.events_refresh = false;
        let third = run_pipeline(&config, &provider).await.unwrap();
        assert_eq!(third.refresh.reason, RefreshReason::Disabled);
        assert_eq!(provider.event_calls.load(Ordering::SeqCst), 2);

        let before = read_facts(&first.facts_path);
        let after = read_facts(&third.facts_path);
        assert_eq!(column(&before, "rate_30d"), column(&after, "rate_30d"));
    }

    #[tokio::test]
    async fn test_duplicate_events_count_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture(dir.path());
        let e = event("MEX1", -99.95, 17.05, date(2025, 10, 1));
        let provider = StubProvider::new(vec![e.clone(), e]);

        let summary = run_pipeline(&config, &provider).await.unwrap();
        assert_eq!(column(&read_facts(&summary.facts_path), "rate_30d"), vec![100.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_forecast_signal_and_reuse() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = fixture(dir.path());
        let mut provider = StubProvider::new(vec![event("MEX1", -99.95, 17.05, date(2025, 10, 1))]);
        provider.forecast = vec![
            ForecastRecord { region: "Guerrero".to_string(), forecast_date: date(2025, 10, 1), total: 40.0 },
            ForecastRecord { region: "Oaxaca".to_string(), forecast_date: date(2025, 10, 1), total: 10.0 },
            ForecastRecord { region: "Oaxaca".to_string(), forecast_date: date(2025, 9, 1), total: 99.0 },
        ];

        let summary = run_pipeline(&config, &provider).await.unwrap();
        assert!(summary.forecast_fetched);
        assert_eq!(summary.forecast_regions, 2);
        let rows = read_facts(&summary.facts_path);
        assert_eq!(column(&rows, "forecast_signal"), vec![1.0, 1.0, 0.0]);

        config.forecast_refresh = false;
        let again = run_pipeline(&config, &provider).await.unwrap();
        assert!(!again.forecast_fetched);
        assert_eq!(provider.forecast_calls.load(Ordering::SeqCst), 1);
        assert_eq!(column(&read_facts(&again.facts_path), "forecast_signal"), vec![1.0, 1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_auth_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture(dir.path());
        let mut provider = StubProvider::new(Vec::new());
        provider.reject_auth = true;

        assert!(matches!(run_pipeline(&config, &provider).await, Err(PipelineError::Auth(_))));
        assert_eq!(provider.event_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_corrupt_cache_on_skip_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = fixture(dir.path());
        config.events_refresh = false;
        let paths = config.paths();
        std::fs::create_dir_all(&config.out_dir).unwrap();
        std::fs::write(&paths.events_current, "event_id,event_date\nX,not-a-date\n").unwrap();
        std::fs::write(&paths.events_prior, "event_id\n").unwrap();

        let provider = StubProvider::new(Vec::new());
        assert!(matches!(run_pipeline(&config, &provider).await, Err(PipelineError::Cache { .. })));
    }

    #[tokio::test]
    async fn test_missing_cache_on_skip_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = fixture(dir.path());
        config.events_refresh = false;

        let provider = StubProvider::new(vec![event("MEX1", -99.95, 17.05, date(2025, 10, 1))]);
        let summary = run_pipeline(&config, &provider).await.unwrap();
        assert_eq!(provider.event_calls.load(Ordering::SeqCst), 0);
        assert_eq!(column(&read_facts(&summary.facts_path), "rate_30d"), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_inverse_density() {
        assert_eq!(inverse_facility_density(0, 1000.0), None);
        assert_eq!(facilities_per_100k(1, 0.0), 1e5);
        assert_eq!(inverse_facility_density(1, 1000.0), Some(0.01));
    }

    #[test]
    fn test_feed_error_mapping() {
        assert!(matches!(
            PipelineError::from(FeedError::Auth("x".into())),
            PipelineError::Auth(_)
        ));
        assert!(matches!(
            PipelineError::from(FeedError::RemoteFetch { endpoint: "u".into(), reason: "503".into() }),
            PipelineError::RemoteFetch(_)
        ));
    }
}
