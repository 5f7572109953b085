//! Run configuration

use crate::{PipelineError, Result};
use admin_registry::{BoundaryFields, JoinKeyNormalizer};
use chrono::NaiveDate;
use event_feed::{Credentials, FeedConfig};
use risk_index::ScorerConfig;
use spillover_graph::ContiguityRule;
use std::path::{Path, PathBuf};

pub const USER_ENV: &str = "ACLED_USER";
pub const PASS_ENV: &str = "ACLED_PASS";

/// Everything a run needs, passed explicitly to [`crate::run_pipeline`]
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Static inputs and reference-table caches
    pub data_dir: PathBuf,
    /// Fact table, geometry lookup, event caches and diagnostics
    pub out_dir: PathBuf,
    /// ADM2 boundaries (GeoJSON FeatureCollection)
    pub boundary_path: PathBuf,
    pub boundary_fields: BoundaryFields,
    /// Per-unit population totals from the raster aggregation
    pub population_source: PathBuf,
    /// Health facility point list
    pub facility_source: PathBuf,
    /// Municipal poverty export
    pub poverty_source: PathBuf,
    pub events_refresh: bool,
    pub forecast_refresh: bool,
    /// Rebuild reference tables even when their caches exist
    pub force_rebuild: bool,
    pub feed: FeedConfig,
    pub contiguity: ContiguityRule,
    pub join_keys: JoinKeyNormalizer,
    pub scorer: ScorerConfig,
    pub run_date: NaiveDate,
}

impl RunConfig {
    /// Defaults rooted at `data_dir` and `out_dir`
    pub fn new(data_dir: impl Into<PathBuf>, out_dir: impl Into<PathBuf>, run_date: NaiveDate) -> Self {
        let data_dir = data_dir.into();
        Self {
            boundary_path: data_dir.join("adm2_boundaries.geojson"),
            population_source: data_dir.join("population_source.csv"),
            facility_source: data_dir.join("facilities_source.csv"),
            poverty_source: data_dir.join("poverty_source.csv"),
            data_dir,
            out_dir: out_dir.into(),
            boundary_fields: BoundaryFields::default(),
            events_refresh: true,
            forecast_refresh: true,
            force_rebuild: false,
            feed: FeedConfig::default(),
            contiguity: ContiguityRule::Queen,
            join_keys: JoinKeyNormalizer::default(),
            scorer: ScorerConfig::default(),
            run_date,
        }
    }

    /// Fails before any network call when a required input is absent.
    pub fn validate(&self) -> Result<()> {
        if !self.boundary_path.is_file() {
            return Err(PipelineError::Config(format!(
                "boundary file not found: {}",
                self.boundary_path.display()
            )));
        }
        if self.feed.page_size == 0 || self.feed.max_pages == 0 {
            return Err(PipelineError::Config(
                "page size and page ceiling must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn paths(&self) -> CachePaths {
        CachePaths::new(&self.data_dir, &self.out_dir)
    }
}

/// On-disk layout of caches and outputs
#[derive(Debug, Clone)]
pub struct CachePaths {
    pub metadata: PathBuf,
    pub events_current: PathBuf,
    pub events_prior: PathBuf,
    pub forecast_state: PathBuf,
    pub population: PathBuf,
    pub facilities: PathBuf,
    pub poverty: PathBuf,
    pub facts: PathBuf,
    pub geometry: PathBuf,
    pub checks_dir: PathBuf,
}

impl CachePaths {
    pub fn new(data_dir: &Path, out_dir: &Path) -> Self {
        Self {
            metadata: out_dir.join("run_metadata.json"),
            events_current: out_dir.join("events_violent_90d.csv"),
            events_prior: out_dir.join("events_violent_prev30.csv"),
            forecast_state: data_dir.join("forecast_state.csv"),
            population: data_dir.join("population_adm2.csv"),
            facilities: data_dir.join("facility_counts_adm2.csv"),
            poverty: data_dir.join("poverty_adm2.csv"),
            facts: out_dir.join("adm2_risk_daily.csv"),
            geometry: out_dir.join("adm2_geometry.csv"),
            checks_dir: out_dir.join("checks"),
        }
    }

    pub fn event_caches_exist(&self) -> bool {
        self.events_current.is_file() && self.events_prior.is_file()
    }
}

/// Read both credentials from the environment; a missing or blank one is a
/// configuration error.
pub fn credentials_from_env() -> Result<Credentials> {
    let read = |name: &str| -> Result<String> {
        match std::env::var(name) {
            Ok(v) if !v.trim().is_empty() => Ok(v),
            _ => Err(PipelineError::Config(format!("{} is not set", name))),
        }
    };

    Ok(Credentials {
        username: read(USER_ENV)?,
        password: read(PASS_ENV)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 17).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = RunConfig::new("data", "out", run_date());
        assert!(config.events_refresh);
        assert!(config.forecast_refresh);
        assert!(!config.force_rebuild);
        assert_eq!(config.feed.page_size, 5000);
        assert_eq!(config.feed.max_pages, 200);
        assert_eq!(config.contiguity, ContiguityRule::Queen);
        assert_eq!(config.paths().facts, PathBuf::from("out/adm2_risk_daily.csv"));
    }

    #[test]
    fn test_validate_requires_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig::new(dir.path(), dir.path().join("out"), run_date());
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        std::fs::write(&config.boundary_path, "{}").unwrap();
        assert!(config.validate().is_ok());
    }
}
