//! ADM2 Risk Index CLI
//!
//! Builds the daily per-unit risk fact table.
//!
//! Usage:
//!   adm2-risk --data-dir data --out-dir out
//!   adm2-risk --no-events-refresh --no-forecast-refresh --contiguity rook
//!
//! Credentials come from ACLED_USER / ACLED_PASS (a `.env` file is honored).

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::Parser;
use event_feed::AcledClient;
use risk_index::ScorerConfig;
use risk_pipeline::{credentials_from_env, run_pipeline, RunConfig};
use spillover_graph::ContiguityRule;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "adm2-risk", about = "Daily ADM2 conflict/health-access risk index")]
struct Args {
    /// Static inputs and reference-table caches
    #[arg(long, env = "ADM2_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Fact table, event caches and diagnostics
    #[arg(long, env = "ADM2_OUT_DIR", default_value = "out")]
    out_dir: PathBuf,

    /// ADM2 boundaries GeoJSON (default: <data-dir>/adm2_boundaries.geojson)
    #[arg(long)]
    boundaries: Option<PathBuf>,

    /// Population source CSV
    #[arg(long)]
    population: Option<PathBuf>,

    /// Health facility source CSV
    #[arg(long)]
    facilities: Option<PathBuf>,

    /// Municipal poverty source CSV
    #[arg(long)]
    poverty: Option<PathBuf>,

    /// Scorer weights as JSON
    #[arg(long)]
    weights: Option<PathBuf>,

    /// Reuse cached event tables regardless of the provider cutoff
    #[arg(long, env = "ADM2_NO_EVENTS_REFRESH")]
    no_events_refresh: bool,

    /// Reuse the stored forecast when it covers the run month
    #[arg(long, env = "ADM2_NO_FORECAST_REFRESH")]
    no_forecast_refresh: bool,

    /// Rebuild population, facility and poverty tables from source
    #[arg(long)]
    force_rebuild: bool,

    /// Skip TLS certificate verification
    #[arg(long)]
    no_verify_ssl: bool,

    /// Neighbor rule: queen or rook
    #[arg(long, default_value = "queen")]
    contiguity: ContiguityRule,

    /// Country name sent to the feed
    #[arg(long, default_value = "Mexico")]
    country: String,

    /// ISO 3166 numeric code sent to the feed
    #[arg(long, default_value_t = 484)]
    iso_code: u16,

    /// Run date, YYYY-MM-DD (default: today)
    #[arg(long)]
    run_date: Option<NaiveDate>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> Result<RunConfig> {
        let run_date = self.run_date.unwrap_or_else(|| Local::now().date_naive());
        let mut config = RunConfig::new(self.data_dir, self.out_dir, run_date);

        if let Some(p) = self.boundaries {
            config.boundary_path = p;
        }
        if let Some(p) = self.population {
            config.population_source = p;
        }
        if let Some(p) = self.facilities {
            config.facility_source = p;
        }
        if let Some(p) = self.poverty {
            config.poverty_source = p;
        }
        if let Some(p) = self.weights {
            let text = std::fs::read_to_string(&p)
                .with_context(|| format!("reading weights from {}", p.display()))?;
            config.scorer = serde_json::from_str::<ScorerConfig>(&text)
                .with_context(|| format!("parsing weights from {}", p.display()))?;
        }

        config.events_refresh = !self.no_events_refresh;
        config.forecast_refresh = !self.no_forecast_refresh;
        config.force_rebuild = self.force_rebuild;
        config.contiguity = self.contiguity;
        config.feed.country = self.country;
        config.feed.iso_code = self.iso_code;
        config.feed.verify_tls = !self.no_verify_ssl;
        Ok(config)
    }
}

/// Library targets whose logs the CLI shows by default
const LOG_TARGETS: &[&str] = &[
    "adm2_risk",
    "risk_pipeline",
    "event_feed",
    "admin_registry",
    "spillover_graph",
    "risk_index",
];

/// Workspace crates at info (debug when verbose), dependencies at warn.
fn default_log_filter(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    let mut directives: Vec<String> = LOG_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect();
    directives.insert(0, "warn".to_string());
    directives.join(",")
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_log_filter(args.verbose))),
        )
        .init();

    info!("{}", "=".repeat(60));
    info!("ADM2 Risk Index");
    info!("{}", "=".repeat(60));

    let config = args.into_config()?;
    config.validate()?;
    let credentials = credentials_from_env()?;
    let client = AcledClient::new(config.feed.clone(), credentials)?;

    let summary = run_pipeline(&config, &client).await?;
    info!(
        "Done: {} units scored as of {} -> {}",
        summary.fact_rows,
        summary.recency_cutoff,
        summary.facts_path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_covers_workspace_crates() {
        let filter = default_log_filter(false);
        for target in LOG_TARGETS {
            assert!(filter.contains(&format!("{}=info", target)), "{} missing", target);
        }
        assert!(filter.starts_with("warn,"));
        assert!(EnvFilter::try_new(&filter).is_ok());
    }

    #[test]
    fn test_verbose_filter_is_debug() {
        let filter = default_log_filter(true);
        assert!(filter.contains("event_feed=debug"));
        assert!(filter.contains("risk_pipeline=debug"));
        assert!(!filter.contains("=info"));
        assert!(EnvFilter::try_new(&filter).is_ok());
    }
}
