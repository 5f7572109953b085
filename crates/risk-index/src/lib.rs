//! Risk Index
//!
//! Turns raw per-unit signals into normalized components and the layered
//! composite scores.
//!
//! # Components
//!
//! | Signal | Source | Transform |
//! |--------|--------|-----------|
//! | V30    | 30-day rate | winsorize 5/95 |
//! | V3m    | 90-day rate | winsorize 5/95 |
//! | dV30   | rate delta  | clip 10/90, map to [-1,1], winsorize 5/95 |
//! | S      | spillover   | winsorize 5/95 |
//! | CAST   | regional forecast | already scaled upstream, 0 if absent |
//! | A      | inverse facility density | winsorize 5/95, 1.0 with no facilities |
//! | MVI    | poverty rate | winsorize 5/95 |
//!
//! Every unit is scored; missing inputs become 0 rather than dropping rows.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub mod exposure;
pub mod normalize;
pub mod scorer;

pub use exposure::exposure_weights;
pub use normalize::{delta_transform, quantile, scale_forecast, try_winsorize01, winsorize01};
pub use scorer::{CompositeScore, DcrWeights, NormalizedSignals, PrsInputs, PrsWeights, ScorerConfig};

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Normalization window collapsed (lo={lo}, hi={hi})")]
    NormalizationDegenerate { lo: f64, hi: f64 },
}

pub type Result<T> = std::result::Result<T, IndexError>;

/// Raw inputs for one unit
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RawSignals {
    pub exposed_population: f64,
    pub rate_30d: f64,
    pub rate_90d: f64,
    pub rate_delta_raw: f64,
    pub spillover: f64,
    /// Scaled regional forecast in [0,1]; `None` when the region has none
    pub forecast: Option<f64>,
    /// `1 / facilities per 100k`; `None` when the unit has no facility
    pub inverse_facility_density: Option<f64>,
    /// Poverty rate in percent
    pub vulnerability_raw: Option<f64>,
}

/// Scored unit, aligned with the input slice
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredUnit {
    pub signals: NormalizedSignals,
    pub score: CompositeScore,
    pub exposure_weight: f64,
}

/// Normalize every signal across units, then score each unit.
pub fn score_units(raw: &[RawSignals], config: &ScorerConfig) -> Vec<ScoredUnit> {
    let column = |f: fn(&RawSignals) -> f64| -> Vec<f64> { raw.iter().map(f).collect() };

    let v30 = normalize::winsorize_dense(&column(|r| r.rate_30d));
    let v3m = normalize::winsorize_dense(&column(|r| r.rate_90d));
    let dv30 = delta_transform(&column(|r| r.rate_delta_raw));
    let s = normalize::winsorize_dense(&column(|r| r.spillover));

    let inv_density: Vec<Option<f64>> = raw.iter().map(|r| r.inverse_facility_density).collect();
    let access = winsorize01(&inv_density, normalize::WINSOR_LO, normalize::WINSOR_HI);

    let vulnerability: Vec<Option<f64>> = raw.iter().map(|r| r.vulnerability_raw).collect();
    let mvi = winsorize01(&vulnerability, normalize::WINSOR_LO, normalize::WINSOR_HI);

    let weights = exposure_weights(&column(|r| r.exposed_population));

    let scored: Vec<ScoredUnit> = raw
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let signals = NormalizedSignals {
                v30: v30[i],
                v3m: v3m[i],
                dv30: dv30[i],
                s: s[i],
                cast: r.forecast.filter(|c| c.is_finite()).unwrap_or(0.0),
                a: access[i],
                mvi: mvi[i],
            };
            ScoredUnit {
                signals,
                score: scorer::score(&signals, config),
                exposure_weight: weights[i],
            }
        })
        .collect();

    let with_forecast = scored.iter().filter(|u| u.score.has_forecast).count();
    info!(
        "Scored {} units ({} with forecast weights, {} without)",
        scored.len(),
        with_forecast,
        scored.len() - with_forecast
    );
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn raw(rate_30d: f64, forecast: Option<f64>, inv: Option<f64>) -> RawSignals {
        RawSignals {
            exposed_population: 1000.0,
            rate_30d,
            rate_90d: rate_30d * 2.0,
            rate_delta_raw: rate_30d - 5.0,
            spillover: rate_30d / 2.0,
            forecast,
            inverse_facility_density: inv,
            vulnerability_raw: Some(40.0),
        }
    }

    #[test]
    fn test_every_unit_scored() {
        let units = vec![
            raw(0.0, None, Some(0.1)),
            raw(10.0, Some(0.5), Some(0.2)),
            raw(50.0, Some(0.0), None),
        ];
        let out = score_units(&units, &ScorerConfig::default());
        assert_eq!(out.len(), 3);
        assert!(!out[0].score.has_forecast);
        assert!(out[1].score.has_forecast);
        assert!(!out[2].score.has_forecast);
        assert_eq!(out[2].signals.cast, 0.0);
    }

    #[test]
    fn test_unit_without_facility_has_zero_access_signal() {
        let mut units = vec![raw(5.0, None, Some(0.1)), raw(5.0, None, Some(0.3)), raw(5.0, None, None)];
        units[2].exposed_population = 0.0;
        let out = score_units(&units, &ScorerConfig::default());
        assert_eq!(out[2].signals.a, 0.0);
        assert_eq!(out[1].signals.a, 1.0);
        assert!(out[2].score.dcr < out[1].score.dcr);
    }

    #[test]
    fn test_empty_input() {
        assert!(score_units(&[], &ScorerConfig::default()).is_empty());
    }

    #[test]
    fn test_forecast_branch_changes_prs() {
        let base = vec![raw(0.0, None, Some(0.1)), raw(10.0, None, Some(0.2)), raw(20.0, None, Some(0.3))];
        let mut with = base.clone();
        with[1].forecast = Some(0.9);

        let config = ScorerConfig::default();
        let a = score_units(&base, &config);
        let b = score_units(&with, &config);
        assert_eq!(a[1].signals.v30, b[1].signals.v30);
        assert_ne!(a[1].score.prs, b[1].score.prs);
        assert_eq!(a[1].score.dcr, b[1].score.dcr);
    }

    proptest! {
        #[test]
        fn prop_all_scores_bounded(
            rows in proptest::collection::vec(
                (0.0f64..1e4, 0.0f64..1e4, -1e3f64..1e3, proptest::option::of(0.0f64..=1.0),
                 proptest::option::of(1e-4f64..10.0), proptest::option::of(0.0f64..=100.0), 0.0f64..1e6),
                0..40,
            )
        ) {
            let units: Vec<RawSignals> = rows
                .into_iter()
                .map(|(r30, r90, d, f, inv, mvi, pop)| RawSignals {
                    exposed_population: pop,
                    rate_30d: r30,
                    rate_90d: r90,
                    rate_delta_raw: d,
                    spillover: r30 / 2.0,
                    forecast: f,
                    inverse_facility_density: inv,
                    vulnerability_raw: mvi,
                })
                .collect();
            for u in score_units(&units, &ScorerConfig::default()) {
                let p = u.score.priority100();
                prop_assert!((0.0..=100.0 + 1e-9).contains(&p));
                prop_assert!((0.5..=2.0).contains(&u.exposure_weight) || u.exposure_weight == 1.0);
            }
        }
    }
}
