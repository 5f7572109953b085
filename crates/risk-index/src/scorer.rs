//! Composite scoring
//!
//! ```text
//! DCR      = 0.35·V3m + 0.15·S + 0.30·A + 0.20·MVI
//! PRS_cast = 0.30·V30 + 0.25·dV30 + 0.10·S + 0.18·CAST + 0.12·A + 0.05·MVI
//! PRS_none = 0.40·V30 + 0.30·dV30 + 0.10·S + 0.12·A + 0.08·MVI
//! priority = 0.6·PRS + 0.4·DCR
//! ```
//!
//! The no-forecast vector is not a rescaled copy of the forecast one: the
//! forecast share moves mostly onto V30 and dV30, and vulnerability gains
//! a little. Both are kept exactly as listed.

use serde::{Deserialize, Serialize};

/// DCR weights
pub const W_DCR_V3M: f64 = 0.35;
pub const W_DCR_SPILLOVER: f64 = 0.15;
pub const W_DCR_ACCESS: f64 = 0.30;
pub const W_DCR_VULNERABILITY: f64 = 0.20;

/// PRS weights when a forecast signal is present
pub const W_PRS_CAST_V30: f64 = 0.30;
pub const W_PRS_CAST_DV30: f64 = 0.25;
pub const W_PRS_CAST_SPILLOVER: f64 = 0.10;
pub const W_PRS_CAST_FORECAST: f64 = 0.18;
pub const W_PRS_CAST_ACCESS: f64 = 0.12;
pub const W_PRS_CAST_VULNERABILITY: f64 = 0.05;

/// PRS weights without a forecast signal
pub const W_PRS_NOCAST_V30: f64 = 0.40;
pub const W_PRS_NOCAST_DV30: f64 = 0.30;
pub const W_PRS_NOCAST_SPILLOVER: f64 = 0.10;
pub const W_PRS_NOCAST_ACCESS: f64 = 0.12;
pub const W_PRS_NOCAST_VULNERABILITY: f64 = 0.08;

/// Priority blend
pub const W_PRIORITY_PRS: f64 = 0.6;
pub const W_PRIORITY_DCR: f64 = 0.4;

/// Normalized per-unit signals, each in [0,1]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedSignals {
    /// 30-day rate
    pub v30: f64,
    /// 90-day rate
    pub v3m: f64,
    /// Transformed 30-day rate change
    pub dv30: f64,
    /// Spillover
    pub s: f64,
    /// Regional forecast; 0 when unavailable
    pub cast: f64,
    /// Access fragility
    pub a: f64,
    /// Vulnerability
    pub mvi: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DcrWeights {
    pub v3m: f64,
    pub s: f64,
    pub a: f64,
    pub mvi: f64,
}

impl Default for DcrWeights {
    fn default() -> Self {
        Self {
            v3m: W_DCR_V3M,
            s: W_DCR_SPILLOVER,
            a: W_DCR_ACCESS,
            mvi: W_DCR_VULNERABILITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrsWeights {
    pub v30: f64,
    pub dv30: f64,
    pub s: f64,
    /// Zero in the no-forecast vector
    pub cast: f64,
    pub a: f64,
    pub mvi: f64,
}

impl PrsWeights {
    pub fn with_forecast() -> Self {
        Self {
            v30: W_PRS_CAST_V30,
            dv30: W_PRS_CAST_DV30,
            s: W_PRS_CAST_SPILLOVER,
            cast: W_PRS_CAST_FORECAST,
            a: W_PRS_CAST_ACCESS,
            mvi: W_PRS_CAST_VULNERABILITY,
        }
    }

    pub fn without_forecast() -> Self {
        Self {
            v30: W_PRS_NOCAST_V30,
            dv30: W_PRS_NOCAST_DV30,
            s: W_PRS_NOCAST_SPILLOVER,
            cast: 0.0,
            a: W_PRS_NOCAST_ACCESS,
            mvi: W_PRS_NOCAST_VULNERABILITY,
        }
    }

    pub fn total(&self) -> f64 {
        self.v30 + self.dv30 + self.s + self.cast + self.a + self.mvi
    }
}

/// Scorer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerConfig {
    pub dcr: DcrWeights,
    pub prs_with_forecast: PrsWeights,
    pub prs_without_forecast: PrsWeights,
    /// Weight for PRS in the priority blend
    pub w_prs: f64,
    /// Weight for DCR in the priority blend
    pub w_dcr: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            dcr: DcrWeights::default(),
            prs_with_forecast: PrsWeights::with_forecast(),
            prs_without_forecast: PrsWeights::without_forecast(),
            w_prs: W_PRIORITY_PRS,
            w_dcr: W_PRIORITY_DCR,
        }
    }
}

/// PRS inputs tagged by forecast availability
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PrsInputs {
    WithForecast {
        v30: f64,
        dv30: f64,
        s: f64,
        cast: f64,
        a: f64,
        mvi: f64,
    },
    WithoutForecast {
        v30: f64,
        dv30: f64,
        s: f64,
        a: f64,
        mvi: f64,
    },
}

impl PrsInputs {
    /// A forecast counts as available only when strictly positive.
    pub fn from_signals(n: &NormalizedSignals) -> Self {
        if n.cast > 0.0 {
            PrsInputs::WithForecast {
                v30: n.v30,
                dv30: n.dv30,
                s: n.s,
                cast: n.cast,
                a: n.a,
                mvi: n.mvi,
            }
        } else {
            PrsInputs::WithoutForecast {
                v30: n.v30,
                dv30: n.dv30,
                s: n.s,
                a: n.a,
                mvi: n.mvi,
            }
        }
    }

    pub fn has_forecast(&self) -> bool {
        matches!(self, PrsInputs::WithForecast { .. })
    }
}

pub fn dcr(n: &NormalizedSignals, w: &DcrWeights) -> f64 {
    w.v3m * n.v3m + w.s * n.s + w.a * n.a + w.mvi * n.mvi
}

pub fn prs(inputs: &PrsInputs, config: &ScorerConfig) -> f64 {
    match *inputs {
        PrsInputs::WithForecast { v30, dv30, s, cast, a, mvi } => {
            let w = &config.prs_with_forecast;
            w.v30 * v30 + w.dv30 * dv30 + w.s * s + w.cast * cast + w.a * a + w.mvi * mvi
        }
        PrsInputs::WithoutForecast { v30, dv30, s, a, mvi } => {
            let w = &config.prs_without_forecast;
            w.v30 * v30 + w.dv30 * dv30 + w.s * s + w.a * a + w.mvi * mvi
        }
    }
}

/// Composite scores for one unit, on the 0..1 scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositeScore {
    pub dcr: f64,
    pub prs: f64,
    pub priority: f64,
    pub has_forecast: bool,
}

impl CompositeScore {
    pub fn dcr100(&self) -> f64 {
        100.0 * self.dcr
    }

    pub fn prs100(&self) -> f64 {
        100.0 * self.prs
    }

    pub fn priority100(&self) -> f64 {
        100.0 * self.priority
    }
}

pub fn score(n: &NormalizedSignals, config: &ScorerConfig) -> CompositeScore {
    let inputs = PrsInputs::from_signals(n);
    let dcr = dcr(n, &config.dcr);
    let prs = prs(&inputs, config);
    CompositeScore {
        dcr,
        prs,
        priority: config.w_prs * prs + config.w_dcr * dcr,
        has_forecast: inputs.has_forecast(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn signals(cast: f64) -> NormalizedSignals {
        NormalizedSignals {
            v30: 0.8,
            v3m: 0.6,
            dv30: 0.4,
            s: 0.5,
            cast,
            a: 0.7,
            mvi: 0.3,
        }
    }

    #[test]
    fn test_weight_totals() {
        let dcr = DcrWeights::default();
        assert!((dcr.v3m + dcr.s + dcr.a + dcr.mvi - 1.0).abs() < 1e-12);
        assert!((PrsWeights::with_forecast().total() - 1.0).abs() < 1e-12);
        assert!((PrsWeights::without_forecast().total() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_branch_selection() {
        assert!(PrsInputs::from_signals(&signals(0.2)).has_forecast());
        assert!(!PrsInputs::from_signals(&signals(0.0)).has_forecast());
    }

    #[test]
    fn test_branches_differ() {
        let config = ScorerConfig::default();
        let n = signals(0.6);
        let with = prs(&PrsInputs::from_signals(&n), &config);
        let without = prs(
            &PrsInputs::WithoutForecast {
                v30: n.v30,
                dv30: n.dv30,
                s: n.s,
                a: n.a,
                mvi: n.mvi,
            },
            &config,
        );
        let expected_with = 0.30 * 0.8 + 0.25 * 0.4 + 0.10 * 0.5 + 0.18 * 0.6 + 0.12 * 0.7 + 0.05 * 0.3;
        let expected_without = 0.40 * 0.8 + 0.30 * 0.4 + 0.10 * 0.5 + 0.12 * 0.7 + 0.08 * 0.3;
        assert!((with - expected_with).abs() < 1e-12);
        assert!((without - expected_without).abs() < 1e-12);
        assert!((with - without).abs() > 1e-6);
    }

    #[test]
    fn test_priority_blend() {
        let s = score(&signals(0.0), &ScorerConfig::default());
        let expected_dcr = 0.35 * 0.6 + 0.15 * 0.5 + 0.30 * 0.7 + 0.20 * 0.3;
        assert!((s.dcr - expected_dcr).abs() < 1e-12);
        assert!((s.priority - (0.6 * s.prs + 0.4 * s.dcr)).abs() < 1e-12);
        assert!((s.priority100() - 100.0 * s.priority).abs() < 1e-9);
        assert!(!s.has_forecast);
    }

    proptest! {
        #[test]
        fn prop_priority100_in_range(
            v30 in 0.0f64..=1.0, v3m in 0.0f64..=1.0, dv30 in 0.0f64..=1.0,
            s in 0.0f64..=1.0, cast in 0.0f64..=1.0, a in 0.0f64..=1.0, mvi in 0.0f64..=1.0,
        ) {
            let n = NormalizedSignals { v30, v3m, dv30, s, cast, a, mvi };
            let out = score(&n, &ScorerConfig::default());
            prop_assert!(out.priority100() >= 0.0);
            prop_assert!(out.priority100() <= 100.0 + 1e-9);
        }
    }
}
