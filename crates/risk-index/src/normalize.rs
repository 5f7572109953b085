//! Quantile-based normalization primitives
//!
//! Missing inputs are `None` (or non-finite). Quantiles are taken over the
//! present values only, with linear interpolation between order statistics.
//! Missing positions come out as 0.

use crate::{IndexError, Result};
use tracing::debug;

/// Default winsorization quantiles
pub const WINSOR_LO: f64 = 0.05;
pub const WINSOR_HI: f64 = 0.95;

/// Clip quantiles for the rate-delta transform
pub const DELTA_LO: f64 = 0.10;
pub const DELTA_HI: f64 = 0.90;

/// Forecast scaling value when every region has the same raw total
pub const FORECAST_FLAT_SIGNAL: f64 = 0.5;

fn present(values: &[Option<f64>]) -> Vec<f64> {
    let mut v: Vec<f64> = values
        .iter()
        .filter_map(|x| x.filter(|x| x.is_finite()))
        .collect();
    v.sort_by(f64::total_cmp);
    v
}

fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Linear-interpolated empirical quantile of the present values
pub fn quantile(values: &[Option<f64>], q: f64) -> Option<f64> {
    quantile_sorted(&present(values), q)
}

/// Clip to the `[lo_q, hi_q]` quantiles and rescale to [0,1].
///
/// Fails with [`IndexError::NormalizationDegenerate`] when no value is
/// present or the quantile range collapses.
pub fn try_winsorize01(values: &[Option<f64>], lo_q: f64, hi_q: f64) -> Result<Vec<f64>> {
    let sorted = present(values);
    let (Some(a), Some(b)) = (quantile_sorted(&sorted, lo_q), quantile_sorted(&sorted, hi_q)) else {
        return Err(IndexError::NormalizationDegenerate { lo: f64::NAN, hi: f64::NAN });
    };
    if b <= a {
        return Err(IndexError::NormalizationDegenerate { lo: a, hi: b });
    }

    Ok(values
        .iter()
        .map(|x| match x.filter(|x| x.is_finite()) {
            Some(x) => (x.clamp(a, b) - a) / (b - a),
            None => 0.0,
        })
        .collect())
}

/// [`try_winsorize01`] with the degenerate case recovered as all zeros.
pub fn winsorize01(values: &[Option<f64>], lo_q: f64, hi_q: f64) -> Vec<f64> {
    match try_winsorize01(values, lo_q, hi_q) {
        Ok(v) => v,
        Err(e) => {
            debug!("{}; emitting zero signal", e);
            vec![0.0; values.len()]
        }
    }
}

/// Winsorize a fully-present series at the default quantiles
pub fn winsorize_dense(values: &[f64]) -> Vec<f64> {
    let wrapped: Vec<Option<f64>> = values.iter().copied().map(Some).collect();
    winsorize01(&wrapped, WINSOR_LO, WINSOR_HI)
}

/// Two-stage transform for signed changes: clip to the 10th/90th
/// percentiles, map linearly onto [-1,1] (all zeros on a flat range), then
/// winsorize to [0,1].
pub fn delta_transform(values: &[f64]) -> Vec<f64> {
    let wrapped: Vec<Option<f64>> = values.iter().copied().map(Some).collect();
    let sorted = present(&wrapped);
    let bounds = quantile_sorted(&sorted, DELTA_LO).zip(quantile_sorted(&sorted, DELTA_HI));

    let unit: Vec<f64> = match bounds {
        Some((p1, p9)) if p9 > p1 => values
            .iter()
            .map(|&d| {
                if d.is_finite() {
                    -1.0 + 2.0 * (d.clamp(p1, p9) - p1) / (p9 - p1)
                } else {
                    0.0
                }
            })
            .collect(),
        _ => vec![0.0; values.len()],
    };

    winsorize_dense(&unit)
}

/// Scale raw forecast totals to [0,1] between their 5th and 95th
/// percentiles; a flat range maps every entry to 0.5.
pub fn scale_forecast(raw: &[f64]) -> Vec<f64> {
    let wrapped: Vec<Option<f64>> = raw.iter().copied().map(Some).collect();
    let sorted = present(&wrapped);
    match (quantile_sorted(&sorted, WINSOR_LO), quantile_sorted(&sorted, WINSOR_HI)) {
        (Some(a), Some(b)) if b > a => raw
            .iter()
            .map(|&x| {
                if x.is_finite() {
                    (x.clamp(a, b) - a) / (b - a)
                } else {
                    0.0
                }
            })
            .collect(),
        _ => vec![FORECAST_FLAT_SIGNAL; raw.len()],
    }
}
