//! Population exposure weight for downstream weighted aggregation

pub const EXPOSURE_MIN: f64 = 0.5;
pub const EXPOSURE_MAX: f64 = 2.0;

/// Median of the strictly positive finite values
pub fn positive_median(values: &[f64]) -> Option<f64> {
    let mut v: Vec<f64> = values
        .iter()
        .copied()
        .filter(|x| x.is_finite() && *x > 0.0)
        .collect();
    if v.is_empty() {
        return None;
    }
    v.sort_by(f64::total_cmp);
    let mid = v.len() / 2;
    Some(if v.len() % 2 == 0 {
        (v[mid - 1] + v[mid]) / 2.0
    } else {
        v[mid]
    })
}

/// `clip(sqrt(pop / median), 0.5, 2.0)` per unit.
///
/// Zero population is treated as 1 before the ratio; the median is taken
/// over positive populations (1 if there are none); any non-finite weight
/// becomes 1.
pub fn exposure_weights(exposed_population: &[f64]) -> Vec<f64> {
    let median = positive_median(exposed_population).unwrap_or(1.0);
    exposed_population
        .iter()
        .map(|&p| {
            let p = if p == 0.0 { 1.0 } else { p };
            let w = (p / median).sqrt().clamp(EXPOSURE_MIN, EXPOSURE_MAX);
            if w.is_finite() {
                w
            } else {
                1.0
            }
        })
        .collect()
}
