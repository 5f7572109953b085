//! Windowed event counts and population-normalized rates

use crate::cache::EventRow;
use admin_registry::UnitRegistry;
use event_feed::WindowAnchors;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{info, warn};

/// Rates are per 100,000 exposed people
pub const RATE_SCALE: f64 = 100_000.0;

/// Counts and rates for one unit, aligned with the registry
#[derive(Debug, Clone, PartialEq)]
pub struct UnitRates {
    pub unit_id: String,
    pub exposed_population: f64,
    pub events_30d: usize,
    pub events_90d: usize,
    pub events_prev30: usize,
    pub rate_30d: f64,
    pub rate_90d: f64,
    pub rate_prev30: f64,
    pub rate_delta_raw: f64,
}

/// `100000 * count / population`, exactly 0 when the population is not positive
pub fn rate_per_100k(count: usize, population: f64) -> f64 {
    if population > 0.0 {
        RATE_SCALE * count as f64 / population
    } else {
        0.0
    }
}

/// Distinct event ids per unit among rows passing `keep`; rows without an
/// id each count once.
fn count_by_unit<'a>(
    registry: &UnitRegistry,
    rows: &'a [EventRow],
    keep: impl Fn(&EventRow) -> bool,
) -> Vec<usize> {
    let mut seen: Vec<HashSet<&'a str>> = vec![HashSet::new(); registry.len()];
    let mut anonymous = vec![0usize; registry.len()];
    let mut unknown = 0;

    for row in rows.iter().filter(|r| keep(r)) {
        let Some(unit_id) = row.unit_id.as_deref() else {
            continue;
        };
        match registry.index_of(unit_id) {
            Some(i) if row.event_id.is_empty() => anonymous[i] += 1,
            Some(i) => {
                seen[i].insert(row.event_id.as_str());
            }
            None => unknown += 1,
        }
    }

    if unknown > 0 {
        warn!("{} events reference units absent from the registry", unknown);
    }
    seen.into_iter()
        .zip(anonymous)
        .map(|(s, n)| s.len() + n)
        .collect()
}

/// Per-unit counts and rates for the three windows.
///
/// `exposed_population` is indexed like the registry. Every unit gets a
/// row; units without events get zero counts.
pub fn compute_rates(
    registry: &UnitRegistry,
    exposed_population: &[f64],
    current: &[EventRow],
    prior: &[EventRow],
    anchors: &WindowAnchors,
) -> Vec<UnitRates> {
    let counts_30 = count_by_unit(registry, current, |r| {
        r.event_date.is_some_and(|d| anchors.in_last_30(d))
    });
    let counts_90 = count_by_unit(registry, current, |_| true);
    let counts_prev = count_by_unit(registry, prior, |_| true);

    let rates: Vec<UnitRates> = registry
        .units()
        .iter()
        .enumerate()
        .map(|(i, unit)| {
            let pop = exposed_population.get(i).copied().unwrap_or(0.0);
            let rate_30d = rate_per_100k(counts_30[i], pop);
            let rate_prev30 = rate_per_100k(counts_prev[i], pop);
            UnitRates {
                unit_id: unit.unit_id.clone(),
                exposed_population: pop,
                events_30d: counts_30[i],
                events_90d: counts_90[i],
                events_prev30: counts_prev[i],
                rate_30d,
                rate_90d: rate_per_100k(counts_90[i], pop),
                rate_prev30,
                rate_delta_raw: rate_30d - rate_prev30,
            }
        })
        .collect();

    info!(
        "Computed rates for {} units: {} events in 30d, {} in 90d, {} in prior window",
        rates.len(),
        counts_30.iter().sum::<usize>(),
        counts_90.iter().sum::<usize>(),
        counts_prev.iter().sum::<usize>()
    );
    rates
}

/// Unit with events but no exposed population
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZeroPopulationAnomaly {
    pub parent_region_name: String,
    pub unit_name: String,
    pub unit_id: String,
    pub events_30d: usize,
    pub events_90d: usize,
    pub events_prev30: usize,
}

pub fn zero_population_anomalies(registry: &UnitRegistry, rates: &[UnitRates]) -> Vec<ZeroPopulationAnomaly> {
    registry
        .units()
        .iter()
        .zip(rates)
        .filter(|(_, r)| {
            r.exposed_population <= 0.0 && (r.events_30d > 0 || r.events_90d > 0 || r.events_prev30 > 0)
        })
        .map(|(u, r)| ZeroPopulationAnomaly {
            parent_region_name: u.parent_region_name.clone(),
            unit_name: u.unit_name.clone(),
            unit_id: u.unit_id.clone(),
            events_30d: r.events_30d,
            events_90d: r.events_90d,
            events_prev30: r.events_prev30,
        })
        .collect()
}
