//! Monthly regional forecast feed (CSV pages)

use crate::Result;
use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// One forecast row: a region's forecast total for a month
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastRecord {
    pub region: String,
    pub forecast_date: NaiveDate,
    pub total: f64,
}

/// Forecast totals summed per region over the selected months
#[derive(Debug, Clone, PartialEq)]
pub struct RegionForecast {
    pub region: String,
    pub total: f64,
    pub forecast_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
struct RawForecastRow {
    #[serde(default)]
    admin1: String,
    #[serde(default)]
    month: String,
    #[serde(default)]
    year: String,
    #[serde(default)]
    total_forecast: String,
}

pub fn month_number(name: &str) -> Option<u32> {
    let n = match name.trim().to_ascii_lowercase().as_str() {
        "january" => 1,
        "february" => 2,
        "march" => 3,
        "april" => 4,
        "may" => 5,
        "june" => 6,
        "july" => 7,
        "august" => 8,
        "september" => 9,
        "october" => 10,
        "november" => 11,
        "december" => 12,
        _ => return None,
    };
    Some(n)
}

/// First day of the month containing `date`
pub fn month_anchor(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// One decoded CSV page
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ForecastPage {
    pub records: Vec<ForecastRecord>,
    /// Data rows on the page, including the ones dropped while decoding
    pub raw_rows: usize,
}

impl ForecastPage {
    /// A page with fewer raw rows than requested is the last one
    pub fn is_last(&self, page_size: usize) -> bool {
        self.raw_rows == 0 || self.raw_rows < page_size
    }
}

/// Parse one CSV page. Rows without a valid month/year are dropped but
/// still counted in `raw_rows`; a missing or non-numeric total counts as zero.
pub fn parse_forecast_page(body: &str) -> Result<ForecastPage> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut page = ForecastPage::default();
    let mut skipped = 0;
    for row in reader.deserialize::<RawForecastRow>() {
        let row = row?;
        page.raw_rows += 1;
        let date = month_number(&row.month).and_then(|m| {
            let year = row.year.trim().parse::<f64>().ok()? as i32;
            NaiveDate::from_ymd_opt(year, m, 1)
        });
        let Some(forecast_date) = date else {
            skipped += 1;
            continue;
        };
        let total = row
            .total_forecast
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|t| t.is_finite())
            .unwrap_or(0.0);
        page.records.push(ForecastRecord {
            region: row.admin1.trim().to_string(),
            forecast_date,
            total,
        });
    }

    if skipped > 0 {
        warn!("Skipped {} forecast rows without a usable month/year", skipped);
    }
    Ok(page)
}

/// Months at or after `current_month`; if none, only the latest month present.
pub fn select_forecast_months(
    records: Vec<ForecastRecord>,
    current_month: NaiveDate,
) -> Vec<ForecastRecord> {
    let anchor = month_anchor(current_month);
    let (future, past): (Vec<_>, Vec<_>) = records
        .into_iter()
        .partition(|r| r.forecast_date >= anchor);

    if !future.is_empty() {
        return future;
    }

    let Some(latest) = past.iter().map(|r| r.forecast_date).max() else {
        return Vec::new();
    };
    info!("No forecast month at or after {}; falling back to {}", anchor, latest);
    past.into_iter().filter(|r| r.forecast_date == latest).collect()
}

/// Sum totals per region. `forecast_date` is the earliest selected month.
pub fn aggregate_by_region(records: &[ForecastRecord]) -> Vec<RegionForecast> {
    let Some(earliest) = records.iter().map(|r| r.forecast_date).min() else {
        return Vec::new();
    };

    let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
    for r in records {
        *totals.entry(r.region.as_str()).or_insert(0.0) += r.total;
    }

    totals
        .into_iter()
        .map(|(region, total)| RegionForecast {
            region: region.to_string(),
            total,
            forecast_date: earliest,
        })
        .collect()
}
