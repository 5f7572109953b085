//! Event records and the cleaning rules applied after retrieval

use admin_registry::Located;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashSet;
use tracing::info;

/// Event types counted as violent
pub const VIOLENT_EVENT_TYPES: [&str; 3] = [
    "Violence against civilians",
    "Battles",
    "Explosions/Remote violence",
];

/// Event-feed spellings of Mexican states mapped to the boundary source spelling
const REGION_SPELLINGS: &[(&str, &str)] = &[
    ("Michoacan de Ocampo", "Michoacán"),
    ("Queretaro", "Querétaro"),
    ("Nuevo Leon", "Nuevo León"),
    ("San Luis Potosi", "San Luis Potosí"),
    ("Yucatan", "Yucatán"),
    ("Mexico", "México"),
];

/// One conflict event as returned by the provider
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "event_id_cnty", alias = "event_id", default, deserialize_with = "de_string")]
    pub event_id: String,
    #[serde(default, deserialize_with = "de_opt_date")]
    pub event_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "de_string")]
    pub event_type: String,
    #[serde(default, deserialize_with = "de_string")]
    pub sub_event_type: String,
    #[serde(default, deserialize_with = "de_string")]
    pub country: String,
    #[serde(default, deserialize_with = "de_string")]
    pub admin1: String,
    #[serde(default, deserialize_with = "de_string")]
    pub admin2: String,
    #[serde(default, deserialize_with = "de_string")]
    pub location: String,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub longitude: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub fatalities: Option<f64>,
}

impl Located for EventRecord {
    fn position(&self) -> Option<(f64, f64)> {
        Some((self.longitude?, self.latitude?))
    }
}

impl EventRecord {
    pub fn is_violent(&self) -> bool {
        VIOLENT_EVENT_TYPES.contains(&self.event_type.as_str())
    }
}

fn de_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    let v = Option::<Value>::deserialize(d)?;
    Ok(match v {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    })
}

fn de_opt_f64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<f64>, D::Error> {
    let v = Option::<Value>::deserialize(d)?;
    Ok(v.and_then(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
    .filter(|x| x.is_finite()))
}

fn de_opt_date<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<NaiveDate>, D::Error> {
    let v = Option::<Value>::deserialize(d)?;
    Ok(match v {
        Some(Value::String(s)) => parse_event_date(&s),
        _ => None,
    })
}

/// Accepts `YYYY-MM-DD`, optionally followed by a time part
pub fn parse_event_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    let date_part = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

fn harmonize_region_spelling(admin1: &str) -> Option<&'static str> {
    REGION_SPELLINGS
        .iter()
        .find(|(from, _)| *from == admin1)
        .map(|(_, to)| *to)
}

/// Keep violent events for `country`, first occurrence per `event_id`.
/// Events without an id are kept and never treated as duplicates.
pub fn clean_events(raw: Vec<EventRecord>, country: &str) -> Vec<EventRecord> {
    let total = raw.len();
    let mut seen: HashSet<String> = HashSet::with_capacity(total);

    let cleaned: Vec<EventRecord> = raw
        .into_iter()
        .filter(|e| e.country == country)
        .filter(|e| e.event_id.is_empty() || seen.insert(e.event_id.clone()))
        .filter(EventRecord::is_violent)
        .map(|mut e| {
            if let Some(fixed) = harmonize_region_spelling(&e.admin1) {
                e.admin1 = fixed.to_string();
            }
            e
        })
        .collect();

    info!(
        "Cleaned events: {} of {} retained ({} country, dedup and violent-type filters)",
        cleaned.len(),
        total,
        country
    );
    cleaned
}
