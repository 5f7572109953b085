//! Event Feed
//!
//! Retrieval of conflict-event records and the monthly regional forecast
//! from the remote provider:
//!
//! - OAuth2 password-grant authentication
//! - Provider-declared recency cutoff
//! - Count-based choice between country-code and country-name queries
//! - Fixed-size pagination with a page ceiling
//! - Forecast CSV pages with month selection
//!
//! No retries: any non-2xx response aborts the fetch and the caller decides
//! whether cached data may stand in.

use chrono::NaiveDate;
use thiserror::Error;

pub mod client;
pub mod forecast;
pub mod record;
pub mod window;

pub use client::{AcledClient, Credentials, FeedConfig, QueryStrategy};
pub use forecast::{ForecastRecord, RegionForecast};
pub use record::{clean_events, EventRecord, VIOLENT_EVENT_TYPES};
pub use window::{EventWindow, WindowAnchors, WindowKind};

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Remote fetch failed ({endpoint}): {reason}")]
    RemoteFetch { endpoint: String, reason: String },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Malformed page: {0}")]
    MalformedPage(String),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, FeedError>;

/// Bearer token from the password grant
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(pub String);

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Remote source of events and forecasts.
///
/// Implemented by [`AcledClient`]; tests substitute in-memory providers.
#[allow(async_fn_in_trait)]
pub trait EventProvider {
    async fn authenticate(&self) -> Result<AccessToken>;

    /// Latest date the provider will serve; `fallback` when it declares none.
    async fn recency_cutoff(&self, token: &AccessToken, fallback: NaiveDate) -> Result<NaiveDate>;

    /// All raw records for a window, before cleaning.
    async fn fetch_events(&self, token: &AccessToken, window: &EventWindow) -> Result<Vec<EventRecord>>;

    /// Every forecast row for the configured country, before month selection.
    async fn fetch_forecast(&self, token: &AccessToken) -> Result<Vec<ForecastRecord>>;
}
