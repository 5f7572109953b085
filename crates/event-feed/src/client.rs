//! HTTP client for the event and forecast endpoints

use crate::forecast::{parse_forecast_page, ForecastRecord};
use crate::record::EventRecord;
use crate::window::EventWindow;
use crate::{AccessToken, EventProvider, FeedError, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fields requested from the read endpoint
pub const EVENT_FIELDS: &str = "event_id_cnty|event_date|year|disorder_type|event_type|sub_event_type|country|region|iso|admin1|admin2|location|latitude|longitude|source|fatalities|notes";

/// Endpoint and paging configuration
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub token_url: String,
    pub read_url: String,
    pub forecast_url: String,
    pub client_id: String,
    /// Country name as used by the provider (e.g. "Mexico")
    pub country: String,
    /// ISO 3166-1 numeric code (e.g. 484)
    pub iso_code: u16,
    pub page_size: usize,
    pub max_pages: usize,
    /// Timeout for token, count and forecast requests
    pub short_timeout_sec: u64,
    /// Timeout for event pages
    pub page_timeout_sec: u64,
    pub verify_tls: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            token_url: "https://acleddata.com/oauth/token".to_string(),
            read_url: "https://acleddata.com/api/acled/read".to_string(),
            forecast_url: "https://acleddata.com/api/cast/read".to_string(),
            client_id: "acled".to_string(),
            country: "Mexico".to_string(),
            iso_code: 484,
            page_size: 5000,
            max_pages: 200,
            short_timeout_sec: 60,
            page_timeout_sec: 120,
            verify_tls: true,
        }
    }
}

/// Username/password for the password grant
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// How a window query identifies the country
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryStrategy {
    CountryCode(u16),
    CountryName(String),
}

impl QueryStrategy {
    /// Filter and date parameters for `window`
    pub fn params(&self, window: &EventWindow) -> Vec<(&'static str, String)> {
        let mut params = match self {
            QueryStrategy::CountryCode(iso) => vec![("iso", iso.to_string())],
            QueryStrategy::CountryName(name) => vec![("country", name.clone())],
        };
        params.push(("event_date", window.date_range()));
        params.push(("event_date_where", "BETWEEN".to_string()));
        params.push(("fields", EVENT_FIELDS.to_string()));
        params
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventPage {
    #[serde(default)]
    data: Vec<Value>,
}

/// `data_query_restrictions.date_recency.date`, or `fallback`
pub fn parse_recency_cutoff(body: &Value, fallback: NaiveDate) -> NaiveDate {
    body.pointer("/data_query_restrictions/date_recency/date")
        .and_then(Value::as_str)
        .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
        .unwrap_or(fallback)
}

/// `total_count` from a one-row query response, numeric or string
pub fn parse_total_count(body: &Value) -> u64 {
    match body.get("total_count") {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Decode the `data` array. A missing array is an empty page; an entry
/// that does not decode as an event makes the whole page malformed.
pub fn parse_event_page(body: &str) -> Result<Vec<EventRecord>> {
    let page: EventPage = serde_json::from_str(body)?;
    page.data
        .into_iter()
        .enumerate()
        .map(|(i, v)| {
            serde_json::from_value(v)
                .map_err(|e| FeedError::MalformedPage(format!("entry {}: {}", i, e)))
        })
        .collect()
}

/// Code query first, then name query; the code query again when neither
/// matches anything. `total_for` returns the match count of a strategy.
pub async fn choose_strategy_by<F, Fut>(iso_code: u16, country: &str, mut total_for: F) -> Result<QueryStrategy>
where
    F: FnMut(QueryStrategy) -> Fut,
    Fut: Future<Output = Result<u64>>,
{
    let by_code = QueryStrategy::CountryCode(iso_code);
    if total_for(by_code.clone()).await? > 0 {
        return Ok(by_code);
    }

    let by_name = QueryStrategy::CountryName(country.to_string());
    if total_for(by_name.clone()).await? > 0 {
        return Ok(by_name);
    }

    info!("No events match either query; using country code");
    Ok(by_code)
}

/// Fetch event pages 1.. until an empty page or the page ceiling.
pub async fn collect_event_pages<F, Fut>(max_pages: usize, mut fetch_page: F) -> Result<Vec<EventRecord>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let mut all = Vec::new();
    for page in 1..=max_pages {
        let records = parse_event_page(&fetch_page(page).await?)?;
        if records.is_empty() {
            break;
        }
        debug!("Event page {}: {} records", page, records.len());
        all.extend(records);

        if page == max_pages {
            warn!("Reached page ceiling ({}) while fetching events", page);
        }
    }
    Ok(all)
}

/// Fetch forecast pages 1.. until a page with fewer raw rows than
/// `page_size`, or the page ceiling.
pub async fn collect_forecast_pages<F, Fut>(
    max_pages: usize,
    page_size: usize,
    mut fetch_page: F,
) -> Result<Vec<ForecastRecord>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let mut all = Vec::new();
    for page in 1..=max_pages {
        let parsed = parse_forecast_page(&fetch_page(page).await?)?;
        let last = parsed.is_last(page_size);
        debug!("Forecast page {}: {} rows ({} decoded)", page, parsed.raw_rows, parsed.records.len());
        all.extend(parsed.records);
        if last {
            break;
        }
        if page == max_pages {
            warn!("Reached page ceiling ({}) while fetching the forecast", page);
        }
    }
    Ok(all)
}

/// Remote event/forecast client
pub struct AcledClient {
    config: FeedConfig,
    credentials: Credentials,
    client: reqwest::Client,
}

impl AcledClient {
    pub fn new(config: FeedConfig, credentials: Credentials) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;

        Ok(Self {
            config,
            credentials,
            client,
        })
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    fn short_timeout(&self) -> Duration {
        Duration::from_secs(self.config.short_timeout_sec)
    }

    fn remote_error(endpoint: &str, reason: impl Into<String>) -> FeedError {
        FeedError::RemoteFetch {
            endpoint: endpoint.to_string(),
            reason: reason.into(),
        }
    }

    async fn get_read(
        &self,
        token: &AccessToken,
        params: &[(&'static str, String)],
        timeout: Duration,
    ) -> Result<String> {
        let response = self
            .client
            .get(&self.config.read_url)
            .bearer_auth(&token.0)
            .header("Accept", "application/json")
            .query(params)
            .timeout(timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::remote_error(
                &self.config.read_url,
                format!("status {}", response.status()),
            ));
        }
        Ok(response.text().await?)
    }

    /// One-row query; the response carries counts and restriction metadata.
    pub async fn query_one_row(&self, token: &AccessToken, filter: &[(&'static str, String)]) -> Result<Value> {
        let mut params = vec![
            ("_format", "json".to_string()),
            ("page", "1".to_string()),
            ("limit", "1".to_string()),
        ];
        params.extend_from_slice(filter);

        let body = self.get_read(token, &params, self.short_timeout()).await?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn choose_strategy(&self, token: &AccessToken, window: &EventWindow) -> Result<QueryStrategy> {
        let strategy = choose_strategy_by(self.config.iso_code, &self.config.country, move |s| async move {
            Ok::<_, FeedError>(parse_total_count(&self.query_one_row(token, &s.params(window)).await?))
        })
        .await?;
        debug!("{:?} window uses {:?}", window.kind, strategy);
        Ok(strategy)
    }

    pub async fn fetch_pages(&self, token: &AccessToken, filter: &[(&'static str, String)]) -> Result<Vec<EventRecord>> {
        let timeout = Duration::from_secs(self.config.page_timeout_sec);
        let page_size = self.config.page_size;

        collect_event_pages(self.config.max_pages, move |page| {
            let mut params = vec![
                ("_format", "json".to_string()),
                ("page", page.to_string()),
                ("limit", page_size.to_string()),
            ];
            params.extend_from_slice(filter);
            async move { self.get_read(token, &params, timeout).await }
        })
        .await
    }

    async fn get_forecast_page(&self, token: &AccessToken, page: usize) -> Result<String> {
        let url = &self.config.forecast_url;
        let params = [
            ("_format", "csv".to_string()),
            ("country", self.config.country.clone()),
            ("limit", self.config.page_size.to_string()),
            ("page", page.to_string()),
        ];
        let response = self
            .client
            .get(url)
            .bearer_auth(&token.0)
            .query(&params)
            .timeout(self.short_timeout())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::remote_error(url, format!("status {}", response.status())));
        }
        Ok(response.text().await?)
    }
}

impl EventProvider for AcledClient {
    async fn authenticate(&self) -> Result<AccessToken> {
        let form = [
            ("username", self.credentials.username.as_str()),
            ("password", self.credentials.password.as_str()),
            ("grant_type", "password"),
            ("client_id", self.config.client_id.as_str()),
        ];

        let response = self
            .client
            .post(&self.config.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .timeout(self.short_timeout())
            .send()
            .await
            .map_err(|e| FeedError::Auth(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FeedError::Auth(format!(
                "token endpoint returned status {}",
                response.status()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| FeedError::Auth(e.to_string()))?;

        match body.access_token {
            Some(token) if !token.is_empty() => {
                info!("Authenticated against {}", self.config.token_url);
                Ok(AccessToken(token))
            }
            _ => Err(FeedError::Auth("response carried no access_token".to_string())),
        }
    }

    async fn recency_cutoff(&self, token: &AccessToken, fallback: NaiveDate) -> Result<NaiveDate> {
        let body = self.query_one_row(token, &[]).await?;
        let cutoff = parse_recency_cutoff(&body, fallback);
        if cutoff < fallback {
            info!("Recency cap in effect; data ends at {}", cutoff);
        }
        Ok(cutoff)
    }

    async fn fetch_events(&self, token: &AccessToken, window: &EventWindow) -> Result<Vec<EventRecord>> {
        let strategy = self.choose_strategy(token, window).await?;
        info!(
            "Fetching {:?} window {} using {:?}",
            window.kind,
            window.date_range(),
            strategy
        );
        let records = self.fetch_pages(token, &strategy.params(window)).await?;
        info!("Fetched {} raw events for {:?} window", records.len(), window.kind);
        Ok(records)
    }

    async fn fetch_forecast(&self, token: &AccessToken) -> Result<Vec<ForecastRecord>> {
        let all = collect_forecast_pages(self.config.max_pages, self.config.page_size, |page| {
            self.get_forecast_page(token, page)
        })
        .await?;

        info!("Fetched {} forecast rows for {}", all.len(), self.config.country);
        Ok(all)
    }
}
