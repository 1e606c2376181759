//! NOAA GOES X-ray flux client
//!
//! This module fetches the 6-hour X-ray flux document published by the NOAA
//! Space Weather Prediction Center, parses it into `Observation`s and reduces
//! them to the latest observation per series.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use super::{Observation, SeriesLatest};

/// URL of the primary GOES satellite X-ray feed
pub const XRAYS_URL: &str = "https://services.swpc.noaa.gov/json/goes/primary/xrays-6-hour.json";

/// User agent sent with every upstream request
const USER_AGENT: &str = concat!("solarflux/", env!("CARGO_PKG_VERSION"));

/// Timeout for a single upstream request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Retries after the first attempt
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delay between attempts
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Errors that can occur when fetching X-ray flux data
#[derive(Debug, Error)]
pub enum FetchError {
    /// Upstream could not be reached or kept answering with a non-200 status
    #[error("Upstream unavailable after {attempts} attempts: {reason}")]
    UpstreamUnavailable {
        /// Number of attempts made
        attempts: u32,
        /// Failure of the last attempt
        reason: String,
    },

    /// Upstream answered 200 but the document has the wrong shape
    #[error("Malformed upstream payload: {0}")]
    MalformedPayload(String),
}

/// Bounded retry policy for upstream requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Pause between two attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Total number of attempts, including the first one
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Client for fetching X-ray flux data from NOAA SWPC
#[derive(Debug, Clone)]
pub struct XrayClient {
    client: Client,
    url: String,
    retry: RetryPolicy,
}

impl Default for XrayClient {
    fn default() -> Self {
        Self::new()
    }
}

impl XrayClient {
    /// Create a new XrayClient pointing at the NOAA feed with the default retry policy
    pub fn new() -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self::with_client(client)
    }

    /// Create a new XrayClient with a custom HTTP client
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            url: XRAYS_URL.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    /// Point the client at a different feed URL
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Replace the retry policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The feed URL this client fetches
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch all observations currently published by the feed
    ///
    /// # Returns
    /// * `Ok(Vec<Observation>)` - Every record of the document, in upstream order
    /// * `Err(FetchError::UpstreamUnavailable)` - If every attempt failed
    /// * `Err(FetchError::MalformedPayload)` - If the document could not be parsed
    pub async fn fetch(&self) -> Result<Vec<Observation>, FetchError> {
        let body = self.fetch_body().await?;
        let observations = parse_observations(&body)?;

        debug!(count = observations.len(), "Parsed X-ray observations");

        Ok(observations)
    }

    /// Fetch the feed and reduce it to the latest observation per series
    pub async fn fetch_latest(&self) -> Result<SeriesLatest, FetchError> {
        let observations = self.fetch().await?;
        Ok(reduce_latest(observations))
    }

    /// GET the feed, retrying on network errors and non-200 responses
    async fn fetch_body(&self) -> Result<String, FetchError> {
        let attempts = self.retry.attempts();
        let mut reason = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(self.retry.delay).await;
            }

            debug!(attempt, url = %self.url, "Fetching X-ray flux feed");

            match self.client.get(&self.url).send().await {
                Ok(response) if response.status() == StatusCode::OK => {
                    match response.text().await {
                        Ok(body) => return Ok(body),
                        Err(e) => reason = format!("failed to read response body: {}", e),
                    }
                }
                Ok(response) => reason = format!("unexpected status {}", response.status()),
                Err(e) => reason = format!("request failed: {}", e),
            }

            warn!(attempt, attempts, reason = %reason, "X-ray flux fetch attempt failed");
        }

        Err(FetchError::UpstreamUnavailable { attempts, reason })
    }
}

/// Parse the upstream JSON document into observations
///
/// The document must be an array of objects. Every object needs an `energy`
/// string, a `time_tag` timestamp and a numeric `flux`; a single bad record
/// fails the whole document.
pub fn parse_observations(body: &str) -> Result<Vec<Observation>, FetchError> {
    let records: Vec<Map<String, Value>> = serde_json::from_str(body)
        .map_err(|e| FetchError::MalformedPayload(format!("expected an array of records: {}", e)))?;

    records
        .into_iter()
        .enumerate()
        .map(|(index, record)| parse_record(index, record))
        .collect()
}

/// Convert one upstream record into an Observation
fn parse_record(index: usize, mut record: Map<String, Value>) -> Result<Observation, FetchError> {
    let series_id = match record.remove("energy") {
        Some(Value::String(energy)) => energy,
        _ => return Err(missing_field(index, "energy")),
    };

    let timestamp = match record.remove("time_tag") {
        Some(Value::String(time_tag)) => parse_time_tag(&time_tag).ok_or_else(|| {
            FetchError::MalformedPayload(format!(
                "record {} has an invalid time_tag: {}",
                index, time_tag
            ))
        })?,
        _ => return Err(missing_field(index, "time_tag")),
    };

    let flux_value = record
        .remove("flux")
        .and_then(|flux| flux.as_f64())
        .ok_or_else(|| missing_field(index, "flux"))?;

    Ok(Observation {
        series_id,
        timestamp,
        flux_value,
        extra: record,
    })
}

fn missing_field(index: usize, field: &str) -> FetchError {
    FetchError::MalformedPayload(format!("record {} is missing `{}`", index, field))
}

/// Parse an upstream `time_tag`
///
/// Accepts RFC 3339 timestamps (`2024-01-01T00:00:00Z`) as well as offset-less
/// `2024-01-01T00:00:00` and `2024-01-01T00:00`, which are read as UTC.
pub fn parse_time_tag(time_tag: &str) -> Option<DateTime<Utc>> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(time_tag) {
        return Some(timestamp.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(time_tag, format).ok())
        .map(|naive| naive.and_utc())
}

/// Reduce observations to the latest one per series
///
/// Each series keeps the observation with the greatest timestamp. On equal
/// timestamps the one appearing later in the input wins, since the feed order
/// is not guaranteed.
pub fn reduce_latest(observations: impl IntoIterator<Item = Observation>) -> SeriesLatest {
    let mut latest = SeriesLatest::new();

    for observation in observations {
        match latest.get(&observation.series_id) {
            Some(current) if current.timestamp > observation.timestamp => {}
            _ => {
                latest.insert(observation.series_id.clone(), observation);
            }
        }
    }

    latest
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    /// Sample document in the shape NOAA publishes
    const VALID_RESPONSE: &str = r#"[
        {"time_tag": "2024-01-01T00:00:00Z", "satellite": 16, "flux": 1.2e-07, "observed_flux": 1.3e-07, "electron_correction": 0.0, "electron_contaminaton": false, "energy": "0.05-0.4nm"},
        {"time_tag": "2024-01-01T00:00:00Z", "satellite": 16, "flux": 4.9e-07, "observed_flux": 5.0e-07, "electron_correction": 0.0, "electron_contaminaton": false, "energy": "0.1-0.8nm"},
        {"time_tag": "2024-01-01T00:01:00Z", "satellite": 16, "flux": 1.3e-07, "observed_flux": 1.4e-07, "electron_correction": 0.0, "electron_contaminaton": false, "energy": "0.05-0.4nm"},
        {"time_tag": "2024-01-01T00:01:00Z", "satellite": 16, "flux": 5.0e-07, "observed_flux": 5.1e-07, "electron_correction": 0.0, "electron_contaminaton": false, "energy": "0.1-0.8nm"}
    ]"#;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_parse_valid_response() {
        let observations = parse_observations(VALID_RESPONSE).expect("Should parse");

        assert_eq!(observations.len(), 4);
        assert_eq!(observations[0].series_id, "0.05-0.4nm");
        assert_eq!(observations[0].timestamp, at(0, 0));
        assert_eq!(observations[0].flux_value, 1.2e-7);
        assert_eq!(observations[3].series_id, "0.1-0.8nm");
        assert_eq!(observations[3].timestamp, at(0, 1));
    }

    #[test]
    fn test_parse_keeps_extra_fields() {
        let observations = parse_observations(VALID_RESPONSE).expect("Should parse");

        let extra = &observations[0].extra;
        assert_eq!(extra.get("satellite"), Some(&json!(16)));
        assert_eq!(extra.get("observed_flux"), Some(&json!(1.3e-7)));
        assert!(!extra.contains_key("energy"), "Core fields should not be duplicated");
        assert!(!extra.contains_key("flux"));
    }

    #[test]
    fn test_parse_empty_array() {
        let observations = parse_observations("[]").expect("Empty array is valid");
        assert!(observations.is_empty());
    }

    #[test]
    fn test_parse_missing_energy_fails_whole_document() {
        let body = r#"[
            {"time_tag": "2024-01-01T00:00:00Z", "flux": 1.0e-7, "energy": "0.05-0.4nm"},
            {"time_tag": "2024-01-01T00:00:00Z", "flux": 1.0e-7}
        ]"#;

        let err = parse_observations(body).unwrap_err();

        assert!(matches!(err, FetchError::MalformedPayload(_)));
        assert!(err.to_string().contains("energy"));
        assert!(err.to_string().contains("record 1"));
    }

    #[test]
    fn test_parse_missing_time_tag_fails() {
        let body = r#"[{"flux": 1.0e-7, "energy": "0.05-0.4nm"}]"#;

        let err = parse_observations(body).unwrap_err();

        assert!(matches!(err, FetchError::MalformedPayload(_)));
        assert!(err.to_string().contains("time_tag"));
    }

    #[test]
    fn test_parse_invalid_time_tag_fails() {
        let body = r#"[{"time_tag": "yesterday", "flux": 1.0e-7, "energy": "0.05-0.4nm"}]"#;

        let err = parse_observations(body).unwrap_err();

        assert!(matches!(err, FetchError::MalformedPayload(_)));
        assert!(err.to_string().contains("yesterday"));
    }

    #[test]
    fn test_parse_non_numeric_flux_fails() {
        let body = r#"[{"time_tag": "2024-01-01T00:00:00Z", "flux": null, "energy": "0.05-0.4nm"}]"#;

        let err = parse_observations(body).unwrap_err();

        assert!(matches!(err, FetchError::MalformedPayload(_)));
        assert!(err.to_string().contains("flux"));
    }

    #[test]
    fn test_parse_non_array_document_fails() {
        let err = parse_observations(r#"{"energy": "0.05-0.4nm"}"#).unwrap_err();
        assert!(matches!(err, FetchError::MalformedPayload(_)));

        let err = parse_observations("not json").unwrap_err();
        assert!(matches!(err, FetchError::MalformedPayload(_)));
    }

    #[test]
    fn test_parse_time_tag_formats() {
        let expected = at(12, 30);

        assert_eq!(parse_time_tag("2024-01-01T12:30:00Z"), Some(expected));
        assert_eq!(parse_time_tag("2024-01-01T13:30:00+01:00"), Some(expected));
        assert_eq!(parse_time_tag("2024-01-01T12:30:00"), Some(expected));
        assert_eq!(parse_time_tag("2024-01-01T12:30"), Some(expected));
        assert_eq!(parse_time_tag("12:30"), None);
    }

    #[test]
    fn test_reduce_keeps_one_entry_per_series() {
        let observations = parse_observations(VALID_RESPONSE).unwrap();

        let latest = reduce_latest(observations);

        assert_eq!(latest.len(), 2);
        assert!(latest.contains_key("0.05-0.4nm"));
        assert!(latest.contains_key("0.1-0.8nm"));
    }

    #[test]
    fn test_reduce_selects_maximum_timestamp_regardless_of_order() {
        let observations = vec![
            Observation::new("0.05-0.4nm", at(0, 5), 3.0),
            Observation::new("0.05-0.4nm", at(0, 9), 9.0),
            Observation::new("0.05-0.4nm", at(0, 1), 1.0),
            Observation::new("0.1-0.8nm", at(0, 2), 2.0),
        ];

        let latest = reduce_latest(observations);

        assert_eq!(latest["0.05-0.4nm"].timestamp, at(0, 9));
        assert_eq!(latest["0.05-0.4nm"].flux_value, 9.0);
        assert_eq!(latest["0.1-0.8nm"].flux_value, 2.0);
    }

    #[test]
    fn test_reduce_tie_goes_to_last_in_input() {
        let observations = vec![
            Observation::new("0.1-0.8nm", at(0, 1), 1.0),
            Observation::new("0.1-0.8nm", at(0, 1), 2.0),
        ];

        let latest = reduce_latest(observations);

        assert_eq!(latest["0.1-0.8nm"].flux_value, 2.0);
    }

    #[test]
    fn test_reduce_empty_input() {
        assert!(reduce_latest(Vec::new()).is_empty());
    }

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.delay, Duration::from_secs(3));
        assert_eq!(policy.attempts(), 4);
    }

    #[test]
    fn test_client_defaults_to_noaa_feed() {
        let client = XrayClient::new();
        assert_eq!(client.url(), XRAYS_URL);

        let client = client.with_url("http://127.0.0.1:9/xrays.json");
        assert_eq!(client.url(), "http://127.0.0.1:9/xrays.json");
    }
}
