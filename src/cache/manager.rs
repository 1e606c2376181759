//! Flux cache manager
//!
//! Provides a `FluxCache` that keeps one `ApiResponse` in memory together with
//! the time it was fetched, refreshing it from a `FluxSource` once it is older
//! than the refresh interval.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::data::{ApiResponse, FetchError, SeriesLatest, XrayClient, LONG_SERIES, SHORT_SERIES};

/// Age after which the cached response is considered stale
pub const REFRESH_INTERVAL_SECS: i64 = 60;

/// Errors returned to callers of `FluxCache::get_response`
#[derive(Debug, Error)]
pub enum ApiError {
    /// Upstream could not be reached after all retries
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Upstream returned a document that could not be parsed
    #[error("Malformed upstream payload: {0}")]
    MalformedPayload(String),

    /// A series required by the response is absent from the feed
    #[error("Required series missing from upstream data: {0}")]
    MissingSeries(String),
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::UpstreamUnavailable { attempts, reason } => {
                ApiError::UpstreamUnavailable(format!("{} (after {} attempts)", reason, attempts))
            }
            FetchError::MalformedPayload(reason) => ApiError::MalformedPayload(reason),
        }
    }
}

/// Source of reduced flux data
///
/// Implemented by `XrayClient`; tests substitute scripted sources.
pub trait FluxSource: Send + Sync {
    /// Fetch the feed and reduce it to the latest observation per series
    fn latest_series(&self) -> impl Future<Output = Result<SeriesLatest, FetchError>> + Send;
}

impl FluxSource for XrayClient {
    fn latest_series(&self) -> impl Future<Output = Result<SeriesLatest, FetchError>> + Send {
        self.fetch_latest()
    }
}

impl<S: FluxSource> FluxSource for Arc<S> {
    fn latest_series(&self) -> impl Future<Output = Result<SeriesLatest, FetchError>> + Send {
        S::latest_series(self)
    }
}

/// Source of the current time for freshness checks
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<C: Clock> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        C::now(self)
    }
}

/// State shared by all callers, guarded by the cache's mutex
#[derive(Debug, Default)]
struct CacheState {
    /// When the cached response was fetched
    last_fetch_time: Option<DateTime<Utc>>,
    /// Last successfully built response
    cached_response: Option<Arc<ApiResponse>>,
}

impl CacheState {
    /// Returns the cached response if it is younger than `interval` at `now`
    ///
    /// A negative age (the clock stepped backwards) counts as stale.
    fn fresh_response(&self, now: DateTime<Utc>, interval: Duration) -> Option<Arc<ApiResponse>> {
        let (response, fetched_at) = (self.cached_response.as_ref()?, self.last_fetch_time?);
        let age = now - fetched_at;

        if age >= Duration::zero() && age < interval {
            Some(Arc::clone(response))
        } else {
            None
        }
    }
}

/// Shared cache of the public flux response
///
/// A single mutex guards both the freshness check and the refresh, so callers
/// arriving while a refresh is in flight wait for it and then see its result
/// instead of starting their own upstream fetch.
pub struct FluxCache<S, C = SystemClock> {
    /// Upstream data source
    source: S,
    /// Time source for freshness checks
    clock: C,
    /// How long a response stays fresh
    refresh_interval: Duration,
    /// Cached response and its fetch time
    state: Mutex<CacheState>,
}

impl<S: FluxSource> FluxCache<S> {
    /// Creates an empty cache over `source` using the wall clock
    pub fn new(source: S) -> Self {
        Self::with_clock(source, SystemClock)
    }
}

impl<S: FluxSource, C: Clock> FluxCache<S, C> {
    /// Creates an empty cache with a custom clock
    ///
    /// Useful for testing the refresh window without waiting on real time.
    pub fn with_clock(source: S, clock: C) -> Self {
        Self {
            source,
            clock,
            refresh_interval: Duration::seconds(REFRESH_INTERVAL_SECS),
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Overrides the refresh interval
    pub fn with_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self
    }

    /// How long a response stays fresh
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// When the currently cached response was fetched, if any
    pub async fn last_fetch_time(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.last_fetch_time
    }

    /// Returns the current API response
    ///
    /// Serves the cached response while it is fresh. Otherwise fetches the
    /// feed, builds a new response and stores it, all while holding the lock.
    ///
    /// # Returns
    /// * `Ok(Arc<ApiResponse>)` - The cached or freshly built response
    /// * `Err(ApiError)` - If the refresh failed; the cache is left unchanged
    pub async fn get_response(&self) -> Result<Arc<ApiResponse>, ApiError> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        if let Some(response) = state.fresh_response(now, self.refresh_interval) {
            debug!("Serving cached flux response");
            return Ok(response);
        }

        info!("Flux response stale, refreshing from upstream");

        let latest = self.source.latest_series().await.map_err(|e| {
            warn!(error = %e, "Flux refresh failed");
            ApiError::from(e)
        })?;

        let response = Arc::new(build_response(latest).inspect_err(|e| {
            warn!(error = %e, "Flux refresh produced an incomplete response");
        })?);

        state.last_fetch_time = Some(now);
        state.cached_response = Some(Arc::clone(&response));

        info!(
            timestamp = %response.timestamp,
            flux_short = response.flux_short,
            flux_long = response.flux_long,
            "Flux response refreshed"
        );

        Ok(response)
    }
}

/// Build the public response from the latest observation of each series
///
/// Both the short and long wavelength series must be present. The response
/// timestamp is taken from the short-wavelength series.
pub fn build_response(raw: SeriesLatest) -> Result<ApiResponse, ApiError> {
    let short = raw
        .get(SHORT_SERIES)
        .ok_or_else(|| ApiError::MissingSeries(SHORT_SERIES.to_string()))?;
    let long = raw
        .get(LONG_SERIES)
        .ok_or_else(|| ApiError::MissingSeries(LONG_SERIES.to_string()))?;

    let (timestamp, flux_short, flux_long) = (short.timestamp, short.flux_value, long.flux_value);

    Ok(ApiResponse {
        timestamp,
        flux_short,
        flux_long,
        raw,
    })
}
