//! Core data models for the solar flux API
//!
//! This module contains the types shared between the upstream client and the
//! flux cache: single observations as reported by NOAA, the latest-per-series
//! reduction, and the public response snapshot.

pub mod xrays;

pub use xrays::{
    parse_observations, parse_time_tag, reduce_latest, FetchError, RetryPolicy, XrayClient,
    XRAYS_URL,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Series identifier of the short-wavelength X-ray band
pub const SHORT_SERIES: &str = "0.05-0.4nm";

/// Series identifier of the long-wavelength X-ray band
pub const LONG_SERIES: &str = "0.1-0.8nm";

/// A single data point from the upstream X-ray feed
///
/// Serializes back to the upstream field names (`energy`, `time_tag`, `flux`)
/// so that the `raw` section of the API mirrors what NOAA published. Any other
/// fields present on the upstream record are kept in `extra` and emitted
/// alongside.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    /// Wavelength band this point belongs to (e.g. "0.05-0.4nm")
    #[serde(rename = "energy")]
    pub series_id: String,
    /// Observation time
    #[serde(rename = "time_tag")]
    pub timestamp: DateTime<Utc>,
    /// Measured flux in W/m²
    #[serde(rename = "flux")]
    pub flux_value: f64,
    /// Remaining upstream fields, passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Observation {
    /// Creates an observation without any extra upstream fields
    pub fn new(series_id: impl Into<String>, timestamp: DateTime<Utc>, flux_value: f64) -> Self {
        Self {
            series_id: series_id.into(),
            timestamp,
            flux_value,
            extra: Map::new(),
        }
    }
}

/// Latest observation per series, keyed by series identifier
///
/// Ordered by key so the serialized `raw` object is stable between refreshes.
pub type SeriesLatest = BTreeMap<String, Observation>;

/// The public snapshot served by `/solar-flux.json`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    /// Time of the latest short-wavelength observation
    pub timestamp: DateTime<Utc>,
    /// Latest flux of the 0.05-0.4nm band
    pub flux_short: f64,
    /// Latest flux of the 0.1-0.8nm band
    pub flux_long: f64,
    /// Latest observation of every series in the feed
    pub raw: SeriesLatest,
}
