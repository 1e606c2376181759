//! Cache module holding the single process-wide API response
//!
//! This module provides the `FluxCache`, which serves the last successfully
//! built `ApiResponse` for a fixed refresh window and performs at most one
//! upstream refresh per window, even under concurrent callers. A failed
//! refresh leaves the previously cached response and its fetch time intact.

mod manager;

pub use manager::{
    build_response, ApiError, Clock, FluxCache, FluxSource, SystemClock, REFRESH_INTERVAL_SECS,
};
