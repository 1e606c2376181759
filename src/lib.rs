//! Solar Flux API Library
//!
//! Fetches the NOAA GOES X-ray flux feed, reduces it to the latest reading per
//! series and serves it from a shared cache. Exposed as a library so the
//! binary and the integration tests share the same code.

pub mod cache;
pub mod cli;
pub mod data;
pub mod server;
