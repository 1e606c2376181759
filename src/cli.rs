//! Command-line interface parsing for the solar flux API
//!
//! This module handles parsing of CLI arguments using clap: the listen
//! address of the HTTP server and the `--once` mode that prints a single
//! response to stdout instead of serving.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::Parser;
use thiserror::Error;

/// Default listen port
pub const DEFAULT_PORT: u16 = 4567;

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// The host could not be parsed as an IP address
    #[error("Invalid host: '{0}'. Expected an IP address such as 0.0.0.0 or 127.0.0.1, or 'localhost'")]
    InvalidHost(String),
}

/// Solar Flux API - Republish NOAA solar X-ray flux as JSON
#[derive(Parser, Debug)]
#[command(name = "solarflux")]
#[command(about = "Serve the latest NOAA solar X-ray flux readings as a JSON API")]
#[command(version)]
pub struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0", value_name = "HOST")]
    pub host: String,

    /// Port to listen on
    #[arg(long, short, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Fetch once, print the JSON response to stdout and exit
    ///
    /// Examples:
    ///   solarflux --once            # Print the current flux snapshot
    ///   solarflux --port 8080       # Serve on port 8080
    #[arg(long)]
    pub once: bool,
}

/// Configuration derived from CLI arguments for application startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupConfig {
    /// Address the HTTP server binds to
    pub addr: SocketAddr,
    /// Print one response and exit instead of serving
    pub once: bool,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            once: false,
        }
    }
}

/// Parses a host argument into an IP address.
///
/// # Arguments
/// * `s` - The host string from CLI
///
/// # Returns
/// * `Ok(IpAddr)` for an IPv4/IPv6 literal or `localhost`
/// * `Err(CliError::InvalidHost)` otherwise
pub fn parse_host_arg(s: &str) -> Result<IpAddr, CliError> {
    if s.eq_ignore_ascii_case("localhost") {
        return Ok(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
    s.parse().map_err(|_| CliError::InvalidHost(s.to_string()))
}

impl StartupConfig {
    /// Creates a StartupConfig from parsed CLI arguments.
    ///
    /// # Arguments
    /// * `cli` - The parsed CLI struct
    ///
    /// # Returns
    /// * `Ok(StartupConfig)` with the listen address resolved
    /// * `Err(CliError)` if the host is not a valid address
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let ip = parse_host_arg(&cli.host)?;
        Ok(StartupConfig {
            addr: SocketAddr::new(ip, cli.port),
            once: cli.once,
        })
    }
}
