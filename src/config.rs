//! Configuration for the tile loader command line tool.
//!
//! Options come from command-line arguments via clap, with environment
//! variable fallbacks using the `TILE_` prefix:
//!
//! - `TILE_URL_TEMPLATE` - Tile URL template with `{z}`, `{x}`, `{y}` (required)
//! - `TILE_SOURCE_NAME` - Source identity used in cache keys (default: default)
//! - `TILE_CONNECT_TIMEOUT` - Connect timeout in seconds (default: 15)
//! - `TILE_READ_TIMEOUT` - Read timeout in seconds (default: 30)
//! - `TILE_HOST_LIMIT` - Concurrent downloads per host (default: 6)
//! - `TILE_WORKER_LIMIT` - Concurrent downloads overall (default: 25)
//! - `TILE_CACHE_SIZE` - In-memory cache capacity in bytes (default: 100MB)
//! - `TILE_MAX_AGE` - Serve cached tiles younger than this many seconds

use std::time::Duration;

use clap::Parser;
use http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::error::ConfigError;
use crate::executor::{DEFAULT_HOST_LIMIT, DEFAULT_WORKER_LIMIT};

// =============================================================================
// Default Values
// =============================================================================

/// Default tile source name.
pub const DEFAULT_SOURCE_NAME: &str = "default";

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;

/// Default read timeout in seconds.
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

/// Largest tile range accepted in one run.
pub const MAX_TILES_PER_RUN: u64 = 100_000;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Tile Loader - fetch a range of map tiles through a bounded, cached
/// download pool.
#[derive(Parser, Debug, Clone)]
#[command(name = "tile-loader")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    // =========================================================================
    // Source Configuration
    // =========================================================================
    /// Tile URL template, e.g. https://tile.example.org/{z}/{x}/{y}.png
    #[arg(long, env = "TILE_URL_TEMPLATE")]
    pub url_template: String,

    /// Source identity used as the cache key prefix.
    #[arg(long, default_value = DEFAULT_SOURCE_NAME, env = "TILE_SOURCE_NAME")]
    pub source_name: String,

    // =========================================================================
    // Tile Range
    // =========================================================================
    /// Zoom level to load.
    #[arg(short, long, default_value_t = 0)]
    pub zoom: u32,

    #[arg(long, default_value_t = 0)]
    pub min_x: u32,

    #[arg(long, default_value_t = 0)]
    pub max_x: u32,

    #[arg(long, default_value_t = 0)]
    pub min_y: u32,

    #[arg(long, default_value_t = 0)]
    pub max_y: u32,

    // =========================================================================
    // Network Configuration
    // =========================================================================
    /// Connect timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS, env = "TILE_CONNECT_TIMEOUT")]
    pub connect_timeout: u64,

    /// Read timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_READ_TIMEOUT_SECS, env = "TILE_READ_TIMEOUT")]
    pub read_timeout: u64,

    /// Extra request header as NAME:VALUE. May be repeated.
    #[arg(long = "header", value_name = "NAME:VALUE")]
    pub headers: Vec<String>,

    // =========================================================================
    // Admission Configuration
    // =========================================================================
    /// Maximum concurrent downloads per host.
    #[arg(long, default_value_t = DEFAULT_HOST_LIMIT, env = "TILE_HOST_LIMIT")]
    pub host_limit: usize,

    /// Maximum concurrent downloads overall.
    #[arg(long, default_value_t = DEFAULT_WORKER_LIMIT, env = "TILE_WORKER_LIMIT")]
    pub worker_limit: usize,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// In-memory cache capacity in bytes.
    #[arg(long, default_value_t = DEFAULT_CACHE_CAPACITY, env = "TILE_CACHE_SIZE")]
    pub cache_size: usize,

    /// Serve cached tiles younger than this many seconds, ignoring server
    /// expiry. Without it, server expiry is honored.
    #[arg(long, env = "TILE_MAX_AGE")]
    pub max_age: Option<u64>,

    /// Number of times to load the range. Later passes hit the cache.
    #[arg(long, default_value_t = 1)]
    pub passes: u32,

    // =========================================================================
    // Output Configuration
    // =========================================================================
    /// Print the final statistics as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.url_template.is_empty() {
            return Err(
                "URL template is required. Set --url-template or TILE_URL_TEMPLATE".to_string(),
            );
        }
        if !self.url_template.contains("{z}")
            || !self.url_template.contains("{x}")
            || !self.url_template.contains("{y}")
        {
            return Err("URL template must contain {z}, {x} and {y}".to_string());
        }

        if self.source_name.is_empty() {
            return Err("source_name must not be empty".to_string());
        }

        if self.min_x > self.max_x || self.min_y > self.max_y {
            return Err("tile range is empty: min must not exceed max".to_string());
        }
        if self.tile_count() > MAX_TILES_PER_RUN {
            return Err(format!(
                "tile range covers {} tiles, at most {} allowed",
                self.tile_count(),
                MAX_TILES_PER_RUN
            ));
        }

        if self.connect_timeout == 0 || self.read_timeout == 0 {
            return Err("timeouts must be greater than 0".to_string());
        }

        if self.host_limit == 0 {
            return Err("host_limit must be greater than 0".to_string());
        }
        if self.worker_limit == 0 {
            return Err("worker_limit must be greater than 0".to_string());
        }
        if self.cache_size == 0 {
            return Err("cache_size must be greater than 0".to_string());
        }
        if self.passes == 0 {
            return Err("passes must be greater than 0".to_string());
        }

        self.headers().map_err(|e| e.to_string())?;

        Ok(())
    }

    /// Number of tiles in the configured range.
    pub fn tile_count(&self) -> u64 {
        let width = u64::from(self.max_x.saturating_sub(self.min_x)) + 1;
        let height = u64::from(self.max_y.saturating_sub(self.min_y)) + 1;
        width * height
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout)
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age.map(Duration::from_secs)
    }

    /// Parse the `NAME:VALUE` header arguments.
    pub fn headers(&self) -> Result<HeaderMap, ConfigError> {
        let mut map = HeaderMap::new();

        for raw in &self.headers {
            let (name, value) = raw.split_once(':').ok_or_else(|| ConfigError::InvalidHeader {
                name: raw.clone(),
                reason: "expected NAME:VALUE".to_string(),
            })?;
            let name = name.trim();

            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| ConfigError::InvalidHeader {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
            let header_value =
                HeaderValue::from_str(value.trim()).map_err(|e| ConfigError::InvalidHeader {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;

            map.append(header_name, header_value);
        }

        Ok(map)
    }
}

// =============================================================================
// Tests
// =============================================================================
