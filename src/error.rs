use std::time::Duration;

use thiserror::Error;

/// Errors detected while assembling a loader or executor.
///
/// These are fatal at construction time and never occur once a loader exists.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Per-host concurrency limit must be positive
    #[error("Invalid per-host limit: expected at least 1, got {0}")]
    InvalidHostLimit(usize),

    /// Worker pool size must be positive
    #[error("Invalid worker limit: expected at least 1, got {0}")]
    InvalidWorkerLimit(usize),

    /// No cache store was supplied
    #[error("A cache store is required")]
    MissingCache,

    /// A configured request header could not be parsed
    #[error("Invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },

    /// The HTTP client could not be constructed
    #[error("Failed to create HTTP client: {0}")]
    HttpClient(String),
}

/// Errors from a single network exchange.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The exchange did not finish within the connect + read budget
    #[error("Request to {url} timed out after {elapsed:?}")]
    Timeout { url: String, elapsed: Duration },

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// Tile URL could not be parsed
    #[error("Invalid tile URL: {0}")]
    InvalidUrl(String),
}

/// Reasons a tile job ends in the failed state.
///
/// Never propagated to the loader; delivered to the listener only.
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// Fetch failed
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Payload is not a decodable image
    #[error("Failed to decode tile image: {0}")]
    Decode(String),

    /// The job panicked before reaching a result
    #[error("Tile job panicked")]
    Panicked,
}

/// Illegal job state transitions requested by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// Jobs are single-use; create a fresh job to retry
    #[error("Job for tile {key} was already submitted")]
    AlreadySubmitted { key: String },
}
