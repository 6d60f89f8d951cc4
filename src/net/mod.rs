//! Network layer: the opaque tile fetch.

mod client;

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;

use crate::error::FetchError;

pub use client::HttpFetcher;

/// Default connect timeout: 15 seconds
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default read timeout: 30 seconds
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// One tile request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub headers: HeaderMap,

    /// Limit on establishing the connection
    pub connect_timeout: Duration,

    /// Limit on each read once connected; resets after every read
    pub read_timeout: Duration,
}

impl FetchRequest {
    /// Create a request with default timeouts and no extra headers.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HeaderMap::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Upper bound for the whole exchange.
    pub fn deadline(&self) -> Duration {
        self.connect_timeout + self.read_timeout
    }
}

/// Payload and metadata of a successful fetch.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub data: Bytes,
    pub content_type: Option<String>,

    /// Expiry derived from the response's caching headers
    pub expires_at: Option<SystemTime>,
}

impl FetchResponse {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            content_type: None,
            expires_at: None,
        }
    }
}

/// Performs the single request/response exchange for a tile.
///
/// Implementations must be thread-safe; one fetcher is shared by every job of
/// a loader.
#[async_trait]
pub trait TileFetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// Derive the host key used for per-host admission from a tile URL.
///
/// Unparseable URLs, or URLs without a host, share the empty host key.
pub fn host_key(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.host_str().map(|h| match u.port() {
                Some(port) => format!("{}:{}", h, port),
                None => h.to_string(),
            })
        })
        .unwrap_or_default()
}
