use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONTENT_TYPE};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::{
    FetchRequest, FetchResponse, TileFetcher, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT,
};
use crate::error::{ConfigError, FetchError};

/// Default User-Agent string for tile requests.
/// Several public tile servers reject requests without one.
const DEFAULT_USER_AGENT: &str = concat!("tile-loader/", env!("CARGO_PKG_VERSION"));

type Timeouts = (Duration, Duration);

/// HTTP tile fetcher backed by reqwest.
///
/// reqwest fixes connect and read timeouts per client, so one client is kept
/// per `(connect, read)` pair seen in requests. A loader uses a single pair,
/// so in practice this is one pooled client. `connect_timeout` bounds the
/// connection setup, `read_timeout` bounds each read, and the request as a
/// whole is capped at their sum.
#[derive(Clone)]
pub struct HttpFetcher {
    clients: Arc<Mutex<HashMap<Timeouts, reqwest::Client>>>,
}

impl HttpFetcher {
    /// Create a fetcher with the default timeouts (15s connect, 30s read).
    pub fn new() -> Result<Self, ConfigError> {
        Self::with_timeouts(DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
    }

    /// Create a fetcher whose first client is built for the given timeouts.
    ///
    /// Building it up front surfaces TLS or resolver setup failures at
    /// construction instead of on the first fetch.
    pub fn with_timeouts(
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let timeouts = (connect_timeout, read_timeout);
        let client = build_client(timeouts).map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            clients: Arc::new(Mutex::new(HashMap::from([(timeouts, client)]))),
        })
    }

    fn client_for(&self, request: &FetchRequest) -> Result<reqwest::Client, FetchError> {
        let timeouts = (request.connect_timeout, request.read_timeout);
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(&timeouts) {
            return Ok(client.clone());
        }

        debug!(?timeouts, "building HTTP client for new timeouts");
        let client = build_client(timeouts).map_err(|e| FetchError::Connection(e.to_string()))?;
        clients.insert(timeouts, client.clone());
        Ok(client)
    }

    #[cfg(test)]
    fn client_count(&self) -> usize {
        self.clients.lock().len()
    }
}

fn build_client((connect_timeout, read_timeout): Timeouts) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .read_timeout(read_timeout)
        .user_agent(DEFAULT_USER_AGENT)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_nodelay(true)
        .build()
}

#[async_trait]
impl TileFetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        trace!(url = %request.url, "HTTP GET request starting");

        let response = self
            .client_for(request)?
            .get(&request.url)
            .headers(request.headers.clone())
            .timeout(request.deadline())
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, request))?;

        let status = response.status();
        debug!(url = %request.url, status = status.as_u16(), "HTTP response received");

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: request.url.clone(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let expires_at = response
            .headers()
            .get(CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| expiry_from_cache_control(v, SystemTime::now()));

        let data: Bytes = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(e, request))?;

        Ok(FetchResponse {
            data,
            content_type,
            expires_at,
        })
    }
}

fn map_reqwest_error(e: reqwest::Error, request: &FetchRequest) -> FetchError {
    warn!(
        url = %request.url,
        error = %e,
        is_connect = e.is_connect(),
        is_timeout = e.is_timeout(),
        "HTTP request failed"
    );

    if e.is_timeout() {
        FetchError::Timeout {
            url: request.url.clone(),
            elapsed: request.deadline(),
        }
    } else if e.is_builder() {
        FetchError::InvalidUrl(request.url.clone())
    } else {
        FetchError::Connection(e.to_string())
    }
}

/// Turn a `Cache-Control` header into an absolute expiry.
///
/// `no-cache` and `no-store` expire immediately; `max-age=N` expires N
/// seconds from `now`. Anything else yields no hint.
fn expiry_from_cache_control(value: &str, now: SystemTime) -> Option<SystemTime> {
    let mut expiry = None;
    for directive in value.split(',').map(str::trim) {
        let lower = directive.to_ascii_lowercase();
        if lower == "no-cache" || lower == "no-store" {
            return Some(now);
        }
        if let Some(secs) = lower.strip_prefix("max-age=") {
            if let Ok(secs) = secs.trim_matches('"').parse::<u64>() {
                expiry = Some(now + Duration::from_secs(secs));
            }
        }
    }
    expiry
}
