//! Test utilities for integration tests.
//!
//! Provides a mock fetcher that records requests and per-host concurrency,
//! image fixtures and small polling helpers.

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::png::PngEncoder;
use image::{ImageEncoder, Rgb, RgbImage};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, Semaphore};

use tile_loader::error::FetchError;
use tile_loader::net::{host_key, FetchRequest, FetchResponse, TileFetcher};
use tile_loader::{LoadEvent, TemplateTileSource, Tile};

// =============================================================================
// Fixtures
// =============================================================================

/// Encode a small solid PNG tile.
pub fn png_tile(width: u32, height: u32) -> Bytes {
    let img = RgbImage::from_pixel(width, height, Rgb([30, 120, 210]));
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .expect("encode png fixture");
    Bytes::from(buf)
}

/// Tile source named `name` served from `http://{host}/`.
pub fn source(name: &str, host: &str) -> Arc<TemplateTileSource> {
    Arc::new(TemplateTileSource::new(
        name,
        format!("http://{}/{{z}}/{{x}}/{{y}}.png", host),
    ))
}

pub fn tile(source: &Arc<TemplateTileSource>, zoom: u32, x: u32, y: u32) -> Arc<Tile> {
    Arc::new(Tile::new(source.clone(), zoom, x, y))
}

// =============================================================================
// Mock Fetcher with Concurrency Tracking
// =============================================================================

#[derive(Default)]
struct Concurrency {
    total: usize,
    peak_total: usize,
    per_host: HashMap<String, (usize, usize)>,
}

/// A mock fetcher that serves PNG tiles and tracks every request.
///
/// Hosts can be held closed with [`MockFetcher::hold`]; their requests then
/// block until permits are released.
pub struct MockFetcher {
    body: Bytes,
    delay: Duration,
    expires_in: Option<Duration>,
    expired: bool,
    failing_hosts: Mutex<HashSet<String>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    requests: Mutex<Vec<String>>,
    request_count: AtomicUsize,
    concurrency: Mutex<Concurrency>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            body: png_tile(8, 8),
            delay: Duration::ZERO,
            expires_in: None,
            expired: false,
            failing_hosts: Mutex::new(HashSet::new()),
            gates: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            request_count: AtomicUsize::new(0),
            concurrency: Mutex::new(Concurrency::default()),
        }
    }

    /// Serve `body` instead of the default PNG.
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Sleep this long inside every fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Report responses that already expired.
    pub fn with_expired_responses(mut self) -> Self {
        self.expired = true;
        self
    }

    /// Report responses expiring after `ttl`.
    pub fn with_expires_in(mut self, ttl: Duration) -> Self {
        self.expires_in = Some(ttl);
        self
    }

    /// Answer every request for `host` with a 503.
    pub fn fail_host(&self, host: &str) {
        self.failing_hosts.lock().insert(host.to_string());
    }

    /// Block requests for `host` until permits are released on the returned
    /// semaphore. Each permit lets exactly one request through.
    pub fn hold(&self, host: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.gates.lock().insert(host.to_string(), Arc::clone(&gate));
        gate
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    /// Requests currently inside `fetch` for `host`.
    pub fn active_for(&self, host: &str) -> usize {
        self.concurrency
            .lock()
            .per_host
            .get(host)
            .map(|c| c.0)
            .unwrap_or(0)
    }

    pub fn peak_for(&self, host: &str) -> usize {
        self.concurrency
            .lock()
            .per_host
            .get(host)
            .map(|c| c.1)
            .unwrap_or(0)
    }

    pub fn peak_total(&self) -> usize {
        self.concurrency.lock().peak_total
    }

    fn enter(&self, host: &str) {
        let mut c = self.concurrency.lock();
        c.total += 1;
        c.peak_total = c.peak_total.max(c.total);
        let entry = c.per_host.entry(host.to_string()).or_default();
        entry.0 += 1;
        entry.1 = entry.1.max(entry.0);
    }

    fn exit(&self, host: &str) {
        let mut c = self.concurrency.lock();
        c.total -= 1;
        if let Some(entry) = c.per_host.get_mut(host) {
            entry.0 -= 1;
        }
    }
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Leaves the concurrency count even when the fetch future is dropped.
struct ActiveGuard<'a> {
    fetcher: &'a MockFetcher,
    host: String,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.fetcher.exit(&self.host);
    }
}

#[async_trait]
impl TileFetcher for MockFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let host = host_key(&request.url);
        self.request_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.url.clone());

        self.enter(&host);
        let _active = ActiveGuard {
            fetcher: self,
            host: host.clone(),
        };

        let gate = self.gates.lock().get(&host).cloned();
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .expect("gate closed")
                .forget();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.failing_hosts.lock().contains(&host) {
            return Err(FetchError::Status {
                status: 503,
                url: request.url.clone(),
            });
        }

        let mut response = FetchResponse::new(self.body.clone());
        response.content_type = Some("image/png".to_string());
        if self.expired {
            response.expires_at = Some(SystemTime::now() - Duration::from_secs(1));
        } else if let Some(ttl) = self.expires_in {
            response.expires_at = Some(SystemTime::now() + ttl);
        }
        Ok(response)
    }
}

// =============================================================================
// Polling Helpers
// =============================================================================

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within 5s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Receive exactly `count` load events.
pub async fn collect_events(
    events: &mut mpsc::UnboundedReceiver<LoadEvent>,
    count: usize,
) -> Vec<LoadEvent> {
    let mut collected = Vec::with_capacity(count);
    while collected.len() < count {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for load events")
            .expect("listener channel closed");
        collected.push(event);
    }
    collected
}
