//! Loader end-to-end tests.
//!
//! Tests verify:
//! - Cache miss, fetch, then cache hit with no further network traffic
//! - Failures and timeouts end as failed tiles, never as loader errors
//! - Server expiry is honored on later requests
//! - Cache invalidation by source

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue};
use tile_loader::error::{FetchError, TileError};
use tile_loader::{
    AlwaysFresh, CacheStore, ChannelListener, HonorExpiry, JobState, LoadOutcome,
    MemoryCacheStore, SubmitOutcome, TileLoader,
};

use super::test_utils::{collect_events, png_tile, source, tile, wait_until, MockFetcher};

// =============================================================================
// Cache Round Trip
// =============================================================================

#[tokio::test]
async fn test_second_request_is_served_from_cache() {
    let fetcher = Arc::new(MockFetcher::new());
    let cache = Arc::new(MemoryCacheStore::new());
    let (listener, mut events) = ChannelListener::new();
    let loader = TileLoader::builder()
        .cache(cache.clone())
        .fetcher(fetcher.clone())
        .listener(Arc::new(listener))
        .build()
        .unwrap();

    let osm = source("osm", "tile.test");

    loader.load_tile(tile(&osm, 10, 511, 340), false).unwrap();
    let first = collect_events(&mut events, 1).await;
    assert!(matches!(
        first[0].outcome,
        LoadOutcome::Loaded { from_cache: false }
    ));

    let again = tile(&osm, 10, 511, 340);
    loader.load_tile(again.clone(), false).unwrap();
    let second = collect_events(&mut events, 1).await;
    assert!(matches!(
        second[0].outcome,
        LoadOutcome::Loaded { from_cache: true }
    ));

    assert_eq!(fetcher.request_count(), 1);
    assert_eq!(fetcher.requests(), vec!["http://tile.test/10/511/340.png"]);
    assert_eq!(again.image().unwrap().data, png_tile(8, 8));

    let stats = loader.stats().await;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entries, 1);
}

#[tokio::test]
async fn test_expired_entry_is_refetched() {
    let fetcher = Arc::new(MockFetcher::new().with_expired_responses());
    let (listener, mut events) = ChannelListener::new();
    let loader = TileLoader::builder()
        .cache(Arc::new(MemoryCacheStore::new()))
        .fetcher(fetcher.clone())
        .listener(Arc::new(listener))
        .freshness(Arc::new(HonorExpiry::default()))
        .build()
        .unwrap();

    let osm = source("osm", "tile.test");
    for _ in 0..2 {
        loader.load_tile(tile(&osm, 3, 1, 1), false).unwrap();
        let event = collect_events(&mut events, 1).await;
        assert!(matches!(
            event[0].outcome,
            LoadOutcome::Loaded { from_cache: false }
        ));
    }

    assert_eq!(fetcher.request_count(), 2);
}

#[tokio::test]
async fn test_unexpired_entry_is_served() {
    let fetcher = Arc::new(MockFetcher::new().with_expires_in(Duration::from_secs(3600)));
    let (listener, mut events) = ChannelListener::new();
    let loader = TileLoader::builder()
        .cache(Arc::new(MemoryCacheStore::new()))
        .fetcher(fetcher.clone())
        .listener(Arc::new(listener))
        .build()
        .unwrap();

    let osm = source("osm", "tile.test");
    for _ in 0..3 {
        loader.load_tile(tile(&osm, 3, 1, 1), false).unwrap();
        collect_events(&mut events, 1).await;
    }

    assert_eq!(fetcher.request_count(), 1);
}

// =============================================================================
// Claims
// =============================================================================

#[tokio::test]
async fn test_one_fetch_per_tile_while_loading() {
    let fetcher = Arc::new(MockFetcher::new());
    let gate = fetcher.hold("tile.test");
    let (listener, mut events) = ChannelListener::new();
    let loader = TileLoader::builder()
        .cache(Arc::new(MemoryCacheStore::new()))
        .fetcher(fetcher.clone())
        .listener(Arc::new(listener))
        .build()
        .unwrap();

    let osm = source("osm", "tile.test");
    let shared = tile(&osm, 7, 3, 3);

    assert_eq!(
        loader.load_tile(shared.clone(), false).unwrap(),
        SubmitOutcome::Dispatched
    );
    for _ in 0..3 {
        assert_eq!(
            loader.load_tile(shared.clone(), false).unwrap(),
            SubmitOutcome::AlreadyLoading
        );
    }

    gate.add_permits(1);
    collect_events(&mut events, 1).await;

    assert_eq!(fetcher.request_count(), 1);
    assert!(shared.is_loaded());
    assert!(!shared.is_loading());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_claim_once() {
    let fetcher = Arc::new(MockFetcher::new().with_delay(Duration::from_millis(20)));
    let loader = Arc::new(
        TileLoader::builder()
            .cache(Arc::new(MemoryCacheStore::new()))
            .fetcher(fetcher.clone())
            .build()
            .unwrap(),
    );

    let osm = source("osm", "tile.test");
    let shared = tile(&osm, 1, 1, 1);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let loader = Arc::clone(&loader);
        let shared = Arc::clone(&shared);
        handles.push(tokio::spawn(async move {
            loader.load_tile(shared, false).unwrap()
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() != SubmitOutcome::AlreadyLoading {
            admitted += 1;
        }
    }

    wait_until(|| !loader.has_outstanding_tasks()).await;
    assert!(admitted >= 1);
    // Later admitted jobs, if any, are served from the cache
    assert_eq!(fetcher.request_count(), 1);
    assert!(fetcher.peak_total() <= 1);
    assert!(shared.is_loaded());
}

#[tokio::test]
async fn test_job_cannot_be_resubmitted() {
    let loader = TileLoader::builder()
        .cache(Arc::new(MemoryCacheStore::new()))
        .fetcher(Arc::new(MockFetcher::new()))
        .build()
        .unwrap();

    let job = loader.create_job(tile(&source("osm", "tile.test"), 0, 0, 0));
    assert_eq!(job.state(), JobState::Created);

    job.submit(false).unwrap();
    assert!(job.submit(true).is_err());

    wait_until(|| job.state().is_terminal()).await;
    assert_eq!(job.state(), JobState::Completed);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_failed_fetch_is_reported_to_listener_only() {
    let fetcher = Arc::new(MockFetcher::new());
    fetcher.fail_host("down.test");
    let cache = Arc::new(MemoryCacheStore::new());
    let (listener, mut events) = ChannelListener::new();
    let loader = TileLoader::builder()
        .cache(cache.clone())
        .fetcher(fetcher.clone())
        .listener(Arc::new(listener))
        .build()
        .unwrap();

    let down = tile(&source("down", "down.test"), 2, 1, 1);
    let up = tile(&source("up", "up.test"), 2, 1, 1);

    // Submission succeeds; the failure only shows up in the outcome
    loader.load_tile(down.clone(), false).unwrap();
    loader.load_tile(up.clone(), false).unwrap();

    let outcomes = collect_events(&mut events, 2).await;
    let failed = outcomes
        .iter()
        .find(|e| e.key.source.as_ref() == "down")
        .unwrap();
    assert!(matches!(
        failed.outcome,
        LoadOutcome::Failed(TileError::Fetch(FetchError::Status { status: 503, .. }))
    ));

    assert!(down.has_error());
    assert!(!down.is_loading());
    assert!(down.error_message().unwrap().contains("503"));
    assert!(up.is_loaded());
    assert!(!cache.contains("down:2/1/1").await);
    assert!(cache.contains("up:2/1/1").await);
}

#[tokio::test]
async fn test_slow_fetch_times_out() {
    let fetcher = Arc::new(MockFetcher::new().with_delay(Duration::from_secs(5)));
    let (listener, mut events) = ChannelListener::new();
    let loader = TileLoader::builder()
        .cache(Arc::new(MemoryCacheStore::new()))
        .fetcher(fetcher.clone())
        .listener(Arc::new(listener))
        .connect_timeout(Duration::from_millis(20))
        .read_timeout(Duration::from_millis(30))
        .build()
        .unwrap();

    let slow = tile(&source("slow", "slow.test"), 1, 0, 0);
    loader.load_tile(slow.clone(), false).unwrap();

    let event = collect_events(&mut events, 1).await;
    match &event[0].outcome {
        LoadOutcome::Failed(TileError::Fetch(FetchError::Timeout { elapsed, .. })) => {
            assert_eq!(*elapsed, Duration::from_millis(50));
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(slow.has_error());
    assert_eq!(fetcher.active_for("slow.test"), 0);
}

#[tokio::test]
async fn test_error_flag_cleared_by_successful_retry() {
    let fetcher = Arc::new(MockFetcher::new().with_body(Bytes::from_static(b"oops")));
    let (listener, mut events) = ChannelListener::new();
    let loader = TileLoader::builder()
        .cache(Arc::new(MemoryCacheStore::new()))
        .fetcher(fetcher)
        .listener(Arc::new(listener))
        .build()
        .unwrap();

    let osm = source("osm", "tile.test");
    let t = tile(&osm, 1, 0, 0);
    loader.load_tile(t.clone(), false).unwrap();
    let event = collect_events(&mut events, 1).await;
    assert!(matches!(
        event[0].outcome,
        LoadOutcome::Failed(TileError::Decode(_))
    ));
    assert!(t.has_error());

    // Seed the cache with a valid payload and retry with a fresh job
    loader
        .cache()
        .put(
            "osm:1/0/0",
            tile_loader::CacheEntry::new(png_tile(4, 4)),
        )
        .await;
    loader.load_tile(t.clone(), false).unwrap();
    let event = collect_events(&mut events, 1).await;
    assert!(matches!(
        event[0].outcome,
        LoadOutcome::Loaded { from_cache: true }
    ));
    assert!(t.is_loaded());
    assert!(!t.has_error());
}

// =============================================================================
// Request Settings
// =============================================================================

#[tokio::test]
async fn test_network_settings_are_bound_to_loader() {
    let mut headers = HeaderMap::new();
    headers.insert("x-api-key", HeaderValue::from_static("secret"));

    let loader = TileLoader::builder()
        .cache(Arc::new(MemoryCacheStore::new()))
        .fetcher(Arc::new(MockFetcher::new()))
        .connect_timeout(Duration::from_secs(2))
        .read_timeout(Duration::from_secs(3))
        .headers(headers)
        .build()
        .unwrap();

    let settings = loader.network_settings();
    assert_eq!(settings.connect_timeout, Duration::from_secs(2));
    assert_eq!(settings.read_timeout, Duration::from_secs(3));
    assert_eq!(settings.headers["x-api-key"], "secret");
}

// =============================================================================
// Cache Invalidation
// =============================================================================

#[tokio::test]
async fn test_clear_cache_removes_exactly_one_source() {
    let fetcher = Arc::new(MockFetcher::new());
    let cache = Arc::new(MemoryCacheStore::new());
    let (listener, mut events) = ChannelListener::new();
    let loader = TileLoader::builder()
        .cache(cache.clone())
        .fetcher(fetcher.clone())
        .listener(Arc::new(listener))
        .freshness(Arc::new(AlwaysFresh))
        .build()
        .unwrap();

    let osm = source("osm", "tile.test");
    let osm_de = source("osm-de", "tile.test");
    for x in 0..3 {
        loader.load_tile(tile(&osm, 2, x, 0), false).unwrap();
        loader.load_tile(tile(&osm_de, 2, x, 0), false).unwrap();
    }
    collect_events(&mut events, 6).await;
    assert_eq!(cache.len().await, 6);

    assert_eq!(loader.clear_cache(&*osm).await, 3);
    assert_eq!(cache.len().await, 3);
    for x in 0..3 {
        assert!(!cache.contains(&format!("osm:2/{}/0", x)).await);
        assert!(cache.contains(&format!("osm-de:2/{}/0", x)).await);
    }

    // Cleared tiles are fetched again; the other source still hits
    loader.load_tile(tile(&osm, 2, 0, 0), false).unwrap();
    loader.load_tile(tile(&osm_de, 2, 0, 0), false).unwrap();
    collect_events(&mut events, 2).await;
    assert_eq!(fetcher.request_count(), 7);
}
