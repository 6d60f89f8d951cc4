//! Tile Loader - fetch a range of map tiles through the cached download pool.
//!
//! This binary loads every tile of a zoom/x/y range, optionally several times
//! to exercise the cache, then prints cache statistics.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tile_loader::{
    CacheStats, ChannelListener, Config, FreshnessPolicy, HonorExpiry, HttpFetcher, LoadEvent,
    LoadOutcome, MaxAge, MemoryCacheStore, SubmitOutcome, TemplateTileSource, Tile, TileLoader,
    TileSource,
};

/// Totals for one pass over the tile range.
#[derive(Debug, Default, Clone, serde::Serialize)]
struct PassSummary {
    pass: u32,
    fetched: usize,
    cached: usize,
    failed: usize,
    cancelled: usize,
    skipped: usize,

    /// Cut short by Ctrl-C; counts cover only outcomes seen so far
    interrupted: bool,
}

impl PassSummary {
    fn new(pass: u32) -> Self {
        Self {
            pass,
            ..Default::default()
        }
    }

    fn record(&mut self, outcome: &LoadOutcome) {
        match outcome {
            LoadOutcome::Loaded { from_cache: true } => self.cached += 1,
            LoadOutcome::Loaded { from_cache: false } => self.fetched += 1,
            LoadOutcome::Failed(_) => self.failed += 1,
            LoadOutcome::Cancelled => self.cancelled += 1,
        }
    }

    /// Close out a pass stopped by Ctrl-C, keeping the counts seen so far.
    fn interrupt(&mut self, cancelled: usize) {
        self.cancelled += cancelled;
        self.interrupted = true;
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Configuration:");
    info!("  Source: {} ({})", config.source_name, config.url_template);
    info!(
        "  Range: z={} x={}..={} y={}..={} ({} tiles)",
        config.zoom,
        config.min_x,
        config.max_x,
        config.min_y,
        config.max_y,
        config.tile_count()
    );
    info!(
        "  Limits: {} per host, {} total",
        config.host_limit, config.worker_limit
    );
    info!("  Cache: {}MB", config.cache_size / (1024 * 1024));

    let (loader, mut events) = match build_loader(&config) {
        Ok(parts) => parts,
        Err(e) => {
            error!("Failed to create loader: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let source: Arc<dyn TileSource> = Arc::new(TemplateTileSource::new(
        config.source_name.clone(),
        config.url_template.clone(),
    ));

    let mut summaries = Vec::new();
    for pass in 1..=config.passes {
        let mut summary = PassSummary::new(pass);
        let interrupted = tokio::select! {
            _ = run_pass(&loader, &source, &config, &mut events, &mut summary) => false,
            _ = tokio::signal::ctrl_c() => true,
        };

        if interrupted {
            warn!("Interrupted, cancelling queued downloads");
            let cancelled = loader.cancel_outstanding_tasks();
            info!("  {} queued download(s) cancelled", cancelled);
            summary.interrupt(cancelled);
            summaries.push(summary);
            break;
        }

        info!(
            "Pass {}: {} fetched, {} from cache, {} failed, {} skipped",
            summary.pass, summary.fetched, summary.cached, summary.failed, summary.skipped
        );
        summaries.push(summary);
    }

    let stats = loader.stats().await;
    print_report(&config, &summaries, &stats);

    let failed: usize = summaries.iter().map(|s| s.failed).sum();
    if failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "tile_loader=debug"
    } else {
        "tile_loader=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn build_loader(
    config: &Config,
) -> Result<(TileLoader, UnboundedReceiver<LoadEvent>), tile_loader::ConfigError> {
    let freshness: Arc<dyn FreshnessPolicy> = match config.max_age() {
        Some(max_age) => Arc::new(MaxAge(max_age)),
        None => Arc::new(HonorExpiry::default()),
    };
    let (listener, events) = ChannelListener::new();

    let loader = TileLoader::builder()
        .cache(Arc::new(MemoryCacheStore::with_capacity(config.cache_size)))
        .fetcher(Arc::new(HttpFetcher::with_timeouts(
            config.connect_timeout(),
            config.read_timeout(),
        )?))
        .listener(Arc::new(listener))
        .freshness(freshness)
        .connect_timeout(config.connect_timeout())
        .read_timeout(config.read_timeout())
        .headers(config.headers()?)
        .host_limit(config.host_limit)
        .max_workers(config.worker_limit)
        .build()?;

    Ok((loader, events))
}

/// Submit every tile in the range and wait for all outcomes.
///
/// Counts are recorded into `summary` as they arrive, so an interrupted pass
/// keeps what it saw.
async fn run_pass(
    loader: &TileLoader,
    source: &Arc<dyn TileSource>,
    config: &Config,
    events: &mut UnboundedReceiver<LoadEvent>,
    summary: &mut PassSummary,
) {
    let mut pending = 0usize;

    for x in config.min_x..=config.max_x {
        for y in config.min_y..=config.max_y {
            let tile = Arc::new(Tile::new(Arc::clone(source), config.zoom, x, y));
            match loader.load_tile(tile, false) {
                Ok(SubmitOutcome::AlreadyLoading) => summary.skipped += 1,
                Ok(_) => pending += 1,
                Err(e) => {
                    warn!("Failed to submit tile {}/{}/{}: {}", config.zoom, x, y, e);
                    summary.skipped += 1;
                }
            }
        }
    }

    while pending > 0 {
        let Some(event) = events.recv().await else {
            break;
        };
        pending -= 1;

        if let LoadOutcome::Failed(ref e) = event.outcome {
            warn!("  {} failed: {}", event.key, e);
        }
        summary.record(&event.outcome);
    }
}

fn print_report(config: &Config, summaries: &[PassSummary], stats: &CacheStats) {
    if config.json {
        let json = serde_json::json!({
            "source": config.source_name,
            "passes": summaries,
            "cache": stats,
        });
        match serde_json::to_string_pretty(&json) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Failed to serialize report: {}", e),
        }
        return;
    }

    println!();
    println!("Tile Loader Report");
    println!("══════════════════");
    for summary in summaries {
        println!(
            "  pass {}: {} fetched, {} cached, {} failed, {} cancelled, {} skipped{}",
            summary.pass,
            summary.fetched,
            summary.cached,
            summary.failed,
            summary.cancelled,
            summary.skipped,
            if summary.interrupted { " (interrupted)" } else { "" }
        );
    }
    println!();
    println!("  {}", stats);
}
