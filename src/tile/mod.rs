//! Tiles, tile keys and tile sources.
//!
//! A [`Tile`] is shared between the caller that displays it and the job that
//! loads it. Its `loading`, `loaded` and `error` flags are atomics; `loading`
//! doubles as the exclusive claim a job takes before fetching.
//!
//! # Components
//!
//! - [`Tile`]: One raster tile with its load flags and decoded image
//! - [`TileImage`]: Decoded image metadata plus the encoded payload
//! - [`TileKey`]: Cache key derived from source identity and coordinate
//! - [`TileSource`]: Provider identity and URL builder
//! - [`TemplateTileSource`]: URL template based source

mod key;
mod source;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

pub use key::{TileKey, KEY_SEPARATOR};
pub use source::{TemplateTileSource, TileSource};

/// Decoded tile image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileImage {
    /// Encoded payload as fetched or cached
    pub data: Bytes,

    /// Image width in pixels
    pub width: u32,

    /// Image height in pixels
    pub height: u32,

    /// MIME type reported by the server, if any
    pub content_type: Option<String>,
}

/// One map tile addressed by zoom/x/y within a source.
pub struct Tile {
    source: Arc<dyn TileSource>,
    zoom: u32,
    x: u32,
    y: u32,
    loading: AtomicBool,
    loaded: AtomicBool,
    error: AtomicBool,
    image: RwLock<Option<TileImage>>,
    error_message: RwLock<Option<String>>,
}

impl Tile {
    /// Create a new, unloaded tile.
    pub fn new(source: Arc<dyn TileSource>, zoom: u32, x: u32, y: u32) -> Self {
        Self {
            source,
            zoom,
            x,
            y,
            loading: AtomicBool::new(false),
            loaded: AtomicBool::new(false),
            error: AtomicBool::new(false),
            image: RwLock::new(None),
            error_message: RwLock::new(None),
        }
    }

    pub fn source(&self) -> &Arc<dyn TileSource> {
        &self.source
    }

    pub fn zoom(&self) -> u32 {
        self.zoom
    }

    pub fn x(&self) -> u32 {
        self.x
    }

    pub fn y(&self) -> u32 {
        self.y
    }

    /// Cache key of this tile.
    pub fn key(&self) -> TileKey {
        TileKey::new(self.source.name(), self.zoom, self.x, self.y)
    }

    /// Remote URL of this tile.
    pub fn url(&self) -> String {
        self.source.tile_url(self.zoom, self.x, self.y)
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn has_error(&self) -> bool {
        self.error.load(Ordering::Acquire)
    }

    /// Decoded image, once loaded.
    pub fn image(&self) -> Option<TileImage> {
        self.image.read().clone()
    }

    /// Message of the last failure, if any.
    pub fn error_message(&self) -> Option<String> {
        self.error_message.read().clone()
    }

    /// Atomically claim the tile for loading.
    ///
    /// Returns `false` if another job already holds the claim.
    pub fn try_claim(&self) -> bool {
        self.loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Drop the claim without touching `loaded` or `error`.
    pub fn release(&self) {
        self.loading.store(false, Ordering::Release);
    }

    /// Store the image and mark the tile loaded, releasing the claim.
    pub fn finish_loading(&self, image: TileImage) {
        *self.image.write() = Some(image);
        *self.error_message.write() = None;
        self.error.store(false, Ordering::Release);
        self.loaded.store(true, Ordering::Release);
        self.loading.store(false, Ordering::Release);
    }

    /// Mark the tile failed, releasing the claim.
    pub fn fail(&self, message: impl Into<String>) {
        *self.error_message.write() = Some(message.into());
        self.error.store(true, Ordering::Release);
        self.loading.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for Tile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tile")
            .field("key", &self.key().to_string())
            .field("loading", &self.is_loading())
            .field("loaded", &self.is_loaded())
            .field("error", &self.has_error())
            .finish()
    }
}
