use tokio::sync::mpsc;
use tracing::trace;

use crate::error::TileError;
use crate::tile::{Tile, TileKey};

/// How a tile job ended.
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    /// Tile populated, either from the cache or from the network
    Loaded { from_cache: bool },

    /// Fetch or decode failed; the tile's error flag is set
    Failed(TileError),

    /// Job was removed before it started; the tile's claim was released
    Cancelled,
}

impl LoadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, LoadOutcome::Loaded { .. })
    }
}

/// Receives the terminal outcome of every tile job.
///
/// Called on a download worker; implementations should return quickly. A
/// panic is caught and logged by the job and does not affect its outcome.
pub trait TileLoaderListener: Send + Sync {
    fn tile_loading_finished(&self, tile: &Tile, outcome: &LoadOutcome);
}

/// Listener that ignores every outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl TileLoaderListener for NoopListener {
    fn tile_loading_finished(&self, _tile: &Tile, _outcome: &LoadOutcome) {}
}

/// A finished job as delivered by [`ChannelListener`].
#[derive(Debug, Clone)]
pub struct LoadEvent {
    pub key: TileKey,
    pub outcome: LoadOutcome,
}

/// Listener forwarding outcomes into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    sender: mpsc::UnboundedSender<LoadEvent>,
}

impl ChannelListener {
    /// Create the listener and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LoadEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl TileLoaderListener for ChannelListener {
    fn tile_loading_finished(&self, tile: &Tile, outcome: &LoadOutcome) {
        let event = LoadEvent {
            key: tile.key(),
            outcome: outcome.clone(),
        };
        if self.sender.send(event).is_err() {
            trace!(tile = %tile.key(), "load event dropped, receiver closed");
        }
    }
}
