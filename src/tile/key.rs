//! Cache keys for tiles.
//!
//! A key is the tile source name, a `:` separator, then the coordinate in
//! `zoom/x/y` form. Keys are plain strings in the cache store so that a whole
//! source can be invalidated with a prefix removal.

use std::fmt;
use std::sync::Arc;

/// Separator between the source identity and the coordinate part of a key.
pub const KEY_SEPARATOR: char = ':';

/// Identifies one cached tile artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    /// Tile source name
    pub source: Arc<str>,

    /// Zoom level
    pub zoom: u32,

    /// Tile X coordinate
    pub x: u32,

    /// Tile Y coordinate
    pub y: u32,
}

impl TileKey {
    /// Create a new tile key.
    pub fn new(source: impl Into<Arc<str>>, zoom: u32, x: u32, y: u32) -> Self {
        Self {
            source: source.into(),
            zoom,
            x,
            y,
        }
    }

    /// Prefix shared by every key of the named source.
    ///
    /// Includes the separator, so `"osm"` does not match keys of `"osm-de"`.
    pub fn source_prefix(source: &str) -> String {
        format!("{}{}", source, KEY_SEPARATOR)
    }

    /// The string form used as the cache store key.
    pub fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}/{}/{}",
            self.source, KEY_SEPARATOR, self.zoom, self.x, self.y
        )
    }
}
