/// A remote tile provider.
///
/// Implementations supply a stable name (used as the cache key prefix) and
/// build the URL for a tile coordinate.
pub trait TileSource: Send + Sync {
    /// Unique, stable identity of this source.
    fn name(&self) -> &str;

    /// URL of the tile at the given coordinate.
    fn tile_url(&self, zoom: u32, x: u32, y: u32) -> String;
}

/// Tile source driven by a URL template.
///
/// The template may contain `{z}`, `{x}` and `{y}` placeholders, e.g.
/// `https://tile.openstreetmap.org/{z}/{x}/{y}.png`.
#[derive(Debug, Clone)]
pub struct TemplateTileSource {
    name: String,
    template: String,
}

impl TemplateTileSource {
    /// Create a new template source.
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
        }
    }

    /// Get the URL template.
    pub fn template(&self) -> &str {
        &self.template
    }
}

impl TileSource for TemplateTileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn tile_url(&self, zoom: u32, x: u32, y: u32) -> String {
        self.template
            .replace("{z}", &zoom.to_string())
            .replace("{x}", &x.to_string())
            .replace("{y}", &y.to_string())
    }
}
