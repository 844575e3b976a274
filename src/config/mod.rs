//! Configuration arena: typed registries for grids, caches, sources,
//! formats, and the resolved [`Tileset`] values that reference them (§3,
//! §4.8). Grounded on `original_source/lib/configuration_xml.c` and
//! `lib/tileset.c`'s `_configuration_check`/resolution passes: every
//! `<cache>`/`<source>`/`<grid>`/`<format>` is parsed into a name-keyed
//! map, then each `<tileset>` resolves its references against those maps
//! at load time — no lookups remain at request time.

pub mod xml;

pub use xml::ConfigLoadError;

use crate::cache::TileCache;
use crate::dimension::Dimension;
use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::image::TileFormat;
use crate::source::Source;
use crate::tile::GridLink;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// How a tileset merges multiple sub-dimension tiles into one response
/// (§3 "Tileset", §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DimensionAssembly {
    #[default]
    None,
    Stack,
    Animate,
}

/// Top-level `<mapcache mode="…">` dispatch (§6). `Normal` is the only mode
/// this crate's single-process server actually varies behavior on; the
/// mirror modes are parsed and stored for configuration fidelity but do not
/// change request handling here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Normal,
    CombinedMirror,
    SplitMirror,
}

/// A named logical layer: resolved references to its cache, optional
/// source, grid-links, format, and dimensions (§3 "Tileset"). Everything
/// here is immutable after configuration load.
pub struct Tileset {
    pub name: String,
    pub cache: Option<Arc<dyn TileCache>>,
    pub source: Option<Arc<dyn Source>>,
    pub grid_links: Vec<Arc<GridLink>>,
    pub format: Arc<dyn TileFormat>,
    pub metasize: (u32, u32),
    pub metabuffer: u32,
    pub expires: i64,
    pub auto_expire: i64,
    pub read_only: bool,
    pub dimensions: Vec<Arc<dyn Dimension>>,
    pub dimension_assembly: DimensionAssembly,
    pub store_dimension_assemblies: bool,
    pub subdimension_read_only: bool,
    pub watermark: Option<crate::image::RawImage>,
    /// Resampling strategy used when a client's requested resolution
    /// doesn't match the chosen level exactly (§4.5 step 6); ignored when
    /// the scale factor is within 1e-4 of 1, which always uses nearest.
    pub resample_mode: crate::image::ResampleMode,
}

impl Tileset {
    pub fn grid_links(&self) -> &[Arc<GridLink>] {
        &self.grid_links
    }

    /// Builds a minimal tileset for unit tests: the `GoogleMapsCompatible`
    /// grid, no cache/source, PNG format, no dimensions.
    pub fn new_for_test(name: &str, metasize: (u32, u32), metabuffer: u32) -> Self {
        let grid = Arc::new(Grid::google_maps_compatible());
        let extent = grid.extent;
        let grid_link = Arc::new(GridLink::new(grid, extent, 0).expect("built-in grid is well-formed"));
        Self {
            name: name.to_string(),
            cache: None,
            source: None,
            grid_links: vec![grid_link],
            format: Arc::new(crate::image::PngFormat),
            metasize,
            metabuffer,
            expires: 300,
            auto_expire: 0,
            read_only: false,
            dimensions: Vec::new(),
            dimension_assembly: DimensionAssembly::None,
            store_dimension_assemblies: false,
            subdimension_read_only: false,
            watermark: None,
            resample_mode: crate::image::ResampleMode::Bilinear,
        }
    }
}

/// The resolved configuration arena: every `<cache>`/`<source>`/`<grid>`/
/// `<format>`/`<tileset>` by name, plus the top-level server settings
/// (§4.8, §6).
pub struct Config {
    pub mode: Mode,
    pub lock_dir: PathBuf,
    pub lock_retry: Duration,
    pub lock_timeout: Duration,
    pub threaded_fetching: bool,
    pub services: HashMap<String, bool>,
    grids: HashMap<String, Arc<Grid>>,
    tilesets: HashMap<String, Arc<Tileset>>,
    source_path: Option<PathBuf>,
}

impl Config {
    pub fn empty() -> Self {
        Self {
            mode: Mode::Normal,
            lock_dir: PathBuf::from("/tmp"),
            lock_retry: Duration::from_millis(100),
            lock_timeout: Duration::from_secs(crate::DEFAULT_LOCK_TIMEOUT),
            threaded_fetching: true,
            services: HashMap::new(),
            grids: HashMap::new(),
            tilesets: HashMap::new(),
            source_path: None,
        }
    }

    /// Load and validate a `<mapcache>` XML document from disk (§4.8).
    pub async fn load_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let text = tokio::fs::read_to_string(&path).await?;
        let mut config = xml::parse_and_resolve(&text).await?;
        config.source_path = Some(path);
        Ok(config)
    }

    pub fn source_path(&self) -> Option<&PathBuf> {
        self.source_path.as_ref()
    }

    pub fn tileset(&self, name: &str) -> Result<Arc<Tileset>> {
        self.tilesets
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("unknown tileset '{name}'")))
    }

    pub fn grid(&self, name: &str) -> Result<Arc<Grid>> {
        self.grids
            .get(name)
            .cloned()
            .ok_or_else(|| Error::config(format!("unknown grid '{name}'")))
    }

    pub fn tilesets(&self) -> impl Iterator<Item = &Arc<Tileset>> {
        self.tilesets.values()
    }

    pub fn service_enabled(&self, name: &str) -> bool {
        self.services.get(name).copied().unwrap_or(false)
    }

    pub(crate) fn insert_grid(&mut self, name: String, grid: Arc<Grid>) {
        self.grids.insert(name, grid);
    }

    pub(crate) fn insert_tileset(&mut self, name: String, tileset: Arc<Tileset>) {
        self.tilesets.insert(name, tileset);
    }

    pub(crate) fn grids(&self) -> &HashMap<String, Arc<Grid>> {
        &self.grids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_for_test_has_one_grid_link() {
        let ts = Tileset::new_for_test("osm", (2, 2), 1);
        assert_eq!(ts.grid_links().len(), 1);
        assert_eq!(ts.metasize, (2, 2));
    }

    #[test]
    fn tileset_lookup_reports_unknown_reference() {
        let config = Config::empty();
        let err = config.tileset("missing").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
