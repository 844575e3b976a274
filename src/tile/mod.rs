//! Addressable units: [`Tile`], [`MetaTile`], [`Map`], [`FeatureInfo`],
//! [`GridLink`], [`Rule`] (§3). Grounded on `original_source/lib/tileset.c`
//! struct usage.

pub mod map;
pub mod metatile;

pub use map::{FeatureInfo, Map};
pub use metatile::MetaTile;

use crate::config::Tileset;
use crate::dimension::RequestedDimension;
use crate::grid::{Extent, ExtentI, Grid};
use crate::image::RawImage;
use std::sync::Arc;

/// Out-of-zoom behavior once a request exceeds a grid-link's
/// `max_cached_zoom` (§3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutOfZoomStrategy {
    NotConfigured,
    Reassemble,
    Proxy,
}

/// A single `(grid-link, zoom-level)` override: visible tile-extent boxes,
/// a hidden-tile fill color, and a readonly flag (§3 "Rule").
#[derive(Debug, Clone)]
pub struct Rule {
    pub visible_extents: Vec<ExtentI>,
    pub hidden_color: [u8; 4],
    pub readonly: bool,
}

impl Rule {
    /// `true` if `(x, y)` falls outside every visible extent (vacuously
    /// true when there are none), meaning the tile must be served as the
    /// hidden-color fill without a cache read.
    pub fn is_hidden(&self, x: i64, y: i64) -> bool {
        !self.visible_extents.iter().any(|e| e.contains(x, y))
    }
}

/// An intermediate grid used only for WMS-level selection, with its own
/// resolution ladder but no independent cache identity.
#[derive(Debug, Clone)]
pub struct IntermediateGrid {
    pub grid: Arc<Grid>,
}

/// A tileset's use of one grid: restricted extent, precomputed per-level
/// limits, the active zoom window, out-of-zoom handling, intermediate
/// grids for WMS level selection, and per-level rules (§3 "GridLink").
#[derive(Debug, Clone)]
pub struct GridLink {
    pub grid: Arc<Grid>,
    pub restricted_extent: Extent,
    pub limits: Vec<ExtentI>,
    pub min_z: u16,
    pub max_z: u16,
    pub max_cached_zoom: Option<u16>,
    pub out_of_zoom_strategy: OutOfZoomStrategy,
    pub intermediate_grids: Vec<IntermediateGrid>,
    pub rules: std::collections::HashMap<u16, Rule>,
}

impl GridLink {
    pub fn new(grid: Arc<Grid>, restricted_extent: Extent, tolerance: i64) -> crate::error::Result<Self> {
        let limits = grid.compute_limits(&restricted_extent, tolerance)?;
        let max_z = grid.levels.len() as u16;
        Ok(Self {
            grid,
            restricted_extent,
            limits,
            min_z: 0,
            max_z,
            max_cached_zoom: None,
            out_of_zoom_strategy: OutOfZoomStrategy::NotConfigured,
            intermediate_grids: Vec::new(),
            rules: std::collections::HashMap::new(),
        })
    }

    pub fn limits_at(&self, z: u16) -> Option<&ExtentI> {
        self.limits.get(z as usize)
    }

    /// `true` if `(x, y, z)` is within the active zoom window and the
    /// precomputed limits for that level.
    pub fn is_valid(&self, x: i64, y: i64, z: u16) -> bool {
        if z < self.min_z || z >= self.max_z {
            return false;
        }
        match self.limits_at(z) {
            Some(limit) => limit.contains(x, y),
            None => false,
        }
    }

    pub fn rule_at(&self, z: u16) -> Option<&Rule> {
        self.rules.get(&z)
    }

    /// Whether `z` is above this link's configured out-of-zoom ceiling.
    pub fn is_out_of_zoom(&self, z: u16) -> bool {
        matches!(
            self.out_of_zoom_strategy,
            OutOfZoomStrategy::Reassemble | OutOfZoomStrategy::Proxy
        ) && self.max_cached_zoom.map(|m| z > m).unwrap_or(false)
    }
}

/// A `(tileset, grid_link, z, x, y, dimensions[])`-addressed tile.
/// Short-lived and request-scoped; carries both pixel and encoded forms so
/// a consumer that never needs pixels can forward the encoded bytes
/// untouched ("lazy decode", §9).
#[derive(Clone)]
pub struct Tile {
    pub tileset: Arc<Tileset>,
    pub grid_link: Arc<GridLink>,
    pub z: u16,
    pub x: i64,
    pub y: i64,
    pub dimensions: Vec<RequestedDimension>,
    pub raw_image: Option<RawImage>,
    pub encoded_data: Option<bytes::Bytes>,
    pub mtime: Option<i64>,
    pub expires: Option<i64>,
    pub nodata: bool,
    pub allow_redirect: bool,
}

impl Tile {
    pub fn new(tileset: Arc<Tileset>, grid_link: Arc<GridLink>, z: u16, x: i64, y: i64) -> Self {
        Self {
            tileset,
            grid_link,
            z,
            x,
            y,
            dimensions: Vec::new(),
            raw_image: None,
            encoded_data: None,
            mtime: None,
            expires: None,
            nodata: false,
            allow_redirect: false,
        }
    }

    pub fn with_dimensions(mut self, dimensions: Vec<RequestedDimension>) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn extent(&self) -> crate::error::Result<Extent> {
        self.grid_link.grid.tile_extent(self.x, self.y, self.z)
    }

    pub fn is_valid(&self) -> bool {
        self.grid_link.is_valid(self.x, self.y, self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::ExtentI;

    fn limit(min_x: i64, min_y: i64, max_x: i64, max_y: i64) -> ExtentI {
        ExtentI { min_x, min_y, max_x, max_y }
    }

    #[test]
    fn rule_hidden_when_outside_visible_extents() {
        let rule = Rule { visible_extents: vec![limit(0, 0, 5, 5)], hidden_color: [255, 0, 0, 255], readonly: false };
        assert!(!rule.is_hidden(2, 2));
        assert!(rule.is_hidden(10, 10));
    }

    #[test]
    fn rule_with_no_visible_extents_hides_everything() {
        let rule = Rule { visible_extents: vec![], hidden_color: [255, 0, 0, 255], readonly: false };
        assert!(rule.is_hidden(100, 100));
    }
}
