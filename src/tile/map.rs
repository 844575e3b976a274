//! Arbitrary-extent map requests: [`Map`] and [`FeatureInfo`] (§3).

use super::GridLink;
use crate::config::Tileset;
use crate::dimension::RequestedDimension;
use crate::grid::Extent;
use crate::image::RawImage;
use std::sync::Arc;

/// An arbitrary `(tileset, grid_link, extent, width, height, dimensions)`
/// request — full-image WMS, feature-info, and the input to a source
/// render call.
#[derive(Clone)]
pub struct Map {
    pub tileset: Arc<Tileset>,
    pub grid_link: Arc<GridLink>,
    pub extent: Extent,
    pub width: u32,
    pub height: u32,
    pub dimensions: Vec<RequestedDimension>,
    pub raw_image: Option<RawImage>,
    pub encoded_data: Option<bytes::Bytes>,
}

impl Map {
    pub fn new(tileset: Arc<Tileset>, grid_link: Arc<GridLink>, extent: Extent, width: u32, height: u32) -> Self {
        Self {
            tileset,
            grid_link,
            extent,
            width,
            height,
            dimensions: Vec::new(),
            raw_image: None,
            encoded_data: None,
        }
    }

    pub fn resolution(&self) -> f64 {
        crate::grid::Grid::resolution_for(&self.extent, self.width, self.height)
    }
}

/// A [`Map`] plus the pixel coordinates a `GetFeatureInfo` request wants
/// decoded, and the requested info format.
#[derive(Clone)]
pub struct FeatureInfo {
    pub map: Map,
    pub i: u32,
    pub j: u32,
    pub info_format: String,
}
