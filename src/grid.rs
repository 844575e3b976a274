//! Grid pyramid model and tile/extent math (§3, §4.1).
//!
//! Grounded on `original_source/lib/grid.c`: a [`Grid`] is a named pyramid of
//! [`Level`]s in one spatial reference; tile extents are derived purely from
//! the origin, a level's resolution and the grid's tile pixel size, with no
//! floating-point accumulation across levels.

use crate::error::{Error, Result};

/// A floating-point bounding box `(min_x, min_y, max_x, max_y)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn is_empty(&self) -> bool {
        !(self.max_x > self.min_x && self.max_y > self.min_y)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Shrink every side by `fraction` of the extent's own width/height.
    /// Used by out-of-zoom reassembly to dodge boundary rounding (§4.4).
    pub fn shrink(&self, fraction: f64) -> Extent {
        let dx = self.width() * fraction;
        let dy = self.height() * fraction;
        Extent::new(self.min_x + dx, self.min_y + dy, self.max_x - dx, self.max_y - dy)
    }

    pub fn intersects(&self, other: &Extent) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    /// The overlapping region of `self` and `other`, or `None` if disjoint.
    /// Used by out-of-zoom reassembly to find how much of a covering
    /// lower-zoom tile falls within the requested high-zoom tile (§4.4).
    pub fn intersection(&self, other: &Extent) -> Option<Extent> {
        let min_x = self.min_x.max(other.min_x);
        let min_y = self.min_y.max(other.min_y);
        let max_x = self.max_x.min(other.max_x);
        let max_y = self.max_y.min(other.max_y);
        let out = Extent::new(min_x, min_y, max_x, max_y);
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }
}

/// Integer tile-box variant of [`Extent`], used for grid-link limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentI {
    pub min_x: i64,
    pub min_y: i64,
    pub max_x: i64,
    pub max_y: i64,
}

impl ExtentI {
    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.min_x && x < self.max_x && y >= self.min_y && y < self.max_y
    }

    /// Clamp to `[0, max_x) x [0, max_y)`, the level's own tile count.
    pub fn clamp_to_level(&self, level: &Level) -> ExtentI {
        ExtentI {
            min_x: self.min_x.max(0),
            min_y: self.min_y.max(0),
            max_x: self.max_x.min(level.max_x as i64),
            max_y: self.max_y.min(level.max_y as i64),
        }
    }
}

/// Map units a grid's resolutions and extent are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Degrees,
    Meters,
    Feet,
}

/// Pixel origin corner for tile `(0,0)`. Bottom/top-right are reserved in
/// the original and are rejected at construction time here too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    BottomLeft,
    TopLeft,
    BottomRight,
    TopRight,
}

/// One zoom level: a resolution (map units per pixel) and the tile count
/// that fits the grid's full extent at that resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Level {
    pub resolution: f64,
    pub max_x: u32,
    pub max_y: u32,
}

/// A named pyramid of zoom levels in one spatial reference (§3 "Grid").
#[derive(Debug, Clone)]
pub struct Grid {
    pub name: String,
    pub srs: String,
    pub srs_aliases: Vec<String>,
    pub unit: Unit,
    pub extent: Extent,
    pub tile_sx: u32,
    pub tile_sy: u32,
    pub origin: Origin,
    pub levels: Vec<Level>,
}

impl Grid {
    /// Construct a grid, validating the invariants from §3: strictly
    /// decreasing resolution, `max_* >= 1`, non-empty extent.
    pub fn new(
        name: impl Into<String>,
        srs: impl Into<String>,
        unit: Unit,
        extent: Extent,
        tile_sx: u32,
        tile_sy: u32,
        origin: Origin,
        levels: Vec<Level>,
    ) -> Result<Self> {
        if extent.is_empty() {
            return Err(Error::InvalidGrid("grid extent must be non-empty".into()));
        }
        if levels.is_empty() {
            return Err(Error::InvalidGrid("grid must declare at least one level".into()));
        }
        if matches!(origin, Origin::BottomRight | Origin::TopRight) {
            return Err(Error::InvalidGrid(
                "bottom-right and top-right origins are reserved and not implemented".into(),
            ));
        }
        for level in &levels {
            if level.max_x == 0 || level.max_y == 0 {
                return Err(Error::InvalidGrid("level max_x/max_y must be >= 1".into()));
            }
        }
        for pair in levels.windows(2) {
            if !(pair[0].resolution > pair[1].resolution) {
                return Err(Error::InvalidGrid(
                    "level resolutions must strictly decrease".into(),
                ));
            }
        }
        Ok(Self {
            name: name.into(),
            srs: srs.into(),
            srs_aliases: Vec::new(),
            unit,
            extent,
            tile_sx,
            tile_sy,
            origin,
            levels,
        })
    }

    /// The `GoogleMapsCompatible` / EPSG:3857 default grid (§4.1).
    pub fn google_maps_compatible() -> Self {
        let half = 20037508.342789244;
        let base_res = 156543.033928041;
        let levels = (0..20)
            .map(|z| {
                let tiles = 1u32 << z;
                Level { resolution: base_res / (1u64 << z) as f64, max_x: tiles, max_y: tiles }
            })
            .collect();
        Grid::new(
            "GoogleMapsCompatible",
            "EPSG:3857",
            Unit::Meters,
            Extent::new(-half, -half, half, half),
            256,
            256,
            Origin::TopLeft,
            levels,
        )
        .expect("built-in grid is well-formed")
    }

    /// The `WGS84` / EPSG:4326 default grid: 2x1 tiles at level 0 (§4.1).
    pub fn wgs84() -> Self {
        let levels = (0..20)
            .map(|z| {
                let tiles_x = 2u32 << z;
                let tiles_y = 1u32 << z;
                Level { resolution: 0.703125 / (1u64 << z) as f64, max_x: tiles_x, max_y: tiles_y }
            })
            .collect();
        Grid::new(
            "WGS84",
            "EPSG:4326",
            Unit::Degrees,
            Extent::new(-180.0, -90.0, 180.0, 90.0),
            256,
            256,
            Origin::BottomLeft,
            levels,
        )
        .expect("built-in grid is well-formed")
    }

    pub fn level(&self, z: u16) -> Result<&Level> {
        self.levels.get(z as usize).ok_or_else(|| Error::InvalidZoom {
            zoom: z,
            min: 0,
            max: self.levels.len().saturating_sub(1) as u16,
        })
    }

    /// Tile extent at `(x, y, z)`, derived purely from the origin,
    /// resolution, and `tile_s*` — no accumulation across levels (§4.1).
    pub fn tile_extent(&self, x: i64, y: i64, z: u16) -> Result<Extent> {
        let level = self.level(z)?;
        let res = level.resolution;
        let sx = res * self.tile_sx as f64;
        let sy = res * self.tile_sy as f64;
        Ok(match self.origin {
            Origin::BottomLeft => Extent::new(
                self.extent.min_x + sx * x as f64,
                self.extent.min_y + sy * y as f64,
                self.extent.min_x + sx * (x + 1) as f64,
                self.extent.min_y + sy * (y + 1) as f64,
            ),
            Origin::TopLeft => Extent::new(
                self.extent.min_x + sx * x as f64,
                self.extent.max_y - sy * (y + 1) as f64,
                self.extent.min_x + sx * (x + 1) as f64,
                self.extent.max_y - sy * y as f64,
            ),
            Origin::BottomRight | Origin::TopRight => unreachable!("rejected at construction"),
        })
    }

    /// Pick the level whose resolution is closest to `resolution`, within
    /// absolute tolerance `level.resolution / max(tile_sx, tile_sy)` (§4.1).
    pub fn best_level(&self, resolution: f64) -> Result<u16> {
        let mut best: Option<(u16, f64)> = None;
        for (i, level) in self.levels.iter().enumerate() {
            let diff = (level.resolution - resolution).abs();
            if best.map(|(_, d)| diff < d).unwrap_or(true) {
                best = Some((i as u16, diff));
            }
        }
        let (idx, _) = best.ok_or_else(|| Error::InvalidGrid("grid has no levels".into()))?;
        Ok(idx)
    }

    /// Resolution implied by an extent rendered into a `width x height`
    /// pixel image: `max(dx/width, dy/height)` (§4.1).
    pub fn resolution_for(extent: &Extent, width: u32, height: u32) -> f64 {
        (extent.width() / width as f64).max(extent.height() / height as f64)
    }

    /// Reverse of [`Grid::tile_extent`]: map a bbox back onto integer
    /// `(x, y, z)`, or `None` if it is not aligned to a grid cell within
    /// half a pixel (`mapcache_grid_get_cell`).
    pub fn get_cell(&self, bbox: &Extent, width: u32, height: u32) -> Result<Option<(i64, i64, u16)>> {
        let res = Self::resolution_for(bbox, width, height);
        let z = self.best_level(res)?;
        let level = self.level(z)?;
        let res = level.resolution;
        let sx = res * self.tile_sx as f64;
        let sy = res * self.tile_sy as f64;
        let (x, y, ok) = match self.origin {
            Origin::BottomLeft => {
                let x = ((bbox.min_x - self.extent.min_x) / sx + 0.5).floor() as i64;
                let y = ((bbox.min_y - self.extent.min_y) / sy + 0.5).floor() as i64;
                let ok = ((bbox.min_x - (x as f64 * sx) - self.extent.min_x) / res).abs() <= 1.0
                    && ((bbox.min_y - (y as f64 * sy) - self.extent.min_y) / res).abs() <= 1.0;
                (x, y, ok)
            }
            Origin::TopLeft => {
                let x = ((bbox.min_x - self.extent.min_x) / sx + 0.5).floor() as i64;
                let y = ((self.extent.max_y - bbox.max_y) / sy + 0.5).floor() as i64;
                let ok = ((bbox.min_x - (x as f64 * sx) - self.extent.min_x) / res).abs() <= 1.0
                    && ((bbox.max_y - (self.extent.max_y - y as f64 * sy)) / res).abs() <= 1.0;
                (x, y, ok)
            }
            Origin::BottomRight | Origin::TopRight => unreachable!("rejected at construction"),
        };
        if !ok {
            return Ok(None);
        }
        Ok(Some((x, y, z)))
    }

    /// Integer tile limits covering `extent` at `level_index`, with a small
    /// epsilon to dodge rounding-boundary off-by-ones and an integer
    /// `tolerance` that extends limits outward by that many tiles (§4.1).
    /// Finally clamped to `[0, level.max_*]`.
    pub fn compute_limits_at_level(
        &self,
        extent: &Extent,
        level_index: u16,
        tolerance: i64,
    ) -> Result<ExtentI> {
        const EPSILON: f64 = 0.0000001;
        let level = self.level(level_index)?;
        let unit_width = level.resolution * self.tile_sx as f64;
        let unit_height = level.resolution * self.tile_sy as f64;
        let raw = match self.origin {
            Origin::BottomLeft => ExtentI {
                min_x: (((extent.min_x - self.extent.min_x) / unit_width) + EPSILON).floor() as i64
                    - tolerance,
                max_x: (((extent.max_x - self.extent.min_x) / unit_width) - EPSILON).ceil() as i64
                    + tolerance,
                min_y: (((extent.min_y - self.extent.min_y) / unit_height) + EPSILON).floor() as i64
                    - tolerance,
                max_y: (((extent.max_y - self.extent.min_y) / unit_height) - EPSILON).ceil() as i64
                    + tolerance,
            },
            Origin::TopLeft => ExtentI {
                min_x: (((extent.min_x - self.extent.min_x) / unit_width) + EPSILON).floor() as i64
                    - tolerance,
                max_x: (((extent.max_x - self.extent.min_x) / unit_width) - EPSILON).ceil() as i64
                    + tolerance,
                min_y: (((self.extent.max_y - extent.max_y) / unit_height) + EPSILON).floor() as i64
                    - tolerance,
                max_y: (((self.extent.max_y - extent.min_y) / unit_height) - EPSILON).ceil() as i64
                    + tolerance,
            },
            Origin::BottomRight | Origin::TopRight => unreachable!("rejected at construction"),
        };
        Ok(raw.clamp_to_level(level))
    }

    /// The tile `(x, y)` containing point `(px, py)` at level `z` — the
    /// inverse of [`Grid::tile_extent`] for a single point rather than a
    /// whole bbox. Used by out-of-zoom reassembly (§4.4) to map a high-zoom
    /// tile's corners down onto the covering lower-zoom tiles.
    pub fn tile_at_point(&self, px: f64, py: f64, z: u16) -> Result<(i64, i64)> {
        let level = self.level(z)?;
        let sx = level.resolution * self.tile_sx as f64;
        let sy = level.resolution * self.tile_sy as f64;
        Ok(match self.origin {
            Origin::BottomLeft => (
                ((px - self.extent.min_x) / sx).floor() as i64,
                ((py - self.extent.min_y) / sy).floor() as i64,
            ),
            Origin::TopLeft => (
                ((px - self.extent.min_x) / sx).floor() as i64,
                ((self.extent.max_y - py) / sy).floor() as i64,
            ),
            Origin::BottomRight | Origin::TopRight => unreachable!("rejected at construction"),
        })
    }

    /// Limits at every level (grid-link construction time).
    pub fn compute_limits(&self, extent: &Extent, tolerance: i64) -> Result<Vec<ExtentI>> {
        (0..self.levels.len() as u16)
            .map(|z| self.compute_limits_at_level(extent, z, tolerance))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_rejects_increasing_resolution() {
        let levels = vec![
            Level { resolution: 1.0, max_x: 1, max_y: 1 },
            Level { resolution: 2.0, max_x: 2, max_y: 2 },
        ];
        let err = Grid::new(
            "bad",
            "EPSG:4326",
            Unit::Degrees,
            Extent::new(0.0, 0.0, 1.0, 1.0),
            256,
            256,
            Origin::TopLeft,
            levels,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidGrid(_)));
    }

    #[test]
    fn tile_extent_top_left_matches_z0() {
        let grid = Grid::google_maps_compatible();
        let extent = grid.tile_extent(0, 0, 0).unwrap();
        assert!((extent.min_x - grid.extent.min_x).abs() < 1e-6);
        assert!((extent.max_y - grid.extent.max_y).abs() < 1e-6);
    }

    #[test]
    fn grid_round_trip() {
        let grid = Grid::google_maps_compatible();
        let extent = grid.tile_extent(4, 5, 6).unwrap();
        let (x, y, z) = grid.get_cell(&extent, 256, 256).unwrap().expect("aligned");
        assert_eq!((x, y, z), (4, 5, 6));
        let round_tripped = grid.tile_extent(x, y, z).unwrap();
        assert!((round_tripped.min_x - extent.min_x).abs() < 1e-3);
        assert!((round_tripped.max_y - extent.max_y).abs() < 1e-3);
    }

    #[test]
    fn limits_are_clamped_to_level() {
        let grid = Grid::google_maps_compatible();
        let huge = Extent::new(-1e9, -1e9, 1e9, 1e9);
        let limits = grid.compute_limits_at_level(&huge, 3, 0).unwrap();
        let level = grid.level(3).unwrap();
        assert!(limits.min_x >= 0 && limits.max_x <= level.max_x as i64);
        assert!(limits.min_y >= 0 && limits.max_y <= level.max_y as i64);
    }

    #[test]
    fn tolerance_extends_limits_outward() {
        let grid = Grid::google_maps_compatible();
        let extent = grid.tile_extent(4, 4, 6).unwrap();
        let tight = grid.compute_limits_at_level(&extent, 6, 0).unwrap();
        let loose = grid.compute_limits_at_level(&extent, 6, 2).unwrap();
        assert!(loose.min_x <= tight.min_x);
        assert!(loose.max_x >= tight.max_x);
    }
}
