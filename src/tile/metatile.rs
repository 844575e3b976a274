//! Metatile geometry and the locking resource key (§3, §4.3). Grounded on
//! `original_source/lib/tileset.c` (`metatile_get`).

use super::{GridLink, Tile};
use crate::config::Tileset;
use crate::error::Result;
use crate::grid::Extent;
use std::sync::Arc;

/// A `metasize_x x metasize_y` block of adjacent tiles rendered as one
/// source call, clamped to the grid's level extent so edge metatiles may
/// be smaller than the configured shape.
#[derive(Clone)]
pub struct MetaTile {
    pub tileset: Arc<Tileset>,
    pub grid_link: Arc<GridLink>,
    pub z: u16,
    pub mt_x: i64,
    pub mt_y: i64,
    pub metasize_x: u32,
    pub metasize_y: u32,
    pub metabuffer: u32,
    /// Actual width/height of this instance in tiles, after edge clamping.
    pub actual_x: u32,
    pub actual_y: u32,
}

impl MetaTile {
    /// Build the metatile covering `tile`, per §4.3:
    /// `mt_x = floor(x / metasize_x)`, clamped so `metasize'` never exceeds
    /// the grid's level extent.
    pub fn covering(tile: &Tile) -> Result<Self> {
        let tileset = &tile.tileset;
        let (metasize_x, metasize_y) = tileset.metasize;
        let metabuffer = tileset.metabuffer;
        let mt_x = tile.x.div_euclid(metasize_x as i64);
        let mt_y = tile.y.div_euclid(metasize_y as i64);
        let level = tile.grid_link.grid.level(tile.z)?;
        let actual_x = metasize_x.min((level.max_x as i64 - mt_x * metasize_x as i64).max(0) as u32);
        let actual_y = metasize_y.min((level.max_y as i64 - mt_y * metasize_y as i64).max(0) as u32);
        Ok(Self {
            tileset: tile.tileset.clone(),
            grid_link: tile.grid_link.clone(),
            z: tile.z,
            mt_x,
            mt_y,
            metasize_x,
            metasize_y,
            metabuffer,
            actual_x: actual_x.max(1),
            actual_y: actual_y.max(1),
        })
    }

    pub fn base_x(&self) -> i64 {
        self.mt_x * self.metasize_x as i64
    }

    pub fn base_y(&self) -> i64 {
        self.mt_y * self.metasize_y as i64
    }

    /// Every child tile's `(x, y)` in this metatile (invariant: every
    /// child satisfies `base <= x < base + actual <= level.max`, §8).
    pub fn child_coords(&self) -> Vec<(i64, i64)> {
        let mut out = Vec::with_capacity((self.actual_x * self.actual_y) as usize);
        for dy in 0..self.actual_y {
            for dx in 0..self.actual_x {
                out.push((self.base_x() + dx as i64, self.base_y() + dy as i64));
            }
        }
        out
    }

    /// Pixel dimensions of the metatile's rendered image:
    /// `actual_* * tile_s* + 2*metabuffer`.
    pub fn pixel_size(&self) -> (u32, u32) {
        let grid = &self.grid_link.grid;
        (
            self.actual_x * grid.tile_sx + 2 * self.metabuffer,
            self.actual_y * grid.tile_sy + 2 * self.metabuffer,
        )
    }

    /// Map extent covered by the metatile, grown by `metabuffer *
    /// resolution` on every side.
    pub fn map_extent(&self) -> Result<Extent> {
        let grid = &self.grid_link.grid;
        let level = grid.level(self.z)?;
        let top_left = grid.tile_extent(self.base_x(), self.base_y(), self.z)?;
        let bottom_right = grid.tile_extent(
            self.base_x() + self.actual_x as i64 - 1,
            self.base_y() + self.actual_y as i64 - 1,
            self.z,
        )?;
        let min_x = top_left.min_x.min(bottom_right.min_x);
        let min_y = top_left.min_y.min(bottom_right.min_y);
        let max_x = top_left.max_x.max(bottom_right.max_x);
        let max_y = top_left.max_y.max(bottom_right.max_y);
        let buffer = self.metabuffer as f64 * level.resolution;
        Ok(Extent::new(min_x - buffer, min_y - buffer, max_x + buffer, max_y + buffer))
    }

    /// The locking resource key, slash-sanitizing dimension values.
    /// Changing `metasize_*` necessarily changes this key since it is
    /// derived from `mt_x`/`mt_y`, which are themselves a function of
    /// `metasize_*`.
    pub fn resource_key(&self, dimensions: &[crate::dimension::RequestedDimension]) -> String {
        let mut key = format!("{}-{}-{}-{}", self.z, self.mt_y, self.mt_x, self.tileset.name);
        key.push('-');
        key.push_str(&self.grid_link.grid.name);
        for dim in dimensions {
            key.push('-');
            key.push_str(&dim.cached_value.replace('/', "#"));
        }
        key
    }

    pub fn ntiles(&self) -> u32 {
        self.actual_x * self.actual_y
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tileset;
    use crate::grid::{Extent, Grid};
    use crate::tile::GridLink;

    fn fixture_tile(x: i64, y: i64, z: u16) -> Tile {
        let grid = Arc::new(Grid::google_maps_compatible());
        let extent = grid.extent;
        let link = Arc::new(GridLink::new(grid, extent, 0).unwrap());
        let tileset = Arc::new(Tileset::new_for_test("osm", (2, 2), 0));
        Tile::new(tileset, link, z, x, y)
    }

    #[test]
    fn metatile_containment_invariant() {
        let tile = fixture_tile(5, 5, 4);
        let mt = MetaTile::covering(&tile).unwrap();
        let level = tile.grid_link.grid.level(4).unwrap();
        for (x, y) in mt.child_coords() {
            assert!(mt.base_x() <= x && x < mt.base_x() + mt.actual_x as i64);
            assert!(x < level.max_x as i64);
            assert!(mt.base_y() <= y && y < mt.base_y() + mt.actual_y as i64);
            assert!(y < level.max_y as i64);
        }
    }

    #[test]
    fn resource_key_changes_with_metasize() {
        let tile_a = fixture_tile(5, 5, 4);
        let mt_a = MetaTile::covering(&tile_a).unwrap();
        let mut tile_b = fixture_tile(5, 5, 4);
        tile_b.tileset = Arc::new(Tileset::new_for_test("osm", (4, 4), 0));
        let mt_b = MetaTile::covering(&tile_b).unwrap();
        assert_ne!(mt_a.resource_key(&[]), mt_b.resource_key(&[]));
    }

    #[test]
    fn edge_metatile_is_clamped() {
        let grid = Arc::new(Grid::google_maps_compatible());
        let level = grid.level(1).unwrap();
        let extent = grid.extent;
        let link = Arc::new(GridLink::new(grid, extent, 0).unwrap());
        let tileset = Arc::new(Tileset::new_for_test("osm", (4, 4), 0));
        let tile = Tile::new(tileset, link, 1, level.max_x as i64 - 1, level.max_y as i64 - 1);
        let mt = MetaTile::covering(&tile).unwrap();
        assert!(mt.actual_x <= level.max_x);
        assert!(mt.actual_y <= level.max_y);
    }
}
