//! Strategies that enumerate `(x, y, z)` coordinates to pre-generate for a
//! tileset's grid-link, rather than waiting for client requests to fill the
//! cache (§2 "Out of scope / external collaborators" carves out the HTTP
//! front-ends and CLI/CGI binary, not the seeding walk itself — the same
//! ambient concern the teacher crate covers with its own seeding module).

use crate::error::Result;
use crate::tile::GridLink;

/// A coordinate to pre-render, scoped to one grid-link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedCoordinate {
    pub z: u16,
    pub x: i64,
    pub y: i64,
}

/// Enumerates the tile coordinates a [`super::TileSeeder`] should visit.
pub trait SeedingStrategy {
    fn coordinates(&self, grid_link: &GridLink) -> Result<Vec<SeedCoordinate>>;
}

/// Every tile within `[min_zoom, max_zoom]` that falls inside the
/// grid-link's precomputed per-level limits (§3 "GridLink").
pub struct ZoomRangeSeedingStrategy {
    min_zoom: u16,
    max_zoom: u16,
}

impl ZoomRangeSeedingStrategy {
    pub fn new(min_zoom: u16, max_zoom: u16) -> Self {
        Self { min_zoom, max_zoom }
    }
}

impl SeedingStrategy for ZoomRangeSeedingStrategy {
    fn coordinates(&self, grid_link: &GridLink) -> Result<Vec<SeedCoordinate>> {
        let mut coords = Vec::new();
        for z in self.min_zoom..=self.max_zoom {
            let Some(limit) = grid_link.limits_at(z) else { continue };
            for x in limit.min_x..limit.max_x {
                for y in limit.min_y..limit.max_y {
                    coords.push(SeedCoordinate { z, x, y });
                }
            }
        }
        Ok(coords)
    }
}

/// Every tile within `[min_zoom, max_zoom]` whose extent intersects a
/// caller-supplied geographic extent, intersected with the grid-link's own
/// limits.
pub struct BoundsSeedingStrategy {
    extent: crate::grid::Extent,
    min_zoom: u16,
    max_zoom: u16,
}

impl BoundsSeedingStrategy {
    pub fn new(extent: crate::grid::Extent, min_zoom: u16, max_zoom: u16) -> Self {
        Self { extent, min_zoom, max_zoom }
    }
}

impl SeedingStrategy for BoundsSeedingStrategy {
    fn coordinates(&self, grid_link: &GridLink) -> Result<Vec<SeedCoordinate>> {
        let mut coords = Vec::new();
        for z in self.min_zoom..=self.max_zoom {
            let Some(limit) = grid_link.limits_at(z) else { continue };
            let bounds = grid_link.grid.compute_limits_at_level(&self.extent, z, 0)?;
            let min_x = bounds.min_x.max(limit.min_x);
            let max_x = bounds.max_x.min(limit.max_x);
            let min_y = bounds.min_y.max(limit.min_y);
            let max_y = bounds.max_y.min(limit.max_y);
            for x in min_x..max_x {
                for y in min_y..max_y {
                    coords.push(SeedCoordinate { z, x, y });
                }
            }
        }
        Ok(coords)
    }
}

/// A fixed, caller-supplied list of coordinates (no grid-link validation).
pub struct ListSeedingStrategy {
    coords: Vec<SeedCoordinate>,
}

impl ListSeedingStrategy {
    pub fn new(coords: Vec<SeedCoordinate>) -> Self {
        Self { coords }
    }
}

impl SeedingStrategy for ListSeedingStrategy {
    fn coordinates(&self, _grid_link: &GridLink) -> Result<Vec<SeedCoordinate>> {
        Ok(self.coords.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Grid;
    use std::sync::Arc;

    fn test_grid_link() -> GridLink {
        let grid = Arc::new(Grid::google_maps_compatible());
        let extent = grid.extent;
        GridLink::new(grid, extent, 0).unwrap()
    }

    #[test]
    fn zoom_range_covers_every_tile_at_each_level() {
        let link = test_grid_link();
        let strategy = ZoomRangeSeedingStrategy::new(0, 2);
        let coords = strategy.coordinates(&link).unwrap();
        // z=0: 1 tile, z=1: 4 tiles, z=2: 16 tiles = 21 total.
        assert_eq!(coords.len(), 21);
    }

    #[test]
    fn bounds_strategy_stays_within_grid_link_limits() {
        let link = test_grid_link();
        let small = crate::grid::Extent::new(-1000.0, -1000.0, 1000.0, 1000.0);
        let strategy = BoundsSeedingStrategy::new(small, 4, 4);
        let coords = strategy.coordinates(&link).unwrap();
        assert!(!coords.is_empty());
        let limit = link.limits_at(4).unwrap();
        assert!(coords.iter().all(|c| limit.contains(c.x, c.y)));
    }

    #[test]
    fn list_strategy_returns_its_coordinates_verbatim() {
        let link = test_grid_link();
        let list = vec![SeedCoordinate { z: 3, x: 4, y: 5 }, SeedCoordinate { z: 3, x: 5, y: 5 }];
        let strategy = ListSeedingStrategy::new(list.clone());
        assert_eq!(strategy.coordinates(&link).unwrap(), list);
    }
}
