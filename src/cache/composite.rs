//! Composite cache back-ends: a fallback chain and a predicate-gated
//! multiplexer over child caches (§4.2). Grounded on the teacher's
//! multi-backend `TileStorage` trait-object pattern in `src/storage/mod.rs`
//! and `original_source/lib/cache.c`'s "multitier" back-end.

use super::{CacheResult, TileCache};
use crate::error::Result;
use crate::tile::Tile;
use async_trait::async_trait;
use tracing::warn;

/// Ordered list of child caches. `tile_get` tries each in turn and returns
/// the first hit; a miss or error falls through to the next child, but the
/// primary's error is what gets reported if every child fails. `tile_set`
/// and `tile_multi_set` fan out to every child, preserving the first error
/// encountered but still attempting the rest (§4.2).
pub struct FallbackCache {
    children: Vec<Box<dyn TileCache>>,
}

impl FallbackCache {
    pub fn new(children: Vec<Box<dyn TileCache>>) -> Self {
        Self { children }
    }
}

#[async_trait]
impl TileCache for FallbackCache {
    async fn tile_get(&self, tile: &mut Tile) -> Result<CacheResult> {
        let mut first_error = None;
        for child in &self.children {
            match child.tile_get(tile).await {
                Ok(CacheResult::Miss) => continue,
                Ok(result) => return Ok(result),
                Err(err) => {
                    warn!(cache = child.name(), error = %err, "fallback cache child failed");
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(CacheResult::Miss),
        }
    }

    async fn tile_set(&self, tile: &Tile) -> Result<()> {
        let mut first_error = None;
        for child in &self.children {
            if let Err(err) = child.tile_set(tile).await {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn tile_exists(&self, tile: &Tile) -> Result<bool> {
        for child in &self.children {
            if child.tile_exists(tile).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn tile_delete(&self, tile: &Tile) -> Result<()> {
        let mut first_error = None;
        for child in &self.children {
            if let Err(err) = child.tile_delete(tile).await {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn tile_multi_set(&self, tiles: &[Tile]) -> Result<()> {
        let mut first_error = None;
        for child in &self.children {
            if let Err(err) = child.tile_multi_set(tiles).await {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn name(&self) -> &str {
        "fallback"
    }
}

/// A predicate gating whether a composite child participates in an
/// operation on a given tile (§4.2 "Composite (conditional)").
pub trait CachePredicate: Send + Sync {
    fn matches(&self, tile: &Tile) -> bool;
}

/// Restricts a child to a `[min_zoom, max_zoom]` range.
pub struct ZoomRange {
    pub min_zoom: u16,
    pub max_zoom: u16,
}

impl CachePredicate for ZoomRange {
    fn matches(&self, tile: &Tile) -> bool {
        tile.z >= self.min_zoom && tile.z <= self.max_zoom
    }
}

/// Restricts a child to one named grid.
pub struct GridName(pub String);

impl CachePredicate for GridName {
    fn matches(&self, tile: &Tile) -> bool {
        tile.grid_link.grid.name == self.0
    }
}

struct ConditionalChild {
    predicate: Box<dyn CachePredicate>,
    cache: Box<dyn TileCache>,
}

/// A list of children each gated by a [`CachePredicate`]; the first whose
/// predicate matches the tile handles the operation. Unlike
/// [`FallbackCache`], a non-matching child is skipped outright rather than
/// tried and found wanting (§4.2).
pub struct ConditionalCache {
    children: Vec<ConditionalChild>,
}

impl ConditionalCache {
    pub fn new() -> Self {
        Self { children: Vec::new() }
    }

    pub fn with_child(mut self, predicate: Box<dyn CachePredicate>, cache: Box<dyn TileCache>) -> Self {
        self.children.push(ConditionalChild { predicate, cache });
        self
    }

    fn select(&self, tile: &Tile) -> Option<&dyn TileCache> {
        self.children
            .iter()
            .find(|child| child.predicate.matches(tile))
            .map(|child| child.cache.as_ref())
    }
}

impl Default for ConditionalCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TileCache for ConditionalCache {
    async fn tile_get(&self, tile: &mut Tile) -> Result<CacheResult> {
        match self.select(tile) {
            Some(cache) => cache.tile_get(tile).await,
            None => Ok(CacheResult::Miss),
        }
    }

    async fn tile_set(&self, tile: &Tile) -> Result<()> {
        match self.select(tile) {
            Some(cache) => cache.tile_set(tile).await,
            None => Ok(()),
        }
    }

    async fn tile_exists(&self, tile: &Tile) -> Result<bool> {
        match self.select(tile) {
            Some(cache) => cache.tile_exists(tile).await,
            None => Ok(false),
        }
    }

    async fn tile_delete(&self, tile: &Tile) -> Result<()> {
        match self.select(tile) {
            Some(cache) => cache.tile_delete(tile).await,
            None => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "conditional"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tileset;
    use crate::grid::Grid;
    use crate::tile::GridLink;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn fixture_tile(z: u16) -> Tile {
        let grid = Arc::new(Grid::google_maps_compatible());
        let extent = grid.extent;
        let link = Arc::new(GridLink::new(grid, extent, 0).unwrap());
        let tileset = Arc::new(Tileset::new_for_test("osm", (1, 1), 0));
        Tile::new(tileset, link, z, 4, 5)
    }

    struct MemCache {
        store: Mutex<Option<bytes::Bytes>>,
        fails: bool,
    }

    impl MemCache {
        fn empty() -> Self {
            Self { store: Mutex::new(None), fails: false }
        }

        fn failing() -> Self {
            Self { store: Mutex::new(None), fails: true }
        }
    }

    #[async_trait]
    impl TileCache for MemCache {
        async fn tile_get(&self, tile: &mut Tile) -> Result<CacheResult> {
            if self.fails {
                return Err(crate::error::Error::internal("boom"));
            }
            let guard = self.store.lock().await;
            match guard.clone() {
                Some(bytes) => {
                    tile.encoded_data = Some(bytes);
                    Ok(CacheResult::Hit)
                }
                None => Ok(CacheResult::Miss),
            }
        }

        async fn tile_set(&self, tile: &Tile) -> Result<()> {
            *self.store.lock().await = tile.encoded_data.clone();
            Ok(())
        }

        async fn tile_exists(&self, _tile: &Tile) -> Result<bool> {
            Ok(self.store.lock().await.is_some())
        }

        async fn tile_delete(&self, _tile: &Tile) -> Result<()> {
            *self.store.lock().await = None;
            Ok(())
        }

        fn name(&self) -> &str {
            "mem"
        }
    }

    #[tokio::test]
    async fn fallback_skips_failing_primary() {
        let mut second = MemCache::empty();
        second.store = Mutex::new(Some(bytes::Bytes::from_static(b"from-second")));
        let cache = FallbackCache::new(vec![Box::new(MemCache::failing()), Box::new(second)]);
        let mut tile = fixture_tile(3);
        let result = cache.tile_get(&mut tile).await.unwrap();
        assert_eq!(result, CacheResult::Hit);
        assert_eq!(tile.encoded_data.as_deref(), Some(&b"from-second"[..]));
    }

    #[tokio::test]
    async fn conditional_routes_by_zoom_range() {
        let cache = ConditionalCache::new()
            .with_child(Box::new(ZoomRange { min_zoom: 0, max_zoom: 5 }), Box::new(MemCache::empty()))
            .with_child(Box::new(ZoomRange { min_zoom: 6, max_zoom: 20 }), Box::new(MemCache::empty()));
        let low = fixture_tile(2);
        let high = fixture_tile(10);
        assert!(cache.select(&low).is_some());
        assert!(cache.select(&high).is_some());
        let out_of_range = fixture_tile(2);
        let narrow = ConditionalCache::new()
            .with_child(Box::new(ZoomRange { min_zoom: 6, max_zoom: 20 }), Box::new(MemCache::empty()));
        assert!(narrow.select(&out_of_range).is_none());
    }
}
