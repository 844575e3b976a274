//! Tile seeding: walks a [`SeedingStrategy`]'s coordinates and drives each
//! one through the ordinary [`crate::metatile::tile_get`] path so the cache
//! is warmed exactly the way a live request would have filled it — same
//! metatile coalescing, same single-flight locking, same back-end writes.
//! Grounded on the teacher's `src/seeding/{mod,strategy}.rs` (parallel
//! `rayon` walk over a strategy-supplied coordinate list, progress logging,
//! skip-existing via a cache probe), adapted from its `TileSource`/
//! `TileStorage` pair to this crate's `Context`/`Tileset` domain.

pub mod strategy;

pub use strategy::{BoundsSeedingStrategy, ListSeedingStrategy, SeedCoordinate, SeedingStrategy, ZoomRangeSeedingStrategy};

use crate::config::Tileset;
use crate::context::Context;
use crate::dimension::RequestedDimension;
use crate::error::Result;
use crate::tile::{GridLink, Tile};
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Seeding run configuration.
#[derive(Debug, Clone)]
pub struct SeedingConfig {
    /// Number of parallel workers (defaults to the machine's core count).
    pub workers: usize,
    /// Skip a coordinate whose tile already exists in the cache.
    pub skip_existing: bool,
    /// Log a progress line every `progress_interval` tiles (0 disables).
    pub progress_interval: u64,
}

impl Default for SeedingConfig {
    fn default() -> Self {
        Self { workers: num_cpus::get(), skip_existing: true, progress_interval: 100 }
    }
}

/// Outcome counters for one [`TileSeeder::seed`] run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeedingStats {
    pub total: u64,
    pub generated: u64,
    pub skipped: u64,
    pub nodata: u64,
    pub failed: u64,
}

impl SeedingStats {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.generated as f64 / self.total as f64) * 100.0
        }
    }
}

/// Drives a tileset's grid-link through a seeding strategy.
pub struct TileSeeder {
    ctx: Context,
    tileset: Arc<Tileset>,
    grid_link: Arc<GridLink>,
    dimensions: Vec<RequestedDimension>,
    config: SeedingConfig,
}

impl TileSeeder {
    /// Seed the tileset's first grid-link with no dimension values (a plain
    /// `(x, y, z)` tileset).
    pub fn new(ctx: Context, tileset: Arc<Tileset>) -> Result<Self> {
        let grid_link = tileset
            .grid_links()
            .first()
            .cloned()
            .ok_or_else(|| crate::error::Error::config(format!("tileset '{}' has no grid-links", tileset.name)))?;
        Ok(Self { ctx, tileset, grid_link, dimensions: Vec::new(), config: SeedingConfig::default() })
    }

    pub fn with_grid_link(mut self, grid_link: Arc<GridLink>) -> Self {
        self.grid_link = grid_link;
        self
    }

    /// Every seeded tile carries these resolved dimension values (one fixed
    /// cache-key slice per run; seeding the full cross-product of a
    /// dimension-assembly tileset is out of scope for a single run — invoke
    /// `seed` once per combination instead).
    pub fn with_dimensions(mut self, dimensions: Vec<RequestedDimension>) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn with_config(mut self, config: SeedingConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the strategy's coordinates through the tile-fetch orchestrator.
    /// Coordinates are chunked by `config.workers` and each chunk runs on a
    /// `rayon` thread that blocks on the async fetch — the same shape as
    /// the teacher's `par_iter().for_each(... block_on ...)` walk, since
    /// `tile_get` itself is the only async boundary here.
    pub async fn seed<St: SeedingStrategy>(&self, strategy: St) -> Result<SeedingStats> {
        let coords = strategy.coordinates(&self.grid_link)?;
        let total = coords.len() as u64;
        info!(total, workers = self.config.workers, "starting tile seeding");

        let generated = Arc::new(AtomicU64::new(0));
        let skipped = Arc::new(AtomicU64::new(0));
        let nodata = Arc::new(AtomicU64::new(0));
        let failed = Arc::new(AtomicU64::new(0));
        let handle = tokio::runtime::Handle::current();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers.max(1))
            .build()
            .map_err(|e| crate::error::Error::internal(format!("failed to build seeding thread pool: {e}")))?;

        pool.install(|| {
            coords.par_iter().for_each(|coord| {
                let result = handle.block_on(self.seed_one(*coord));
                match result {
                    Ok(SeedOutcome::Generated) => {
                        generated.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(SeedOutcome::Skipped) => {
                        skipped.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(SeedOutcome::NoData) => {
                        nodata.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        warn!(z = coord.z, x = coord.x, y = coord.y, error = %e, "failed to seed tile");
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }

                if self.config.progress_interval > 0 {
                    let done = generated.load(Ordering::Relaxed)
                        + skipped.load(Ordering::Relaxed)
                        + nodata.load(Ordering::Relaxed)
                        + failed.load(Ordering::Relaxed);
                    if done % self.config.progress_interval == 0 {
                        info!(done, total, "seeding progress");
                    }
                }
            });
        });

        let stats = SeedingStats {
            total,
            generated: generated.load(Ordering::Relaxed),
            skipped: skipped.load(Ordering::Relaxed),
            nodata: nodata.load(Ordering::Relaxed),
            failed: failed.load(Ordering::Relaxed),
        };
        info!(?stats, "seeding complete");
        Ok(stats)
    }

    async fn seed_one(&self, coord: SeedCoordinate) -> Result<SeedOutcome> {
        if self.config.skip_existing {
            if let Some(cache) = &self.tileset.cache {
                let probe = Tile::new(self.tileset.clone(), self.grid_link.clone(), coord.z, coord.x, coord.y)
                    .with_dimensions(self.dimensions.clone());
                if cache.tile_exists(&probe).await? {
                    return Ok(SeedOutcome::Skipped);
                }
            }
        }

        let tile = Tile::new(self.tileset.clone(), self.grid_link.clone(), coord.z, coord.x, coord.y)
            .with_dimensions(self.dimensions.clone());
        let fetched = crate::metatile::tile_get(&self.ctx, tile).await?;
        if fetched.nodata {
            Ok(SeedOutcome::NoData)
        } else {
            Ok(SeedOutcome::Generated)
        }
    }

    /// Convenience wrapper seeding a single zoom level across the
    /// grid-link's full limits.
    pub async fn seed_zoom(&self, zoom: u16) -> Result<SeedingStats> {
        self.seed(ZoomRangeSeedingStrategy::new(zoom, zoom)).await
    }

    /// Convenience wrapper seeding a contiguous zoom range.
    pub async fn seed_zoom_range(&self, min_zoom: u16, max_zoom: u16) -> Result<SeedingStats> {
        self.seed(ZoomRangeSeedingStrategy::new(min_zoom, max_zoom)).await
    }
}

enum SeedOutcome {
    Generated,
    Skipped,
    NoData,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Tileset};

    #[test]
    fn seeding_config_defaults_to_available_parallelism() {
        let config = SeedingConfig::default();
        assert!(config.workers > 0);
        assert!(config.skip_existing);
    }

    #[test]
    fn success_rate_handles_empty_run() {
        let stats = SeedingStats::default();
        assert_eq!(stats.success_rate(), 0.0);
    }

    #[test]
    fn success_rate_computes_percentage() {
        let stats = SeedingStats { total: 100, generated: 80, skipped: 15, nodata: 0, failed: 5 };
        assert_eq!(stats.success_rate(), 80.0);
    }

    #[tokio::test]
    async fn seeder_rejects_tileset_with_no_grid_links() {
        let tileset = Arc::new(Tileset::new_for_test("empty", (1, 1), 0));
        // `new_for_test` always seeds one grid-link; build a truly empty one
        // by hand to exercise the error path.
        let mut bare = Tileset::new_for_test("bare", (1, 1), 0);
        bare.grid_links.clear();
        let bare = Arc::new(bare);
        let ctx = Context::new(Config::empty());
        assert!(TileSeeder::new(ctx.clone(), tileset).is_ok());
        assert!(TileSeeder::new(ctx, bare).is_err());
    }
}
