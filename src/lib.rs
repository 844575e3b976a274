//! # MapCache
//!
//! Tile-caching server and library for pre-rendered map tiles. Sits between
//! map clients (WMS, WMTS, TMS, KML, Google Maps, Virtual Earth) and
//! map-rendering back-ends (remote WMS servers, local rendering engines).
//!
//! ## Core pipeline
//!
//! ```text
//! client URL -> service parse -> tile identity -> dimension expansion ->
//! cache get -> (miss) metatile group -> lock -> source render -> split ->
//! multi-set cache -> unlock -> return tile
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use mapcache::config::Config;
//! use mapcache::context::Context;
//! use mapcache::tile::Tile;
//!
//! # async fn example() -> mapcache::error::Result<()> {
//! let config = Config::load_file("mapcache.xml").await?;
//! let ctx = Context::new(config);
//! let tileset = ctx.config().tileset("osm")?;
//! let tile = Tile::new(tileset.clone(), tileset.grid_links()[0].clone(), 3, 4, 5);
//! let tile = mapcache::metatile::tile_get(&ctx, tile).await?;
//! # let _ = tile;
//! # Ok(())
//! # }
//! ```

pub mod assembly;
pub mod cache;
pub mod config;
pub mod context;
pub mod dimension;
pub mod error;
pub mod grid;
pub mod image;
pub mod locker;
pub mod metatile;
pub mod pool;
pub mod seeding;
pub mod server;
pub mod service;
pub mod source;
pub mod tile;

pub use context::Context;
pub use error::{Error, Result};
pub use grid::{Extent, Grid, Level};
pub use tile::{MetaTile, Tile};

/// Crate version, re-exported for diagnostics endpoints.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default lock timeout in seconds (§5).
pub const DEFAULT_LOCK_TIMEOUT: u64 = 120;

/// Default connection pool size per back-end key (§3).
pub const DEFAULT_POOL_SIZE: usize = 10;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(DEFAULT_LOCK_TIMEOUT, 120);
        assert_eq!(DEFAULT_POOL_SIZE, 10);
    }
}
