//! Cache back-end interface and shared policy (§4.2). Grounded on
//! `original_source/lib/cache.c`: a uniform `TileCache` trait plus a retry
//! wrapper enforcing exponential backoff and readonly rules.

pub mod composite;
pub mod disk;
pub mod key;
pub mod mbtiles;
pub mod object_store;
pub mod redis;
pub mod sqlite;

pub use composite::{ConditionalCache, FallbackCache};
pub use disk::DiskCache;
pub use key::{build_cache_key, PathTemplate};
pub use mbtiles::MbtilesCache;
pub use object_store::ObjectStoreCache;
pub use redis::RedisCache;
pub use sqlite::SqliteCache;

use crate::error::Result;
use crate::tile::Tile;
use async_trait::async_trait;
use std::time::Duration;

/// Outcome of a cache read (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheResult {
    Hit,
    Miss,
    /// A hit whose `mtime` is stale relative to the tileset's
    /// `auto_expire` threshold; the caller should re-render but may keep
    /// serving the stale bytes if the reload fails or cannot block.
    Reload,
}

/// The common cache back-end contract: `get/set/exists/delete`, plus an
/// optional batched `multi_set` used by the metatile-split path.
#[async_trait]
pub trait TileCache: Send + Sync {
    async fn tile_get(&self, tile: &mut Tile) -> Result<CacheResult>;
    async fn tile_set(&self, tile: &Tile) -> Result<()>;
    async fn tile_exists(&self, tile: &Tile) -> Result<bool>;
    async fn tile_delete(&self, tile: &Tile) -> Result<()>;

    /// Default multi-set fans out to individual `tile_set` calls; back-ends
    /// with a native batch primitive (SQLite transactions, Redis pipelines)
    /// override this.
    async fn tile_multi_set(&self, tiles: &[Tile]) -> Result<()> {
        for tile in tiles {
            self.tile_set(tile).await?;
        }
        Ok(())
    }

    fn name(&self) -> &str;
}

/// Retry policy shared by every back-end: `retry_count` attempts with
/// exponential backoff starting at `retry_delay`, doubling each attempt.
/// Errors are cleared between attempts so only the last one survives
/// (§4.2, §9).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retry_count: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { retry_count: 0, retry_delay: Duration::from_millis(200) }
    }
}

impl RetryPolicy {
    /// Run `op` up to `retry_count + 1` times, doubling the delay between
    /// attempts; only the final error is returned.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay = self.retry_delay;
        let mut last_err = None;
        for attempt in 0..=self.retry_count {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    last_err = Some(e);
                    if attempt < self.retry_count {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }
        Err(last_err.expect("loop runs at least once"))
    }
}

/// Wraps a back-end `TileCache` with the retry policy and the
/// readonly/rule-hidden rules common to every back-end (§4.2).
pub struct RetryingCache<C> {
    pub inner: C,
    pub policy: RetryPolicy,
}

impl<C: TileCache> RetryingCache<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<C: TileCache> TileCache for RetryingCache<C> {
    async fn tile_get(&self, tile: &mut Tile) -> Result<CacheResult> {
        // Rule-hidden tiles never touch the back-end (§4.2).
        if let Some(rule) = tile.grid_link.rule_at(tile.z) {
            if rule.is_hidden(tile.x, tile.y) {
                tile.raw_image = Some(crate::image::RawImage::fill(
                    tile.grid_link.grid.tile_sx,
                    tile.grid_link.grid.tile_sy,
                    rule.hidden_color,
                ));
                tile.nodata = false;
                return Ok(CacheResult::Hit);
            }
        }
        let mut delay = self.policy.retry_delay;
        let mut last_err = None;
        for attempt in 0..=self.policy.retry_count {
            match self.inner.tile_get(tile).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    last_err = Some(e);
                    if attempt < self.policy.retry_count {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }
        Err(last_err.expect("loop runs at least once"))
    }

    async fn tile_set(&self, tile: &Tile) -> Result<()> {
        if tile.tileset.read_only || is_readonly_rule(tile) {
            return Ok(());
        }
        self.policy.run(|| self.inner.tile_set(tile)).await
    }

    async fn tile_exists(&self, tile: &Tile) -> Result<bool> {
        self.policy.run(|| self.inner.tile_exists(tile)).await
    }

    async fn tile_delete(&self, tile: &Tile) -> Result<()> {
        if tile.tileset.read_only || is_readonly_rule(tile) {
            return Ok(());
        }
        self.policy.run(|| self.inner.tile_delete(tile)).await
    }

    async fn tile_multi_set(&self, tiles: &[Tile]) -> Result<()> {
        let writable: Vec<Tile> =
            tiles.iter().filter(|t| !t.tileset.read_only && !is_readonly_rule(t)).cloned().collect();
        if writable.is_empty() {
            return Ok(());
        }
        self.policy.run(|| self.inner.tile_multi_set(&writable)).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

fn is_readonly_rule(tile: &Tile) -> bool {
    tile.grid_link.rule_at(tile.z).map(|r| r.readonly).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn retry_policy_clears_error_between_attempts_and_succeeds() {
        let attempts = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy { retry_count: 2, retry_delay: Duration::from_millis(1) };
        let result: Result<u32> = policy
            .run(|| {
                let attempts = attempts.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(crate::error::Error::internal("transient"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_policy_reports_only_final_error() {
        let policy = RetryPolicy { retry_count: 1, retry_delay: Duration::from_millis(1) };
        let result: Result<()> = policy.run(|| async { Err(crate::error::Error::internal("boom")) }).await;
        assert!(result.is_err());
    }
}
