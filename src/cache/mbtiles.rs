//! MBTiles cache back-end: the canonical `metadata`/`map`/`images` schema
//! with tiles deduplicated by content hash (§4.2). Grounded on the
//! teacher's `storage::mbtiles::MBTilesStorage` (schema/connection shape),
//! adapted from its flat `tiles` table to the MBTiles spec's dedup-by-hash
//! `map`/`images` view so repeated blank or identical tiles cost one row.

use super::TileCache;
use crate::cache::CacheResult;
use crate::error::{Error, Result};
use crate::tile::Tile;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64
}

/// MBTiles uses TMS row numbering (row 0 at the bottom), the opposite of
/// this crate's top-left tile-space convention for `GoogleMapsCompatible`.
fn to_tms_row(y: i64, grid_max_y: u32) -> i64 {
    grid_max_y as i64 - 1 - y
}

pub struct MbtilesCache {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl MbtilesCache {
    pub fn open(path: &str) -> Result<Self> {
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS metadata (name TEXT, value TEXT);
             CREATE TABLE IF NOT EXISTS images (tile_id TEXT PRIMARY KEY, tile_data BLOB, mtime INTEGER);
             CREATE TABLE IF NOT EXISTS map (
                 zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_id TEXT,
                 PRIMARY KEY (zoom_level, tile_column, tile_row)
             );
             CREATE VIEW IF NOT EXISTS tiles AS
                 SELECT map.zoom_level AS zoom_level, map.tile_column AS tile_column,
                        map.tile_row AS tile_row, images.tile_data AS tile_data
                 FROM map JOIN images ON map.tile_id = images.tile_id;",
        )?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn tms_coords(tile: &Tile) -> Result<(i64, i64, i64)> {
        let level = tile.grid_link.grid.level(tile.z)?;
        Ok((tile.z as i64, tile.x, to_tms_row(tile.y, level.max_y)))
    }

    fn content_hash(bytes: &[u8]) -> String {
        format!("{:x}", md5::compute(bytes))
    }
}

#[async_trait]
impl TileCache for MbtilesCache {
    async fn tile_get(&self, tile: &mut Tile) -> Result<CacheResult> {
        let (z, x, y) = Self::tms_coords(tile)?;
        let conn = self.conn.lock().await;
        let row: Option<(Vec<u8>, i64)> = conn
            .query_row(
                "SELECT images.tile_data, images.mtime FROM map JOIN images ON map.tile_id = images.tile_id
                 WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
                rusqlite::params![z, x, y],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        drop(conn);
        match row {
            None => Ok(CacheResult::Miss),
            Some((bytes, mtime)) => {
                tile.encoded_data = Some(bytes::Bytes::from(bytes));
                tile.mtime = Some(mtime);
                let auto_expire = tile.tileset.auto_expire;
                if auto_expire > 0 && tile.tileset.source.is_some() && !tile.tileset.read_only {
                    if now_secs() - mtime >= auto_expire {
                        return Ok(CacheResult::Reload);
                    }
                }
                Ok(CacheResult::Hit)
            }
        }
    }

    async fn tile_set(&self, tile: &Tile) -> Result<()> {
        let (z, x, y) = Self::tms_coords(tile)?;
        let bytes = tile
            .encoded_data
            .clone()
            .ok_or_else(|| Error::internal("tile_set called without encoded data"))?;
        let tile_id = Self::content_hash(&bytes);
        let mtime = now_secs();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO images(tile_id, tile_data, mtime) VALUES (?1, ?2, ?3)",
            rusqlite::params![tile_id, &bytes[..], mtime],
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO map(zoom_level, tile_column, tile_row, tile_id) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![z, x, y, tile_id],
        )?;
        Ok(())
    }

    async fn tile_exists(&self, tile: &Tile) -> Result<bool> {
        let (z, x, y) = Self::tms_coords(tile)?;
        let conn = self.conn.lock().await;
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM map WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
                rusqlite::params![z, x, y],
                |row| row.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    async fn tile_delete(&self, tile: &Tile) -> Result<()> {
        let (z, x, y) = Self::tms_coords(tile)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM map WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
            rusqlite::params![z, x, y],
        )?;
        Ok(())
    }

    async fn tile_multi_set(&self, tiles: &[Tile]) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for tile in tiles {
            let (z, x, y) = Self::tms_coords(tile)?;
            let bytes = tile
                .encoded_data
                .clone()
                .ok_or_else(|| Error::internal("tile_multi_set called without encoded data"))?;
            let tile_id = Self::content_hash(&bytes);
            let mtime = now_secs();
            tx.execute(
                "INSERT OR IGNORE INTO images(tile_id, tile_data, mtime) VALUES (?1, ?2, ?3)",
                rusqlite::params![tile_id, &bytes[..], mtime],
            )?;
            tx.execute(
                "INSERT OR REPLACE INTO map(zoom_level, tile_column, tile_row, tile_id) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![z, x, y, tile_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn name(&self) -> &str {
        "mbtiles"
    }
}

use rusqlite::OptionalExtension;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tileset;
    use crate::grid::Grid;
    use crate::tile::GridLink;
    use std::sync::Arc;

    fn fixture_tile() -> Tile {
        let grid = Arc::new(Grid::google_maps_compatible());
        let extent = grid.extent;
        let link = Arc::new(GridLink::new(grid, extent, 0).unwrap());
        let tileset = Arc::new(Tileset::new_for_test("osm", (1, 1), 0));
        Tile::new(tileset, link, 3, 4, 5)
    }

    #[tokio::test]
    async fn identical_tiles_share_one_image_row() {
        let cache = MbtilesCache::open(":memory:").unwrap();
        let mut a = fixture_tile();
        a.encoded_data = Some(bytes::Bytes::from_static(b"samebytes"));
        cache.tile_set(&a).await.unwrap();
        let mut b = fixture_tile();
        b.y = 6;
        b.encoded_data = Some(bytes::Bytes::from_static(b"samebytes"));
        cache.tile_set(&b).await.unwrap();

        let conn = cache.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn miss_then_hit_after_set() {
        let cache = MbtilesCache::open(":memory:").unwrap();
        let mut tile = fixture_tile();
        assert_eq!(cache.tile_get(&mut tile).await.unwrap(), CacheResult::Miss);
        tile.encoded_data = Some(bytes::Bytes::from_static(b"pngbytes"));
        cache.tile_set(&tile).await.unwrap();
        let mut read_back = fixture_tile();
        assert_eq!(cache.tile_get(&mut read_back).await.unwrap(), CacheResult::Hit);
        assert_eq!(read_back.encoded_data.as_deref(), Some(&b"pngbytes"[..]));
    }
}
