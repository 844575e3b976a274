//! SQLite key-value cache back-end: per-cache CREATE/EXISTS/GET/SET/DELETE
//! statement templates bound with named parameters (§4.2). Grounded on
//! `original_source/lib/cache_sqlite.c` semantics as described in
//! `lib/cache.c`/`lib/tileset.c`.

use super::TileCache;
use crate::cache::CacheResult;
use crate::error::{Error, Result};
use crate::tile::Tile;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

/// The shared key-value storage envelope (§4.2): encoded bytes followed by
/// an 8-byte little-endian Unix-epoch-seconds mtime, or the 5-byte blank
/// sentinel `'#' ++ RGBA` in place of the encoded bytes.
pub fn encode_value(encoded: &[u8], mtime: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded.len() + 8);
    out.extend_from_slice(encoded);
    out.extend_from_slice(&mtime.to_le_bytes());
    out
}

pub fn encode_blank_value(color: [u8; 4], mtime: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(13);
    out.push(b'#');
    out.extend_from_slice(&color);
    out.extend_from_slice(&mtime.to_le_bytes());
    out
}

/// Parsed form of a stored value: either the real encoded bytes, or a
/// blank-tile color sentinel that must be expanded into a synthetic image.
pub enum StoredValue {
    Encoded(Vec<u8>),
    Blank([u8; 4]),
}

pub fn decode_value(raw: &[u8]) -> Result<(StoredValue, i64)> {
    if raw.len() < 8 {
        return Err(Error::internal("cache value shorter than mtime trailer"));
    }
    let (body, mtime_bytes) = raw.split_at(raw.len() - 8);
    let mtime = i64::from_le_bytes(mtime_bytes.try_into().unwrap());
    if body.len() == 5 && body[0] == b'#' {
        Ok((StoredValue::Blank([body[1], body[2], body[3], body[4]]), mtime))
    } else {
        Ok((StoredValue::Encoded(body.to_vec()), mtime))
    }
}

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64
}

pub struct SqliteCache {
    conn: Arc<Mutex<rusqlite::Connection>>,
    create_stmt: String,
    exists_stmt: String,
    get_stmt: String,
    set_stmt: String,
    delete_stmt: String,
    detect_blank: bool,
}

impl SqliteCache {
    pub fn open(path: &str) -> Result<Self> {
        let conn = rusqlite::Connection::open(path)?;
        let cache = Self {
            conn: Arc::new(Mutex::new(conn)),
            create_stmt: "CREATE TABLE IF NOT EXISTS tiles(key TEXT PRIMARY KEY, data BLOB)".into(),
            exists_stmt: "SELECT 1 FROM tiles WHERE key = :key".into(),
            get_stmt: "SELECT data FROM tiles WHERE key = :key".into(),
            set_stmt: "INSERT OR REPLACE INTO tiles(key, data) VALUES (:key, :data)".into(),
            delete_stmt: "DELETE FROM tiles WHERE key = :key".into(),
            detect_blank: true,
        };
        Ok(cache)
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(&self.create_stmt, [])?;
        Ok(())
    }

    fn key_for(tile: &Tile) -> String {
        crate::cache::build_cache_key(tile)
    }
}

#[async_trait]
impl TileCache for SqliteCache {
    async fn tile_get(&self, tile: &mut Tile) -> Result<CacheResult> {
        let key = Self::key_for(tile);
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&self.get_stmt)?;
        let raw: Option<Vec<u8>> =
            stmt.query_row(rusqlite::named_params! { ":key": key }, |row| row.get(0)).optional()?;
        drop(stmt);
        drop(conn);
        match raw {
            None => Ok(CacheResult::Miss),
            Some(raw) => {
                let (value, mtime) = decode_value(&raw)?;
                tile.mtime = Some(mtime);
                match value {
                    StoredValue::Encoded(bytes) => tile.encoded_data = Some(bytes::Bytes::from(bytes)),
                    StoredValue::Blank(color) => {
                        tile.raw_image = Some(crate::image::RawImage::fill(
                            tile.grid_link.grid.tile_sx,
                            tile.grid_link.grid.tile_sy,
                            color,
                        ));
                    }
                }
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
        let key = Self::key_for(tile);
        let mtime = now_secs();
        let value = if self.detect_blank {
            match tile.raw_image.as_ref().and_then(|img| img.blank_color()) {
                Some(color) => encode_blank_value(color, mtime),
                None => encode_value(
                    tile.encoded_data
                        .as_ref()
                        .ok_or_else(|| Error::internal("tile_set called without encoded data"))?,
                    mtime,
                ),
            }
        } else {
            encode_value(
                tile.encoded_data
                    .as_ref()
                    .ok_or_else(|| Error::internal("tile_set called without encoded data"))?,
                mtime,
            )
        };
        let conn = self.conn.lock().await;
        conn.execute(&self.set_stmt, rusqlite::named_params! { ":key": key, ":data": value })?;
        Ok(())
    }

    async fn tile_exists(&self, tile: &Tile) -> Result<bool> {
        let key = Self::key_for(tile);
        let conn = self.conn.lock().await;
        let exists: Option<i64> =
            conn.query_row(&self.exists_stmt, rusqlite::named_params! { ":key": key }, |row| row.get(0)).optional()?;
        Ok(exists.is_some())
    }

    async fn tile_delete(&self, tile: &Tile) -> Result<()> {
        let key = Self::key_for(tile);
        let conn = self.conn.lock().await;
        conn.execute(&self.delete_stmt, rusqlite::named_params! { ":key": key })?;
        Ok(())
    }

    async fn tile_multi_set(&self, tiles: &[Tile]) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for tile in tiles {
            let key = Self::key_for(tile);
            let mtime = now_secs();
            let value = match tile.raw_image.as_ref().and_then(|img| img.blank_color()) {
                Some(color) if self.detect_blank => encode_blank_value(color, mtime),
                _ => encode_value(
                    tile.encoded_data
                        .as_ref()
                        .ok_or_else(|| Error::internal("tile_multi_set called without encoded data"))?,
                    mtime,
                ),
            };
            tx.execute(&self.set_stmt, rusqlite::named_params! { ":key": key, ":data": value })?;
        }
        tx.commit()?;
        Ok(())
    }

    fn name(&self) -> &str {
        "sqlite"
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

    async fn fixture() -> (SqliteCache, Tile) {
        let cache = SqliteCache::open(":memory:").unwrap();
        cache.ensure_schema().await.unwrap();
        let grid = Arc::new(Grid::google_maps_compatible());
        let extent = grid.extent;
        let link = Arc::new(GridLink::new(grid, extent, 0).unwrap());
        let tileset = Arc::new(Tileset::new_for_test("osm", (1, 1), 0));
        (cache, Tile::new(tileset, link, 3, 4, 5))
    }

    #[tokio::test]
    async fn blank_tile_round_trips_through_sentinel() {
        let (cache, mut tile) = fixture().await;
        tile.raw_image = Some(crate::image::RawImage::fill(256, 256, [255, 255, 255, 255]));
        tile.encoded_data = Some(bytes::Bytes::from_static(b"not-actually-uniform-but-flagged-blank"));
        cache.tile_set(&tile).await.unwrap();

        let mut read_back = Tile::new(tile.tileset.clone(), tile.grid_link.clone(), tile.z, tile.x, tile.y);
        let result = cache.tile_get(&mut read_back).await.unwrap();
        assert_eq!(result, CacheResult::Hit);
        assert_eq!(
            read_back.raw_image.unwrap().blank_color(),
            Some([255, 255, 255, 255])
        );
    }

    #[tokio::test]
    async fn non_blank_tile_round_trips_bytes() {
        let (cache, mut tile) = fixture().await;
        tile.encoded_data = Some(bytes::Bytes::from_static(b"pngdata"));
        cache.tile_set(&tile).await.unwrap();
        let mut read_back = Tile::new(tile.tileset.clone(), tile.grid_link.clone(), tile.z, tile.x, tile.y);
        cache.tile_get(&mut read_back).await.unwrap();
        assert_eq!(read_back.encoded_data.as_deref(), Some(&b"pngdata"[..]));
    }
}
