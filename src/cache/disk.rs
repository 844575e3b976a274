//! Disk cache back-end: path-template layouts, atomic-ish writes, blank
//! symlink deduplication (§4.2). Grounded on
//! `original_source/lib/cache_disk.c`.

use super::key::PathTemplate;
use super::TileCache;
use crate::cache::CacheResult;
use crate::error::{Error, Result};
use crate::tile::Tile;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Directory-layout convention for tile paths.
#[derive(Debug, Clone)]
pub enum DiskLayout {
    /// Default nested layout: `zz/xxx/xxx/xxx/yyy/yyy/yyy.ext`, each
    /// `xxx`/`yyy` triple the decimal millions/thousands/units split of the
    /// tile index (`cache_disk.c:187-196`).
    TileCache,
    /// `Lzz/Rhhhhhhhh/Chhhhhhhh.ext`, hex, row-major.
    ArcGis,
    /// `z/yyyy/yyyy_xxxx.ext`, row-major, zero-padded to 4 digits
    /// (`cache_disk.c:342-357`).
    WorldWind,
    /// User-supplied `{tileset}`/`{grid}`/`{z}`/`{x}`/`{y}`/`{inv_x}`/
    /// `{inv_y}`/`{inv_z}`/`{ext}`/`{dim}`/`{dim:<name>}` template
    /// (`cache_disk.c:259-322`).
    Template(PathTemplate),
}

pub struct DiskCache {
    pub base_dir: PathBuf,
    pub layout: DiskLayout,
    pub symlink_blank: bool,
    pub detect_blank: bool,
    pub creation_retry: u32,
}

impl DiskCache {
    pub fn new(base_dir: impl Into<PathBuf>, layout: DiskLayout) -> Self {
        Self { base_dir: base_dir.into(), layout, symlink_blank: false, detect_blank: false, creation_retry: 3 }
    }

    fn relative_path(&self, tile: &Tile) -> String {
        let ext = tile.tileset.format.extension();
        match &self.layout {
            DiskLayout::TileCache => format!(
                "{}/{}/{:02}/{:03}/{:03}/{:03}/{:03}/{:03}/{:03}.{}",
                tile.tileset.name,
                tile.grid_link.grid.name,
                tile.z,
                tile.x / 1_000_000,
                (tile.x / 1000) % 1000,
                tile.x % 1000,
                tile.y / 1_000_000,
                (tile.y / 1000) % 1000,
                tile.y % 1000,
                ext
            ),
            DiskLayout::ArcGis => format!(
                "{}/{}/L{:02}/R{:08x}/C{:08x}.{}",
                tile.tileset.name, tile.grid_link.grid.name, tile.z, tile.y, tile.x, ext
            ),
            DiskLayout::WorldWind => format!(
                "{}/{}/{}/{:04}/{:04}_{:04}.{}",
                tile.tileset.name, tile.grid_link.grid.name, tile.z, tile.y, tile.y, tile.x, ext
            ),
            DiskLayout::Template(template) => template.render(tile),
        }
    }

    fn full_path(&self, tile: &Tile) -> PathBuf {
        self.base_dir.join(self.relative_path(tile))
    }

    fn blank_path(&self, color: [u8; 4], ext: &str) -> PathBuf {
        self.base_dir.join("blanks").join(format!(
            "{:02x}{:02x}{:02x}{:02x}.{}",
            color[3], color[0], color[1], color[2], ext
        ))
    }

    /// Reads a tile file by memory-mapping it on a blocking thread and
    /// copying the mapped bytes out before the mapping is dropped
    /// (`cache_disk.c`'s `apr_mmap`-backed read).
    async fn read_with_retry(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        for _ in 0..=self.creation_retry {
            let path = path.to_path_buf();
            let result = tokio::task::spawn_blocking(move || -> std::io::Result<Option<Vec<u8>>> {
                let file = match std::fs::File::open(&path) {
                    Ok(file) => file,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                    Err(e) => return Err(e),
                };
                let len = file.metadata()?.len();
                if len == 0 {
                    // Another writer is mid-write: treat as a miss.
                    return Ok(None);
                }
                // SAFETY: the file is owned exclusively by this blocking
                // closure and not concurrently truncated by this process;
                // another writer replaces tile files via `write_atomic`'s
                // remove-then-create, never an in-place truncate.
                let mmap = unsafe { memmap2::Mmap::map(&file)? };
                Ok(Some(mmap.to_vec()))
            })
            .await
            .map_err(|e| Error::internal(format!("disk cache read task panicked: {e}")))?;
            match result {
                Ok(bytes) => return Ok(bytes),
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl TileCache for DiskCache {
    async fn tile_get(&self, tile: &mut Tile) -> Result<CacheResult> {
        let path = self.full_path(tile);
        match self.read_with_retry(&path).await? {
            None => Ok(CacheResult::Miss),
            Some(bytes) => {
                let mtime = fs::metadata(&path).await.ok().and_then(|m| {
                    m.modified().ok().and_then(|t| t.duration_since(UNIX_EPOCH).ok()).map(|d| d.as_secs() as i64)
                });
                tile.encoded_data = Some(bytes::Bytes::from(bytes));
                tile.mtime = mtime;
                let auto_expire = tile.tileset.auto_expire;
                if auto_expire > 0 && tile.tileset.source.is_some() && !tile.tileset.read_only {
                    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
                    if mtime.map(|m| now - m >= auto_expire).unwrap_or(false) {
                        return Ok(CacheResult::Reload);
                    }
                }
                Ok(CacheResult::Hit)
            }
        }
    }

    async fn tile_set(&self, tile: &Tile) -> Result<()> {
        let path = self.full_path(tile);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let bytes = tile
            .encoded_data
            .clone()
            .ok_or_else(|| Error::internal("tile_set called without encoded data"))?;

        if self.symlink_blank && self.detect_blank {
            if let Some(color) = tile.raw_image.as_ref().and_then(|img| img.blank_color()) {
                let ext = tile.tileset.format.extension();
                let blank_path = self.blank_path(color, ext);
                if let Some(parent) = blank_path.parent() {
                    fs::create_dir_all(parent).await?;
                }
                if fs::metadata(&blank_path).await.is_err() {
                    write_atomic(&blank_path, &bytes).await?;
                }
                let _ = fs::remove_file(&path).await;
                let relative = pathdiff(&blank_path, path.parent().unwrap_or(&self.base_dir));
                #[cfg(unix)]
                {
                    tokio::fs::symlink(&relative, &path).await?;
                }
                #[cfg(not(unix))]
                {
                    fs::copy(&blank_path, &path).await?;
                }
                return Ok(());
            }
        }
        write_atomic(&path, &bytes).await
    }

    async fn tile_exists(&self, tile: &Tile) -> Result<bool> {
        Ok(fs::metadata(self.full_path(tile)).await.is_ok())
    }

    async fn tile_delete(&self, tile: &Tile) -> Result<()> {
        match fs::remove_file(self.full_path(tile)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn name(&self) -> &str {
        "disk"
    }
}

/// `remove -> create -> write -> close`: good enough atomicity for a
/// shared NFS cache directory (§4.2).
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let _ = fs::remove_file(path).await;
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    Ok(())
}

fn pathdiff(target: &Path, from: &Path) -> PathBuf {
    let target_components: Vec<_> = target.components().collect();
    let from_components: Vec<_> = from.components().collect();
    let common = target_components.iter().zip(from_components.iter()).take_while(|(a, b)| a == b).count();
    let mut out = PathBuf::new();
    for _ in common..from_components.len() {
        out.push("..");
    }
    for comp in &target_components[common..] {
        out.push(comp.as_os_str());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tileset;
    use crate::grid::Grid;
    use crate::tile::GridLink;
    use std::sync::Arc;

    fn fixture_tile(tmp: &tempfile::TempDir) -> (DiskCache, Tile) {
        let cache = DiskCache::new(tmp.path(), DiskLayout::TileCache);
        let grid = Arc::new(Grid::google_maps_compatible());
        let extent = grid.extent;
        let link = Arc::new(GridLink::new(grid, extent, 0).unwrap());
        let tileset = Arc::new(Tileset::new_for_test("osm", (2, 2), 0));
        let tile = Tile::new(tileset, link, 3, 4, 5);
        (cache, tile)
    }

    #[tokio::test]
    async fn miss_then_hit_after_set() {
        let tmp = tempfile::tempdir().unwrap();
        let (cache, mut tile) = fixture_tile(&tmp);
        assert_eq!(cache.tile_get(&mut tile).await.unwrap(), CacheResult::Miss);
        tile.encoded_data = Some(bytes::Bytes::from_static(b"pngbytes"));
        cache.tile_set(&tile).await.unwrap();
        assert_eq!(cache.tile_get(&mut tile).await.unwrap(), CacheResult::Hit);
        assert_eq!(tile.encoded_data.as_deref(), Some(&b"pngbytes"[..]));
    }

    #[tokio::test]
    async fn zero_length_file_is_a_miss() {
        let tmp = tempfile::tempdir().unwrap();
        let (cache, mut tile) = fixture_tile(&tmp);
        let path = cache.full_path(&tile);
        fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        fs::write(&path, b"").await.unwrap();
        assert_eq!(cache.tile_get(&mut tile).await.unwrap(), CacheResult::Miss);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let (cache, tile) = fixture_tile(&tmp);
        cache.tile_delete(&tile).await.unwrap();
        cache.tile_delete(&tile).await.unwrap();
    }

    #[test]
    fn tilecache_layout_uses_decimal_thousands_split() {
        let cache = DiskCache::new("/base", DiskLayout::TileCache);
        let grid = Arc::new(Grid::google_maps_compatible());
        let extent = grid.extent;
        let link = Arc::new(GridLink::new(grid, extent, 0).unwrap());
        let tileset = Arc::new(Tileset::new_for_test("osm", (1, 1), 0));
        // Above the old bit-mask scheme's 512 wraparound: x=1_234_567,
        // y=7_654_321 must split as millions/thousands/units, not bits.
        let tile = Tile::new(tileset, link, 18, 1_234_567, 7_654_321);
        assert_eq!(
            cache.relative_path(&tile),
            "osm/GoogleMapsCompatible/18/001/234/567/007/654/321.png"
        );
    }

    #[test]
    fn worldwind_layout_is_row_major_and_zero_padded() {
        let cache = DiskCache::new("/base", DiskLayout::WorldWind);
        let grid = Arc::new(Grid::google_maps_compatible());
        let extent = grid.extent;
        let link = Arc::new(GridLink::new(grid, extent, 0).unwrap());
        let tileset = Arc::new(Tileset::new_for_test("osm", (1, 1), 0));
        let tile = Tile::new(tileset, link, 5, 7, 42);
        assert_eq!(cache.relative_path(&tile), "osm/GoogleMapsCompatible/5/0042/0042_0007.png");
    }

    #[tokio::test]
    async fn template_layout_renders_and_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let template = PathTemplate("{tileset}/{grid}/{z}/{x}/{y}.{ext}".into());
        let cache = DiskCache::new(tmp.path(), DiskLayout::Template(template));
        let grid = Arc::new(Grid::google_maps_compatible());
        let extent = grid.extent;
        let link = Arc::new(GridLink::new(grid, extent, 0).unwrap());
        let tileset = Arc::new(Tileset::new_for_test("osm", (1, 1), 0));
        let mut tile = Tile::new(tileset, link, 3, 4, 5);
        assert_eq!(cache.relative_path(&tile), "osm/GoogleMapsCompatible/3/4/5.png");

        assert_eq!(cache.tile_get(&mut tile).await.unwrap(), CacheResult::Miss);
        tile.encoded_data = Some(bytes::Bytes::from_static(b"pngbytes"));
        cache.tile_set(&tile).await.unwrap();
        assert_eq!(cache.tile_get(&mut tile).await.unwrap(), CacheResult::Hit);
    }
}
