//! Metatile engine and tile-fetch orchestrator (§4.3). Grounded on
//! `original_source/lib/tileset.c` (`metatile_get`, `render_metatile`,
//! `tile_get`): the entry point for every tile request — dispatches to
//! out-of-zoom reassembly or dimension assembly when configured, otherwise
//! resolves dimensions once and runs the single-flight leaf fetch.

use crate::cache::CacheResult;
use crate::config::DimensionAssembly;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::image::ResampleMode;
use crate::locker::{self, LockStatus};
use crate::tile::{Map, MetaTile, Tile};
use std::time::{SystemTime, UNIX_EPOCH};

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64
}

/// Resolve every tileset dimension against the tile's requested values,
/// requiring exactly one cache-key sub-value per dimension (§4.3 step 3:
/// "more than one is an error in this path" — multi-value expansion is
/// only legal on the dimension-assembly path, §4.6).
pub(crate) async fn resolve_single_valued_dimensions(tile: &mut Tile) -> Result<()> {
    for dim in &tile.tileset.dimensions {
        let requested = tile
            .dimensions
            .iter_mut()
            .find(|d| d.name == dim.name())
            .ok_or_else(|| Error::invalid_request(format!("missing dimension '{}'", dim.name())))?;
        let extent = tile.extent().ok();
        let expanded = dim
            .validate_and_expand(&requested.requested_value, &tile.tileset.name, extent.as_ref(), Some(&tile.grid_link.grid))
            .await?;
        if expanded.len() != 1 {
            return Err(Error::invalid_request(format!(
                "dimension '{}' expanded to {} sub-values outside an assembly tileset",
                dim.name(),
                expanded.len()
            )));
        }
        requested.cached_value = expanded.into_iter().next().unwrap();
    }
    Ok(())
}

/// The tile-get protocol's top-level dispatch (§4.3 "Tile get protocol"):
/// out-of-zoom delegation, then dimension-assembly delegation, then the
/// single-valued leaf fetch.
pub async fn tile_get(ctx: &Context, mut tile: Tile) -> Result<Tile> {
    if tile.grid_link.is_out_of_zoom(tile.z) {
        return crate::assembly::overzoom::get(ctx, tile).await;
    }
    if tile.tileset.dimension_assembly != DimensionAssembly::None && !tile.tileset.dimensions.is_empty() {
        return crate::assembly::dimension::get(ctx, tile).await;
    }
    resolve_single_valued_dimensions(&mut tile).await?;
    leaf_fetch(ctx, tile).await
}

/// Leaf fetch (§4.3 steps a-g): cache lookup, miss/reload handling,
/// single-flight render via the metatile lock, re-read, expiry.
pub async fn leaf_fetch(ctx: &Context, mut tile: Tile) -> Result<Tile> {
    let cache = match &tile.tileset.cache {
        Some(c) => c.clone(),
        None => {
            tile.nodata = true;
            return Ok(tile);
        }
    };

    let stale_encoded = tile.encoded_data.clone();
    let stale_mtime = tile.mtime;

    let result = cache.tile_get(&mut tile).await?;
    let needs_render = match result {
        CacheResult::Hit => false,
        CacheResult::Miss => true,
        CacheResult::Reload => true,
    };

    if needs_render {
        // (b) source-less or read-only tilesets, and non-blocking contexts,
        // never render: serve nodata (miss) or the stale hit (reload).
        if tile.tileset.source.is_none() || tile.tileset.read_only || !ctx.is_blocking() {
            if result == CacheResult::Reload {
                // (f) reload but not acquired/attempted: keep serving stale.
                return Ok(tile);
            }
            tile.nodata = true;
            return Ok(tile);
        }

        let config = ctx.config();
        let metatile = MetaTile::covering(&tile)?;
        let resource = metatile.resource_key(&tile.dimensions);
        let status =
            locker::acquire_with_retry(ctx.locker().as_ref(), &resource, config.lock_timeout, config.lock_retry)
                .await?;

        match status {
            LockStatus::Acquired => {
                let render_result = render_and_store(ctx, &metatile, &tile.dimensions).await;
                // Release on every exit path, including errors (§4.3(d), §7).
                ctx.locker().release(&resource).await?;
                render_result?;
                match cache.tile_get(&mut tile).await {
                    Ok(_) => {}
                    Err(_) => {
                        // (e) keep the previously fetched stale hit rather
                        // than failing the whole request.
                        tile.encoded_data = stale_encoded;
                        tile.mtime = stale_mtime;
                    }
                }
            }
            LockStatus::Locked => {
                // acquire_with_retry only returns this if the caller passed
                // a zero retry budget; treat as "re-read once and give up".
                let _ = cache.tile_get(&mut tile).await;
            }
            LockStatus::NoEntry => {
                // Someone else finished rendering; re-read.
                let _ = cache.tile_get(&mut tile).await;
            }
        }
    }

    // (g) expiry: auto_expire-derived if we have an mtime, else the
    // tileset's client-visible `expires`.
    let now = now_secs();
    tile.expires = match (tile.tileset.auto_expire, tile.mtime) {
        (auto_expire, Some(mtime)) if auto_expire > 0 => Some(mtime + auto_expire - now),
        _ => Some(tile.tileset.expires),
    };

    Ok(tile)
}

/// Render a metatile via its tileset's source, split into child tiles,
/// detect blanks, optionally watermark, encode, and store (§4.3 step d).
async fn render_and_store(
    ctx: &Context,
    metatile: &MetaTile,
    dimensions: &[crate::dimension::RequestedDimension],
) -> Result<()> {
    let tileset = &metatile.tileset;
    let source = tileset
        .source
        .as_ref()
        .ok_or_else(|| Error::internal("render_and_store called on a source-less tileset"))?;

    let (pw, ph) = metatile.pixel_size();
    let extent = metatile.map_extent()?;
    let map = Map::new(tileset.clone(), metatile.grid_link.clone(), extent, pw, ph);
    let rendered = source.render_map(&map).await?;

    let grid = &metatile.grid_link.grid;
    let mut children = Vec::with_capacity(metatile.ntiles() as usize);
    for (dx_idx, dy_idx) in (0..metatile.actual_y).flat_map(|dy| (0..metatile.actual_x).map(move |dx| (dx, dy))) {
        let x = metatile.base_x() + dx_idx as i64;
        let y = metatile.base_y() + dy_idx as i64;
        let src_x = dx_idx * grid.tile_sx + metatile.metabuffer;
        let src_y = dy_idx * grid.tile_sy + metatile.metabuffer;
        let mut raw = rendered.sub_rect(src_x, src_y, grid.tile_sx, grid.tile_sy);

        if let Some(watermark) = &tileset.watermark {
            raw.composite_over(watermark, 0, 0);
        }

        let nodata = raw.blank_color().is_some();
        let encoded = tileset.format.encode(&raw)?;

        let mut child = Tile::new(tileset.clone(), metatile.grid_link.clone(), metatile.z, x, y);
        child.dimensions = dimensions.to_vec();
        child.raw_image = Some(raw);
        child.encoded_data = Some(encoded);
        child.mtime = Some(now_secs());
        child.nodata = nodata;
        children.push(child);
    }

    if let Some(cache) = &tileset.cache {
        cache.tile_multi_set(&children).await?;
    }
    Ok(())
}

/// Shared nearest-vs-bilinear decision used by both map assembly (§4.5)
/// and out-of-zoom reassembly (§4.4): bilinear once the scale factor is at
/// least half a tile wide, nearest-neighbor otherwise (avoids rounding
/// artifacts at extreme scale-up).
pub(crate) fn resample_mode_for_scale(scale_factor: f64, tile_sx: u32) -> ResampleMode {
    if scale_factor <= tile_sx as f64 / 2.0 {
        ResampleMode::Bilinear
    } else {
        ResampleMode::Nearest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tileset;
    use crate::grid::Grid;
    use crate::tile::GridLink;
    use std::sync::Arc;

    #[tokio::test]
    async fn sourceless_tileset_returns_nodata_on_miss() {
        let grid = Arc::new(Grid::google_maps_compatible());
        let extent = grid.extent;
        let link = Arc::new(GridLink::new(grid, extent, 0).unwrap());
        let tileset = Arc::new(Tileset::new_for_test("osm", (1, 1), 0));
        let ctx = Context::new(crate::config::Config::empty());
        let tile = Tile::new(tileset, link, 3, 4, 5);
        let result = leaf_fetch(&ctx, tile).await.unwrap();
        assert!(result.nodata);
    }

    #[test]
    fn resample_mode_matches_scenario_3() {
        // Scenario 3: scale factor 4 <= tile_sx/2 = 128 -> bilinear.
        assert_eq!(resample_mode_for_scale(4.0, 256), ResampleMode::Bilinear);
        assert_eq!(resample_mode_for_scale(200.0, 256), ResampleMode::Nearest);
    }
}
