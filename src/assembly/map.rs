//! WMS full-image assembly: pick a level, fetch the covering tiles, paint
//! and resample into an arbitrary client extent (§4.5). Grounded on
//! `original_source/lib/tileset.c` (`get_map_tiles`, `assemble_map_tiles`).

use crate::context::Context;
use crate::error::Result;
use crate::image::{RawImage, ResampleMode};
use crate::tile::{GridLink, Map, Tile};
use std::sync::Arc;

/// Pick the grid-link/level combination closest to `map`'s implied
/// resolution across the primary grid-link and its intermediate grids
/// (§4.5 step 1). Clamps to `max_cached_zoom` when the winning link is in
/// reassemble mode and the natural pick would exceed it.
fn pick_level(grid_link: &Arc<GridLink>, resolution: f64) -> Result<u16> {
    let primary_z = grid_link.grid.best_level(resolution)?;
    let mut best_resolution = grid_link.grid.level(primary_z)?.resolution;

    for intermediate in &grid_link.intermediate_grids {
        let cand_z = match intermediate.grid.best_level(resolution) {
            Ok(z) => z,
            Err(_) => continue,
        };
        let Ok(cand_level) = intermediate.grid.level(cand_z) else { continue };
        if (cand_level.resolution - resolution).abs() < (best_resolution - resolution).abs() {
            best_resolution = cand_level.resolution;
        }
    }

    // Tiles are always fetched from the primary grid-link; an intermediate
    // grid only informs which resolution to target.
    let mut z = grid_link.grid.best_level(best_resolution)?;
    if let Some(max_cached) = grid_link.max_cached_zoom {
        if matches!(grid_link.out_of_zoom_strategy, crate::tile::OutOfZoomStrategy::Reassemble) && z > max_cached {
            z = max_cached;
        }
    }
    Ok(z)
}

/// Assemble `map.extent`/`width`/`height` from the cached tile grid
/// (§4.5). Out-of-bounds covering tiles are silently dropped so partially
/// out-of-bounds maps are still served; an empty covering set returns a
/// fully transparent image.
pub async fn assemble(ctx: &Context, map: &mut Map) -> Result<()> {
    let resolution = map.resolution();
    let grid_link = map.grid_link.clone();
    let z = pick_level(&grid_link, resolution)?;
    let level = grid_link.grid.level(z)?;
    let grid = &grid_link.grid;

    let box_limits = grid.compute_limits_at_level(&map.extent, z, 0)?;
    let limit = grid_link.limits_at(z).copied().unwrap_or(box_limits);
    let min_x = box_limits.min_x.max(limit.min_x);
    let min_y = box_limits.min_y.max(limit.min_y);
    let max_x = (box_limits.max_x - 1).min(limit.max_x - 1);
    let max_y = (box_limits.max_y - 1).min(limit.max_y - 1);

    let mut fetched: Vec<Tile> = Vec::new();
    if min_x <= max_x && min_y <= max_y {
        for y in min_y..=max_y {
            for x in min_x..=max_x {
                if !grid_link.is_valid(x, y, z) {
                    continue;
                }
                let tile = Tile::new(map.tileset.clone(), grid_link.clone(), z, x, y)
                    .with_dimensions(map.dimensions.clone());
                match crate::metatile::tile_get(ctx, tile).await {
                    Ok(t) if !t.nodata => fetched.push(t),
                    _ => {}
                }
            }
        }
    }

    if fetched.is_empty() {
        map.raw_image = Some(RawImage::transparent(map.width, map.height));
        return Ok(());
    }

    let src_min_x = fetched.iter().map(|t| t.x).min().unwrap();
    let src_min_y = fetched.iter().map(|t| t.y).min().unwrap();
    let src_max_x = fetched.iter().map(|t| t.x).max().unwrap();
    let src_max_y = fetched.iter().map(|t| t.y).max().unwrap();

    let canvas_w = (src_max_x - src_min_x + 1) as u32 * grid.tile_sx;
    let canvas_h = (src_max_y - src_min_y + 1) as u32 * grid.tile_sy;
    let mut canvas = RawImage::transparent(canvas_w, canvas_h);
    for tile in &fetched {
        let raw = decode(tile)?;
        let dst_x = (tile.x - src_min_x) as i64 * grid.tile_sx as i64;
        let dst_y = (tile.y - src_min_y) as i64 * grid.tile_sy as i64;
        canvas.composite_over(&raw, dst_x, dst_y);
    }

    // Pixel offset of the top-left covering tile within the client image,
    // and the scale factors between tile resolution and client resolution
    // (§4.5 step 6).
    let top_left_extent = grid.tile_extent(src_min_x, src_min_y, z)?;
    let dst_min_x = ((top_left_extent.min_x - map.extent.min_x) / resolution).round() as i64;
    let dst_min_y = ((map.extent.max_y - top_left_extent.max_y) / resolution).round() as i64;

    let client_h_res = map.extent.width() / map.width as f64;
    let client_v_res = map.extent.height() / map.height as f64;
    let hf = level.resolution / client_h_res;
    let vf = level.resolution / client_v_res;

    let mode = if (hf - 1.0).abs() < 1e-4 && (vf - 1.0).abs() < 1e-4 {
        ResampleMode::Nearest
    } else {
        map.tileset.resample_mode
    };

    let stretched = canvas.resample_into(
        (canvas_w as f64 * hf).round().max(1.0) as u32,
        (canvas_h as f64 * vf).round().max(1.0) as u32,
        mode,
    );

    let mut out = RawImage::transparent(map.width, map.height);
    out.composite_over(&stretched, dst_min_x, dst_min_y);
    let encoded = map.tileset.format.encode(&out)?;
    map.raw_image = Some(out);
    map.encoded_data = Some(encoded);
    Ok(())
}

fn decode(tile: &Tile) -> Result<RawImage> {
    if let Some(raw) = &tile.raw_image {
        return Ok(raw.clone());
    }
    let bytes = tile
        .encoded_data
        .as_ref()
        .ok_or_else(|| crate::error::Error::internal("fetched tile has neither raw nor encoded data"))?;
    tile.tileset.format.decode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tileset;
    use crate::grid::{Extent, Grid};
    use std::sync::Arc;

    #[tokio::test]
    async fn empty_covering_set_returns_transparent_image() {
        let grid = Arc::new(Grid::google_maps_compatible());
        let extent = grid.extent;
        let link = Arc::new(GridLink::new(grid, extent, 0).unwrap());
        let tileset = Arc::new(Tileset::new_for_test("osm", (1, 1), 0));
        let ctx = Context::new(crate::config::Config::empty());
        let mut map = Map::new(tileset, link, Extent::new(0.0, 0.0, 100.0, 100.0), 64, 64);
        assemble(&ctx, &mut map).await.unwrap();
        let img = map.raw_image.unwrap();
        assert_eq!((img.width, img.height), (64, 64));
        assert_eq!(img.blank_color(), Some([0, 0, 0, 0]));
    }
}
