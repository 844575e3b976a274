//! Out-of-zoom reassembly: synthesize a tile above a grid-link's
//! `max_cached_zoom` from cached lower-zoom tiles, or proxy it straight to
//! the source (§4.4). Grounded on
//! `original_source/lib/tileset.c` (`assemble_out_of_zoom_tile`) and the
//! teacher's `src/generation/overzooming.rs` shape.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::image::RawImage;
use crate::metatile::resample_mode_for_scale;
use crate::tile::{Map, OutOfZoomStrategy, Tile};

/// Entry point for a tile whose `z` exceeds its grid-link's
/// `max_cached_zoom` (§4.3 step 1 dispatches here).
pub async fn get(ctx: &Context, mut tile: Tile) -> Result<Tile> {
    match tile.grid_link.out_of_zoom_strategy {
        OutOfZoomStrategy::Proxy => proxy(ctx, tile).await,
        OutOfZoomStrategy::Reassemble => reassemble(ctx, &mut tile).await.map(|_| tile),
        OutOfZoomStrategy::NotConfigured => Err(Error::not_found(format!(
            "tile z={} exceeds max_cached_zoom with no out-of-zoom strategy configured",
            tile.z
        ))),
    }
}

/// Forward the equivalent request straight to the source; never cached
/// (§4.4). Non-blocking contexts must refuse rather than issue the
/// upstream call.
async fn proxy(ctx: &Context, mut tile: Tile) -> Result<Tile> {
    if !ctx.is_blocking() {
        return Err(Error::not_found("out-of-zoom proxy requires a blocking context"));
    }
    let source = tile
        .tileset
        .source
        .as_ref()
        .ok_or_else(|| Error::internal("out-of-zoom proxy requires a configured source"))?;
    let extent = tile.extent()?;
    let grid = &tile.grid_link.grid;
    let map = Map::new(tile.tileset.clone(), tile.grid_link.clone(), extent, grid.tile_sx, grid.tile_sy);
    let raw = source.render_map(&map).await?;
    let encoded = tile.tileset.format.encode(&raw)?;
    tile.raw_image = Some(raw);
    tile.encoded_data = Some(encoded);
    Ok(tile)
}

/// Reassemble a high-zoom tile from up to four covering tiles at
/// `max_cached_zoom` (§4.4). The target extent is shrunk by a sliver
/// before mapping corners onto tile coordinates so that an exact boundary
/// doesn't round outward into a fifth neighbor tile.
async fn reassemble(ctx: &Context, tile: &mut Tile) -> Result<()> {
    let max_cached_zoom = tile
        .grid_link
        .max_cached_zoom
        .ok_or_else(|| Error::internal("Reassemble strategy requires max_cached_zoom"))?;
    let target_extent = tile.extent()?;
    let grid = tile.grid_link.grid.clone();
    let target_level = grid.level(tile.z)?;
    let source_level = grid.level(max_cached_zoom)?;
    let scale_factor = source_level.resolution / target_level.resolution;

    // Shrink by a sliver (a thousandth of a source pixel) on every side so
    // an exactly-aligned boundary doesn't round onto a fifth tile.
    let epsilon = source_level.resolution / 1000.0;
    let shrunk = crate::grid::Extent::new(
        target_extent.min_x + epsilon,
        target_extent.min_y + epsilon,
        target_extent.max_x - epsilon,
        target_extent.max_y - epsilon,
    );

    let corners = [
        (shrunk.min_x, shrunk.min_y),
        (shrunk.max_x, shrunk.min_y),
        (shrunk.min_x, shrunk.max_y),
        (shrunk.max_x, shrunk.max_y),
    ];
    let mut covering = Vec::new();
    for (px, py) in corners {
        let coord = grid.tile_at_point(px, py, max_cached_zoom)?;
        if !covering.contains(&coord) {
            covering.push(coord);
        }
    }

    let mut fetched = Vec::with_capacity(covering.len());
    for (cx, cy) in covering {
        if !tile.grid_link.is_valid(cx, cy, max_cached_zoom) {
            continue;
        }
        let sub = Tile::new(tile.tileset.clone(), tile.grid_link.clone(), max_cached_zoom, cx, cy)
            .with_dimensions(tile.dimensions.clone());
        let fetched_tile = crate::metatile::tile_get(ctx, sub).await?;
        fetched.push(fetched_tile);
    }

    if fetched.is_empty() || fetched.iter().all(|t| t.nodata) {
        tile.nodata = true;
        return Ok(());
    }

    let grid_sx = grid.tile_sx;
    let grid_sy = grid.tile_sy;
    let mode = resample_mode_for_scale(scale_factor, grid_sx);
    let mut output: Option<RawImage> = None;

    for covering_tile in fetched.iter() {
        if covering_tile.nodata {
            continue;
        }
        let covering_extent = covering_tile.extent()?;
        let overlap = match covering_extent.intersection(&target_extent) {
            Some(o) => o,
            None => continue,
        };
        let raw = decode_tile(&covering_tile)?;

        let src = pixel_rect(&covering_extent, &overlap, source_level.resolution, &grid.origin, grid_sx, grid_sy);
        let dst = pixel_rect(&target_extent, &overlap, target_level.resolution, &grid.origin, grid_sx, grid_sy);
        if src.2 == 0 || src.3 == 0 || dst.2 == 0 || dst.3 == 0 {
            continue;
        }
        let cropped = raw.sub_rect(src.0, src.1, src.2, src.3);
        let resampled = cropped.resample_into(dst.2, dst.3, mode);

        let canvas = output.get_or_insert_with(|| RawImage::transparent(grid_sx, grid_sy));
        canvas.composite_over(&resampled, dst.0 as i64, dst.1 as i64);
    }

    match output {
        Some(img) => {
            let encoded = tile.tileset.format.encode(&img)?;
            tile.encoded_data = Some(encoded);
            tile.raw_image = Some(img);
            tile.nodata = false;
        }
        None => tile.nodata = true,
    }
    Ok(())
}

fn decode_tile(tile: &Tile) -> Result<RawImage> {
    if let Some(raw) = &tile.raw_image {
        return Ok(raw.clone());
    }
    let bytes = tile
        .encoded_data
        .as_ref()
        .ok_or_else(|| Error::internal("covering tile has neither raw nor encoded data"))?;
    tile.tileset.format.decode(bytes)
}

/// Map a sub-extent of a tile's own extent into pixel coordinates
/// `(x, y, width, height)` within that tile's `tile_sx x tile_sy` image.
fn pixel_rect(
    tile_extent: &crate::grid::Extent,
    sub: &crate::grid::Extent,
    resolution: f64,
    origin: &crate::grid::Origin,
    tile_sx: u32,
    tile_sy: u32,
) -> (u32, u32, u32, u32) {
    let to_px = |v: f64| (v / resolution).round().max(0.0) as u32;
    let x0 = to_px(sub.min_x - tile_extent.min_x).min(tile_sx);
    let x1 = to_px(sub.max_x - tile_extent.min_x).min(tile_sx);
    let (y0, y1) = match origin {
        crate::grid::Origin::TopLeft => (
            to_px(tile_extent.max_y - sub.max_y).min(tile_sy),
            to_px(tile_extent.max_y - sub.min_y).min(tile_sy),
        ),
        _ => (
            to_px(sub.min_y - tile_extent.min_y).min(tile_sy),
            to_px(sub.max_y - tile_extent.min_y).min(tile_sy),
        ),
    };
    (x0.min(x1), y0.min(y1), x1.saturating_sub(x0), y1.saturating_sub(y0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tileset;
    use crate::grid::Grid;
    use crate::tile::GridLink;
    use std::sync::Arc;

    #[test]
    fn scale_factor_for_scenario_3_picks_bilinear() {
        let grid = Grid::google_maps_compatible();
        let l10 = grid.level(10).unwrap();
        let l12 = grid.level(12).unwrap();
        let scale = l10.resolution / l12.resolution;
        assert_eq!(scale, 4.0);
        assert_eq!(resample_mode_for_scale(scale, grid.tile_sx), crate::image::ResampleMode::Bilinear);
    }

    #[tokio::test]
    async fn not_configured_strategy_is_an_error() {
        let grid = Arc::new(Grid::google_maps_compatible());
        let extent = grid.extent;
        let mut link = GridLink::new(grid, extent, 0).unwrap();
        link.max_z = 20;
        link.max_cached_zoom = Some(10);
        link.out_of_zoom_strategy = crate::tile::OutOfZoomStrategy::NotConfigured;
        let link = Arc::new(link);
        let tileset = Arc::new(Tileset::new_for_test("osm", (1, 1), 0));
        let ctx = Context::new(crate::config::Config::empty());
        let tile = Tile::new(tileset, link, 12, 100, 200);
        let err = get(&ctx, tile).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
