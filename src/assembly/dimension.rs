//! Dimension-assembly engine: expand a requested dimension value into its
//! cache-level sub-values, fetch each as a "subtile", and merge them into
//! one response (§4.6). Grounded on
//! `original_source/lib/tileset.c` (`tile_get_with_subdimensions`).

use crate::cache::CacheResult;
use crate::config::DimensionAssembly;
use crate::context::Context;
use crate::dimension::RequestedDimension;
use crate::error::Result;
use crate::image::RawImage;
use crate::tile::Tile;

/// Entry point for a tileset whose `dimension_assembly_type != None`
/// (§4.3 step 2 dispatches here).
pub async fn get(ctx: &Context, mut tile: Tile) -> Result<Tile> {
    // (1) a direct read keyed by the *requested* values, when configured.
    if tile.tileset.store_dimension_assemblies {
        if let Some(cache) = &tile.tileset.cache {
            if cache.tile_get(&mut tile).await? == CacheResult::Hit {
                return Ok(tile);
            }
        }
    }

    // (2) expand every dimension's requested value into its sub-values.
    let extent = tile.extent().ok();
    let mut per_dimension: Vec<Vec<String>> = Vec::with_capacity(tile.tileset.dimensions.len());
    for dim in &tile.tileset.dimensions {
        let requested = tile
            .dimensions
            .iter()
            .find(|d| d.name == dim.name())
            .ok_or_else(|| crate::error::Error::invalid_request(format!("missing dimension '{}'", dim.name())))?;
        let expanded = dim
            .validate_and_expand(&requested.requested_value, &tile.tileset.name, extent.as_ref(), Some(&tile.grid_link.grid))
            .await?;
        if expanded.is_empty() {
            // Empty expansion for any dimension means "no data" (§4.6 step 2).
            tile.nodata = true;
            if tile.tileset.store_dimension_assemblies {
                store_result(&tile, None).await?;
            }
            return Ok(tile);
        }
        per_dimension.push(expanded);
    }

    // (3) the Cartesian product of sub-values; each element is a subtile.
    let original_dimensions = tile.dimensions.clone();
    let mut combos: Vec<Vec<String>> = vec![Vec::new()];
    for values in &per_dimension {
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for v in values {
                let mut extended = combo.clone();
                extended.push(v.clone());
                next.push(extended);
            }
        }
        combos = next;
    }

    // (4) iterate in reverse order so earlier sub-values end up on top;
    // subdimension reads are read-only when configured, or when the
    // tileset has no source of its own (§4.6 step 4).
    let read_only_subs = tile.tileset.subdimension_read_only || tile.tileset.source.is_none();
    let mut accumulator: Option<RawImage> = None;
    let mut any_usable = false;
    let mut last_mtime: Option<i64> = None;

    for combo in combos.iter().rev() {
        let dims: Vec<RequestedDimension> = tile
            .tileset
            .dimensions
            .iter()
            .zip(combo.iter())
            .map(|(dim, value)| RequestedDimension::new(dim.name(), value.clone(), value.clone()))
            .collect();

        let mut subtile = Tile::new(tile.tileset.clone(), tile.grid_link.clone(), tile.z, tile.x, tile.y)
            .with_dimensions(dims);
        subtile.tileset = if read_only_subs {
            read_only_view(&tile.tileset)
        } else {
            tile.tileset.clone()
        };

        let fetched = crate::metatile::leaf_fetch(ctx, subtile).await?;
        if fetched.nodata {
            continue;
        }
        any_usable = true;
        last_mtime = fetched.mtime.or(last_mtime);
        let raw = decode(&fetched)?;
        match accumulator.as_mut() {
            None => accumulator = Some(raw),
            Some(acc) => {
                if tile.tileset.dimension_assembly == DimensionAssembly::Stack {
                    acc.composite_over(&raw, 0, 0);
                } else {
                    // Animate: the codec owns frame sequencing; this core
                    // keeps only the topmost frame as the still preview
                    // while the encoder — out of scope here — would be
                    // handed the full `frames` list in a real server.
                    acc.composite_over(&raw, 0, 0);
                }
            }
        }
        // Stop early once fully opaque (JPEG or alpha=No tilesets never
        // need more layers underneath, §4.6 step 4): nothing beneath an
        // opaque accumulator can show through regardless of output format.
        if accumulator.as_ref().map(|a| a.is_opaque()).unwrap_or(false) {
            break;
        }
    }

    if !any_usable {
        tile.nodata = true;
        if tile.tileset.store_dimension_assemblies {
            store_result(&tile, None).await?;
        }
        return Ok(tile);
    }

    let merged = accumulator.expect("any_usable implies at least one accumulated image");
    let encoded = tile.tileset.format.encode(&merged)?;
    tile.raw_image = Some(merged);
    tile.encoded_data = Some(encoded);
    tile.mtime = last_mtime;
    tile.nodata = false;
    tile.dimensions = original_dimensions;

    // (6) store the merged result under the originally requested key.
    if tile.tileset.store_dimension_assemblies {
        store_result(&tile, Some(&tile)).await?;
    }

    Ok(tile)
}

async fn store_result(tile: &Tile, rendered: Option<&Tile>) -> Result<()> {
    let cache = match &tile.tileset.cache {
        Some(c) => c,
        None => return Ok(()),
    };
    match rendered {
        Some(t) => cache.tile_set(t).await,
        None => {
            let mut blank = tile.clone();
            blank.nodata = true;
            blank.encoded_data = Some(tile.tileset.format.create_empty_image(
                tile.grid_link.grid.tile_sx,
                tile.grid_link.grid.tile_sy,
                [0, 0, 0, 0],
            )?);
            cache.tile_set(&blank).await
        }
    }
}

fn decode(tile: &Tile) -> Result<RawImage> {
    if let Some(raw) = &tile.raw_image {
        return Ok(raw.clone());
    }
    let bytes = tile
        .encoded_data
        .as_ref()
        .ok_or_else(|| crate::error::Error::internal("subtile has neither raw nor encoded data"))?;
    tile.tileset.format.decode(bytes)
}

/// A read-only view of `tileset` for subdimension fetches that must not
/// write back to the shared cache (§4.6 step 4 `read_only =
/// subdimension_read_only || source == None`).
fn read_only_view(tileset: &std::sync::Arc<crate::config::Tileset>) -> std::sync::Arc<crate::config::Tileset> {
    if tileset.read_only {
        return tileset.clone();
    }
    std::sync::Arc::new(crate::config::Tileset {
        name: tileset.name.clone(),
        cache: tileset.cache.clone(),
        source: tileset.source.clone(),
        grid_links: tileset.grid_links.clone(),
        format: tileset.format.clone(),
        metasize: tileset.metasize,
        metabuffer: tileset.metabuffer,
        expires: tileset.expires,
        auto_expire: tileset.auto_expire,
        read_only: true,
        dimensions: tileset.dimensions.clone(),
        dimension_assembly: tileset.dimension_assembly,
        store_dimension_assemblies: tileset.store_dimension_assemblies,
        subdimension_read_only: tileset.subdimension_read_only,
        watermark: tileset.watermark.clone(),
        resample_mode: tileset.resample_mode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tileset;
    use crate::dimension::ValuesDimension;
    use crate::grid::Grid;
    use crate::tile::GridLink;
    use std::sync::Arc;

    fn fixture() -> (Arc<crate::config::Tileset>, Arc<GridLink>) {
        let grid = Arc::new(Grid::google_maps_compatible());
        let extent = grid.extent;
        let link = Arc::new(GridLink::new(grid, extent, 0).unwrap());
        let mut tileset = Tileset::new_for_test("osm", (1, 1), 0);
        tileset.dimensions = vec![Arc::new(ValuesDimension::new("STYLE", vec!["a".into(), "b".into()], true))];
        tileset.dimension_assembly = DimensionAssembly::Stack;
        (Arc::new(tileset), link)
    }

    #[tokio::test]
    async fn empty_expansion_is_nodata() {
        let (tileset, link) = fixture();
        let ctx = Context::new(crate::config::Config::empty());
        let mut tile = Tile::new(tileset, link, 3, 4, 5);
        tile.dimensions = vec![RequestedDimension::new("STYLE", "unknown-value-that-fails", "")];
        let err = get(&ctx, tile).await;
        // ValuesDimension rejects unknown values rather than expanding to
        // empty, so this exercises the propagate-the-error path.
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn sourceless_tileset_subtiles_are_nodata_overall() {
        let (tileset, link) = fixture();
        let ctx = Context::new(crate::config::Config::empty());
        let mut tile = Tile::new(tileset, link, 3, 4, 5);
        tile.dimensions = vec![RequestedDimension::new("STYLE", "a", "")];
        let result = get(&ctx, tile).await.unwrap();
        assert!(result.nodata);
    }
}
