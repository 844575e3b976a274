//! KML service (§6): `/kml/{layer}[@{grid}]/{z}/{x}/{y}.kml`, producing a
//! SuperOverlay document that references the tile image and its four
//! higher-zoom children, letting Google Earth progressively refine.

use super::{split_extension, TileRequest};
use crate::error::{Error, Result};
use crate::grid::{Extent, Grid, Unit};

/// Parse a KML path (the part after `/kml/`); same grammar as TMS but the
/// extension is always `kml` and never selects the tile format.
pub fn parse_tile_path(path: &str) -> Result<TileRequest> {
    let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
    if parts.len() != 4 {
        return Err(Error::invalid_request("KML path must be {layer}[@{grid}]/{z}/{x}/{y}.kml"));
    }
    let (layer_part, z_str, x_str, y_ext) = (parts[0], parts[1], parts[2], parts[3]);
    let (tileset, grid) = match layer_part.split_once('@') {
        Some((t, g)) => (t.to_string(), Some(g.to_string())),
        None => (layer_part.to_string(), None),
    };
    let z: u16 = z_str.parse().map_err(|_| Error::invalid_request("invalid KML z"))?;
    let x: i64 = x_str.parse().map_err(|_| Error::invalid_request("invalid KML x"))?;
    let (y_str, ext) = split_extension(y_ext)?;
    if !ext.eq_ignore_ascii_case("kml") {
        return Err(Error::invalid_request("KML path must end in .kml"));
    }
    let y: i64 = y_str.parse().map_err(|_| Error::invalid_request("invalid KML y"))?;
    Ok(TileRequest { tileset, grid, z, x, y, dimensions: Vec::new(), extension: "kml".to_string() })
}

/// Convert a grid extent to a WGS84 lat/lon box for the `<LatLonBox>`
/// element. Degrees grids pass through unchanged; meters grids are
/// assumed Web-Mercator-compatible (the only meters grid this crate
/// ships, §4.1 `google_maps_compatible`) and use the standard spherical
/// Mercator inverse. Any other unit is a configuration error the XML
/// loader should have already rejected for a KML-enabled tileset.
fn to_latlon_box(extent: &Extent, unit: Unit) -> Result<(f64, f64, f64, f64)> {
    match unit {
        Unit::Degrees => Ok((extent.max_y, extent.min_y, extent.max_x, extent.min_x)),
        Unit::Meters => {
            let to_lonlat = |x: f64, y: f64| -> (f64, f64) {
                const R: f64 = 6378137.0;
                let lon = x / R * 180.0 / std::f64::consts::PI;
                let lat = (2.0 * (y / R).exp().atan() - std::f64::consts::FRAC_PI_2) * 180.0
                    / std::f64::consts::PI;
                (lon, lat)
            };
            let (west, south) = to_lonlat(extent.min_x, extent.min_y);
            let (east, north) = to_lonlat(extent.max_x, extent.max_y);
            Ok((north, south, east, west))
        }
        Unit::Feet => Err(Error::invalid_request("KML requires a degrees or meters grid")),
    }
}

/// Build the SuperOverlay KML document for `(tileset, grid, z, x, y)`:
/// a `<GroundOverlay>` referencing the tile image plus up to four
/// `<NetworkLink>`s to the next-zoom children, each gated by a
/// `<Region>`/`<Lod>` so Earth only fetches them once visible.
pub fn build_superoverlay(
    tileset: &str,
    grid_name: Option<&str>,
    grid: &Grid,
    z: u16,
    x: i64,
    y: i64,
    image_ext: &str,
    base_url: &str,
) -> Result<String> {
    grid.level(z)?;
    let extent = grid.tile_extent(x, y, z)?;
    let (north, south, east, west) = to_latlon_box(&extent, grid.unit)?;
    let layer_path = match grid_name {
        Some(g) => format!("{tileset}@{g}"),
        None => tileset.to_string(),
    };

    let mut children = String::new();
    if grid.level(z + 1).is_ok() {
        for (cx, cy) in [(2 * x, 2 * y), (2 * x + 1, 2 * y), (2 * x, 2 * y + 1), (2 * x + 1, 2 * y + 1)] {
            if let Ok(child_extent) = grid.tile_extent(cx, cy, z + 1) {
                if let Ok((cn, cs, ce, cw)) = to_latlon_box(&child_extent, grid.unit) {
                    children.push_str(&format!(
                        r#"  <NetworkLink>
    <name>{cx}_{cy}_{cz}</name>
    <Region>
      <LatLonAltBox><north>{cn}</north><south>{cs}</south><east>{ce}</east><west>{cw}</west></LatLonAltBox>
      <Lod><minLodPixels>128</minLodPixels><maxLodPixels>-1</maxLodPixels></Lod>
    </Region>
    <Link>
      <href>{base_url}/kml/{layer_path}/{cz}/{cx}/{cy}.kml</href>
      <viewRefreshMode>onRegion</viewRefreshMode>
    </Link>
  </NetworkLink>
"#,
                        cz = z + 1
                    ));
                }
            }
        }
    }

    Ok(format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
<Document>
  <name>{tileset}_{z}_{x}_{y}</name>
  <Region>
    <LatLonAltBox><north>{north}</north><south>{south}</south><east>{east}</east><west>{west}</west></LatLonAltBox>
    <Lod><minLodPixels>128</minLodPixels><maxLodPixels>-1</maxLodPixels></Lod>
  </Region>
  <GroundOverlay>
    <drawOrder>{z}</drawOrder>
    <Icon><href>{base_url}/tms/1.0.0/{layer_path}/{z}/{x}/{y}.{image_ext}</href></Icon>
    <LatLonBox><north>{north}</north><south>{south}</south><east>{east}</east><west>{west}</west></LatLonBox>
  </GroundOverlay>
{children}</Document>
</kml>"#
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_layer_and_rejects_non_kml_extension() {
        let req = parse_tile_path("osm@GoogleMapsCompatible/3/4/5.kml").unwrap();
        assert_eq!(req.tileset, "osm");
        assert_eq!(req.grid.as_deref(), Some("GoogleMapsCompatible"));
        assert!(parse_tile_path("osm/3/4/5.png").is_err());
    }

    #[test]
    fn superoverlay_references_four_children() {
        let grid = Grid::google_maps_compatible();
        let doc = build_superoverlay("osm", None, &grid, 3, 4, 5, "png", "http://localhost").unwrap();
        assert!(doc.contains("GroundOverlay"));
        assert_eq!(doc.matches("NetworkLink").count(), 8); // open+close per child x4
    }

    #[test]
    fn degrees_extent_passes_through_unchanged() {
        let grid = Grid::wgs84();
        let extent = Extent::new(-180.0, -90.0, 0.0, 0.0);
        let (north, south, east, west) = to_latlon_box(&extent, grid.unit).unwrap();
        assert_eq!((north, south, east, west), (0.0, -90.0, 0.0, -180.0));
    }
}
