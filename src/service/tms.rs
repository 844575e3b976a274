//! TMS service (§6): `/tms/1.0.0/{layer}[@{grid}]/{z}/{x}/{y}.{ext}`,
//! optional `reverse_y`. Grounded on §6's TMS path grammar.

use super::{split_extension, TileRequest};
use crate::error::{Error, Result};

/// Parse a TMS tile path (the part after `/tms/1.0.0/`). `reverse_y`
/// flips `y` to `max_y - 1 - y` relative to `level_max_y`, matching the
/// original's `reverse_y` tileset flag; GMaps (§6) is TMS with
/// `reverse_y=1` baked in, so [`crate::service::gmaps`] reuses this parser.
pub fn parse_tile_path(path: &str, level_max_y: Option<u32>, reverse_y: bool) -> Result<TileRequest> {
    let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
    if parts.len() != 4 {
        return Err(Error::invalid_request(
            "TMS path must be {layer}[@{grid}]/{z}/{x}/{y}.{ext}",
        ));
    }
    let (layer_part, z_str, x_str, y_ext) = (parts[0], parts[1], parts[2], parts[3]);
    let (tileset, grid) = match layer_part.split_once('@') {
        Some((t, g)) => (t.to_string(), Some(g.to_string())),
        None => (layer_part.to_string(), None),
    };
    let z: u16 = z_str.parse().map_err(|_| Error::invalid_request("invalid TMS z"))?;
    let x: i64 = x_str.parse().map_err(|_| Error::invalid_request("invalid TMS x"))?;
    let (y_str, ext) = split_extension(y_ext)?;
    let mut y: i64 = y_str.parse().map_err(|_| Error::invalid_request("invalid TMS y"))?;

    if reverse_y {
        let max_y = level_max_y.ok_or_else(|| Error::internal("reverse_y requires level_max_y"))?;
        y = max_y as i64 - 1 - y;
    }

    Ok(TileRequest {
        tileset,
        grid,
        z,
        x,
        y,
        dimensions: Vec::new(),
        extension: ext.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_layer_grid_zxy_ext() {
        let req = parse_tile_path("osm@GoogleMapsCompatible/3/4/5.png", None, false).unwrap();
        assert_eq!(req.tileset, "osm");
        assert_eq!(req.grid.as_deref(), Some("GoogleMapsCompatible"));
        assert_eq!((req.z, req.x, req.y), (3, 4, 5));
        assert_eq!(req.extension, "png");
    }

    #[test]
    fn parses_layer_without_grid_suffix() {
        let req = parse_tile_path("osm/3/4/5.jpeg", None, false).unwrap();
        assert_eq!(req.tileset, "osm");
        assert_eq!(req.grid, None);
    }

    #[test]
    fn reverse_y_flips_around_level_max() {
        let req = parse_tile_path("osm/3/4/5.png", Some(8), true).unwrap();
        // level has 8 rows (0..=7); row 5 reversed is 8-1-5 = 2.
        assert_eq!(req.y, 2);
    }

    #[test]
    fn rejects_wrong_segment_count() {
        assert!(parse_tile_path("osm/3/4.png", None, false).is_err());
    }
}
