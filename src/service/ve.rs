//! Virtual Earth service (§6): KVP `layer=…&tile=<quadkey>`, quadkey
//! decoded to `(x, y, z)` per the standard Bing Maps tile-system
//! algorithm (each quadkey digit selects a quadrant at successively finer
//! zoom, MSB first).

use super::{kvp_get, TileRequest};
use crate::error::{Error, Result};
use std::collections::HashMap;

/// Decode a quadkey string into `(x, y, z)`. `z` is the quadkey length;
/// each digit `0..=3` pushes a bit into `x`/`y` (`1`/`2` set the x/y bit
/// respectively, `3` sets both), most-significant (coarsest level) digit
/// first.
pub fn decode_quadkey(quadkey: &str) -> Result<(i64, i64, u16)> {
    if quadkey.is_empty() {
        // zoom 0 has a single tile (0,0), which has an empty quadkey.
        return Ok((0, 0, 0));
    }
    let mut x: i64 = 0;
    let mut y: i64 = 0;
    let z = quadkey.len() as u16;
    for (i, ch) in quadkey.chars().enumerate() {
        let bit = z as usize - 1 - i;
        match ch {
            '0' => {}
            '1' => x |= 1 << bit,
            '2' => y |= 1 << bit,
            '3' => {
                x |= 1 << bit;
                y |= 1 << bit;
            }
            _ => return Err(Error::invalid_request(format!("invalid quadkey digit '{ch}'"))),
        }
    }
    Ok((x, y, z))
}

/// Parse a VE KVP query (`layer=…&tile=<quadkey>`) into a [`TileRequest`];
/// VE has no file extension in the URL, so the caller supplies the
/// tileset's configured format extension.
pub fn parse_query(params: &HashMap<String, String>, default_extension: &str) -> Result<TileRequest> {
    let layer = kvp_get(params, "layer").ok_or_else(|| Error::invalid_request("missing 'layer' parameter"))?;
    let tile = kvp_get(params, "tile").ok_or_else(|| Error::invalid_request("missing 'tile' parameter"))?;
    let (x, y, z) = decode_quadkey(tile)?;
    Ok(TileRequest {
        tileset: layer.to_string(),
        grid: None,
        z,
        x,
        y,
        dimensions: Vec::new(),
        extension: default_extension.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_quadkey() {
        // Microsoft's reference example: "023010230223001" -> z=15.
        let (_, _, z) = decode_quadkey("023010230223001").unwrap();
        assert_eq!(z, 15);
    }

    #[test]
    fn empty_quadkey_is_the_single_root_tile() {
        assert_eq!(decode_quadkey("").unwrap(), (0, 0, 0));
    }

    #[test]
    fn digit_1_sets_x_digit_2_sets_y_digit_3_sets_both() {
        assert_eq!(decode_quadkey("1").unwrap(), (1, 0, 1));
        assert_eq!(decode_quadkey("2").unwrap(), (0, 1, 1));
        assert_eq!(decode_quadkey("3").unwrap(), (1, 1, 1));
        assert_eq!(decode_quadkey("0").unwrap(), (0, 0, 1));
    }

    #[test]
    fn rejects_non_quaternary_digit() {
        assert!(decode_quadkey("04").is_err());
    }

    #[test]
    fn parse_query_reads_layer_and_tile() {
        let mut params = HashMap::new();
        params.insert("layer".to_string(), "osm".to_string());
        params.insert("tile".to_string(), "3".to_string());
        let req = parse_query(&params, "jpeg").unwrap();
        assert_eq!(req.tileset, "osm");
        assert_eq!((req.z, req.x, req.y), (1, 1, 1));
        assert_eq!(req.extension, "jpeg");
    }
}
