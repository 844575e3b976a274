//! GMaps service (§6): identical path grammar to TMS with `reverse_y`
//! implicitly on, since Google Maps tiles address row 0 at the top.

use super::TileRequest;
use crate::error::Result;

pub fn parse_tile_path(path: &str, level_max_y: u32) -> Result<TileRequest> {
    super::tms::parse_tile_path(path, Some(level_max_y), true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gmaps_reverses_y_by_default() {
        let req = parse_tile_path("osm/3/4/5.png", 8).unwrap();
        assert_eq!(req.y, 2);
    }
}
