//! WMS service (§6): KVP `GetCapabilities` (1.1.1 DTD), `GetMap`,
//! `GetFeatureInfo`; axis-inversion per SRS for WMS 1.3.0. Grounded on
//! §6's WMS bullet and §4.5 (map assembly is this service's sole
//! downstream consumer).

use super::{kvp_get, FeatureInfoRequest, MapRequest};
use crate::error::{Error, Result};
use crate::grid::Extent;
use std::collections::HashMap;

/// WMS 1.3.0 inverts axis order (`lat,lon` instead of `lon,lat`, i.e.
/// `y,x`) for a fixed list of geographic/compound CRSes; everything else,
/// and every 1.1.1 request regardless of SRS, stays `x,y`. EPSG:4326 is
/// the common case this crate's bundled WGS84 grid exercises.
fn axis_inverted(srs: &str, version: &str) -> bool {
    if version != "1.3.0" {
        return false;
    }
    matches!(srs.to_ascii_uppercase().as_str(), "EPSG:4326" | "CRS:84")
}

/// Parse a `BBOX` KVP value into an [`Extent`], honoring WMS 1.3.0's
/// axis order for geographic CRSes (§4.5 "pick the closest grid level").
fn parse_bbox(bbox: &str, srs: &str, version: &str) -> Result<Extent> {
    let parts: Vec<f64> = bbox
        .split(',')
        .map(|s| s.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| Error::invalid_request("BBOX must be four comma-separated numbers"))?;
    if parts.len() != 4 {
        return Err(Error::invalid_request("BBOX must have exactly 4 values"));
    }
    let (a, b, c, d) = (parts[0], parts[1], parts[2], parts[3]);
    let extent = if axis_inverted(srs, version) {
        Extent::new(b, a, d, c)
    } else {
        Extent::new(a, b, c, d)
    };
    if extent.is_empty() {
        return Err(Error::invalid_request("BBOX describes an empty or inverted extent"));
    }
    Ok(extent)
}

fn required<'a>(params: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    kvp_get(params, key).ok_or_else(|| Error::invalid_request(format!("missing {key} parameter")))
}

/// Parse a `GetMap` KVP request into a [`MapRequest`] (§4.5's input). The
/// `LAYERS` parameter may carry multiple comma-separated layer names in
/// real WMS, but this crate caches one tileset per map; only the first
/// layer is honored, matching the original's single-layer-per-cache model.
pub fn parse_get_map(params: &HashMap<String, String>) -> Result<MapRequest> {
    let version = kvp_get(params, "VERSION").unwrap_or("1.1.1");
    let layers = required(params, "LAYERS")?;
    let tileset = layers.split(',').next().unwrap_or(layers).to_string();
    let srs_key = if version == "1.3.0" { "CRS" } else { "SRS" };
    let srs = required(params, srs_key)?;
    let bbox = required(params, "BBOX")?;
    let extent = parse_bbox(bbox, srs, version)?;
    let width: u32 = required(params, "WIDTH")?
        .parse()
        .map_err(|_| Error::invalid_request("invalid WIDTH"))?;
    let height: u32 = required(params, "HEIGHT")?
        .parse()
        .map_err(|_| Error::invalid_request("invalid HEIGHT"))?;
    if width == 0 || height == 0 {
        return Err(Error::invalid_request("WIDTH and HEIGHT must be positive"));
    }
    let format = kvp_get(params, "FORMAT").map(|s| s.to_string());

    Ok(MapRequest {
        tileset,
        grid: None,
        extent,
        width,
        height,
        srs: srs.to_string(),
        dimensions: Vec::new(),
        format,
    })
}

/// Parse a `GetFeatureInfo` request: the `GetMap` parameters it always
/// carries, plus `{I,J}` (1.1.1) or `{I,J}` (1.3.0 keeps the same names)
/// pixel coordinates and the requested `INFO_FORMAT`.
pub fn parse_get_feature_info(params: &HashMap<String, String>) -> Result<FeatureInfoRequest> {
    let map = parse_get_map(params)?;
    let i: u32 = required(params, "I")?.parse().map_err(|_| Error::invalid_request("invalid I"))?;
    let j: u32 = required(params, "J")?.parse().map_err(|_| Error::invalid_request("invalid J"))?;
    let info_format = required(params, "INFO_FORMAT")?.to_string();
    Ok(FeatureInfoRequest { map, i, j, info_format })
}

/// Dispatch a raw WMS KVP query by its `REQUEST` parameter. Returns the
/// matched request kind; `GetCapabilities` carries no further structure
/// here since capabilities-document assembly belongs to the HTTP
/// front-end (§1) — this crate only validates the request was recognized.
pub enum WmsRequest {
    GetCapabilities,
    GetMap(MapRequest),
    GetFeatureInfo(FeatureInfoRequest),
}

pub fn dispatch(params: &HashMap<String, String>) -> Result<WmsRequest> {
    match required(params, "REQUEST")? {
        "GetCapabilities" => Ok(WmsRequest::GetCapabilities),
        "GetMap" => Ok(WmsRequest::GetMap(parse_get_map(params)?)),
        "GetFeatureInfo" => Ok(WmsRequest::GetFeatureInfo(parse_get_feature_info(params)?)),
        other => Err(Error::invalid_request(format!("unsupported WMS REQUEST '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn parses_get_map_111_xy_order() {
        let p = params(&[
            ("VERSION", "1.1.1"),
            ("LAYERS", "osm"),
            ("SRS", "EPSG:3857"),
            ("BBOX", "0,0,100,100"),
            ("WIDTH", "256"),
            ("HEIGHT", "256"),
        ]);
        let req = parse_get_map(&p).unwrap();
        assert_eq!(req.tileset, "osm");
        assert_eq!(req.extent, Extent::new(0.0, 0.0, 100.0, 100.0));
    }

    #[test]
    fn inverts_axis_for_130_epsg4326() {
        let p = params(&[
            ("VERSION", "1.3.0"),
            ("LAYERS", "osm"),
            ("CRS", "EPSG:4326"),
            ("BBOX", "10,20,30,40"), // lat_min,lon_min,lat_max,lon_max
            ("WIDTH", "256"),
            ("HEIGHT", "256"),
        ]);
        let req = parse_get_map(&p).unwrap();
        // inverted: x=lon, y=lat -> (20,10,40,30)
        assert_eq!(req.extent, Extent::new(20.0, 10.0, 40.0, 30.0));
    }

    #[test]
    fn does_not_invert_axis_for_111_regardless_of_srs() {
        let p = params(&[
            ("VERSION", "1.1.1"),
            ("LAYERS", "osm"),
            ("SRS", "EPSG:4326"),
            ("BBOX", "10,20,30,40"),
            ("WIDTH", "256"),
            ("HEIGHT", "256"),
        ]);
        let req = parse_get_map(&p).unwrap();
        assert_eq!(req.extent, Extent::new(10.0, 20.0, 30.0, 40.0));
    }

    #[test]
    fn only_first_layer_of_a_comma_list_is_honored() {
        let p = params(&[
            ("VERSION", "1.1.1"),
            ("LAYERS", "osm,other"),
            ("SRS", "EPSG:3857"),
            ("BBOX", "0,0,1,1"),
            ("WIDTH", "1"),
            ("HEIGHT", "1"),
        ]);
        assert_eq!(parse_get_map(&p).unwrap().tileset, "osm");
    }

    #[test]
    fn dispatch_rejects_unsupported_request() {
        let p = params(&[("REQUEST", "GetLegendGraphic")]);
        assert!(dispatch(&p).is_err());
    }

    #[test]
    fn feature_info_requires_i_j_info_format() {
        let p = params(&[
            ("VERSION", "1.1.1"),
            ("LAYERS", "osm"),
            ("SRS", "EPSG:3857"),
            ("BBOX", "0,0,100,100"),
            ("WIDTH", "256"),
            ("HEIGHT", "256"),
            ("I", "10"),
            ("J", "20"),
            ("INFO_FORMAT", "text/plain"),
        ]);
        let fi = parse_get_feature_info(&p).unwrap();
        assert_eq!((fi.i, fi.j), (10, 20));
        assert_eq!(fi.info_format, "text/plain");
    }
}
