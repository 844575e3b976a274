//! WMTS service (§6): REST path
//! `/wmts/1.0.0/{layer}/{style}/{dim…}/{matrixset}/{z}/{y}/{x}.{ext}`
//! (note the `y` before `x`, per the WMTS REST binding) or KVP; capabilities
//! as `WMTSCapabilities.xml`; feature-info at `.../{j}/{i}.{n}` where `n`
//! indexes the tileset's `InfoFormat`s.

use super::{kvp_get, split_extension, TileRequest};
use crate::config::Tileset;
use crate::dimension::RequestedDimension;
use crate::error::{Error, Result};
use std::collections::HashMap;

/// Parse a WMTS REST path (the part after `/wmts/1.0.0/`). `dimension_names`
/// supplies the tileset's ordered dimension list so the arbitrary-depth
/// `{dim…}` segment run can be matched positionally against `{style}` and
/// `{matrixset}` on either side of it.
pub fn parse_rest_path(path: &str, dimension_names: &[&str]) -> Result<TileRequest> {
    let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
    // layer, style, dim*, matrixset, z, y, x.ext
    let fixed = 4 + dimension_names.len();
    if parts.len() != fixed {
        return Err(Error::invalid_request(format!(
            "WMTS REST path expects {fixed} segments (layer/style/{}matrixset/z/y/x.ext), got {}",
            dimension_names.iter().map(|d| format!("{d}/")).collect::<String>(),
            parts.len()
        )));
    }
    let tileset = parts[0].to_string();
    // parts[1] is style, carried only for URL fidelity (this crate has no
    // styling concept, §1 Non-goals).
    let dims_start = 2;
    let matrixset = parts[dims_start + dimension_names.len()].to_string();
    let z_str = parts[dims_start + dimension_names.len() + 1];
    let y_str = parts[dims_start + dimension_names.len() + 2];
    let x_ext = parts[dims_start + dimension_names.len() + 3];

    let mut dimensions = Vec::with_capacity(dimension_names.len());
    for (i, name) in dimension_names.iter().enumerate() {
        let value = parts[dims_start + i];
        dimensions.push(RequestedDimension::new(*name, value, value));
    }

    let z: u16 = z_str.parse().map_err(|_| Error::invalid_request("invalid WMTS TileMatrix (z)"))?;
    let y: i64 = y_str.parse().map_err(|_| Error::invalid_request("invalid WMTS TileRow (y)"))?;
    let (x_str, ext) = split_extension(x_ext)?;
    let x: i64 = x_str.parse().map_err(|_| Error::invalid_request("invalid WMTS TileCol (x)"))?;

    Ok(TileRequest { tileset, grid: Some(matrixset), z, x, y, dimensions, extension: ext.to_string() })
}

/// Parse a WMTS KVP `GetTile` request (`SERVICE=WMTS&REQUEST=GetTile&…`).
pub fn parse_kvp_get_tile(params: &HashMap<String, String>) -> Result<TileRequest> {
    let layer = kvp_get(params, "LAYER").ok_or_else(|| Error::invalid_request("missing LAYER"))?;
    let matrixset = kvp_get(params, "TILEMATRIXSET").ok_or_else(|| Error::invalid_request("missing TILEMATRIXSET"))?;
    let z: u16 = kvp_get(params, "TILEMATRIX")
        .ok_or_else(|| Error::invalid_request("missing TILEMATRIX"))?
        .parse()
        .map_err(|_| Error::invalid_request("invalid TILEMATRIX"))?;
    let x: i64 = kvp_get(params, "TILECOL")
        .ok_or_else(|| Error::invalid_request("missing TILECOL"))?
        .parse()
        .map_err(|_| Error::invalid_request("invalid TILECOL"))?;
    let y: i64 = kvp_get(params, "TILEROW")
        .ok_or_else(|| Error::invalid_request("missing TILEROW"))?
        .parse()
        .map_err(|_| Error::invalid_request("invalid TILEROW"))?;
    let format = kvp_get(params, "FORMAT").unwrap_or("image/png");
    let ext = mime_to_extension(format);
    Ok(TileRequest {
        tileset: layer.to_string(),
        grid: Some(matrixset.to_string()),
        z,
        x,
        y,
        dimensions: Vec::new(),
        extension: ext.to_string(),
    })
}

fn mime_to_extension(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => "jpeg",
        _ => "png",
    }
}

/// Feature-info pixel suffix `.../{j}/{i}.{n}` where `n` indexes
/// `tileset.info_formats` (§6): `j` is the row, `i` the column, both
/// within the tile's pixel grid.
pub fn parse_feature_info_suffix(suffix: &str, info_formats: &[&str]) -> Result<(u32, u32, String)> {
    let parts: Vec<&str> = suffix.trim_matches('/').split('/').collect();
    if parts.len() != 2 {
        return Err(Error::invalid_request("feature-info suffix must be {j}/{i}.{n}"));
    }
    let j: u32 = parts[0].parse().map_err(|_| Error::invalid_request("invalid j"))?;
    let (i_str, n_str) = split_extension(parts[1])?;
    let i: u32 = i_str.parse().map_err(|_| Error::invalid_request("invalid i"))?;
    let n: usize = n_str.parse().map_err(|_| Error::invalid_request("invalid InfoFormat index"))?;
    let format = info_formats
        .get(n)
        .ok_or_else(|| Error::invalid_request("InfoFormat index out of range"))?;
    Ok((i, j, format.to_string()))
}

/// Build `WMTSCapabilities.xml`'s `<Layer>` fragment for one tileset, one
/// grid-link per `<TileMatrixSetLink>` (full capabilities assembly,
/// including `<Contents>` wrapper and per-grid `<TileMatrixSet>`
/// definitions, is the HTTP front-end's job per §1; this crate exposes
/// just the per-tileset fragment it has enough information to build).
pub fn layer_fragment(tileset: &Tileset, base_url: &str) -> String {
    let mut matrix_links = String::new();
    for link in tileset.grid_links.iter() {
        matrix_links.push_str(&format!(
            "      <TileMatrixSetLink><TileMatrixSet>{}</TileMatrixSet></TileMatrixSetLink>\n",
            super::xml_escape(&link.grid.name)
        ));
    }
    format!(
        r#"  <Layer>
    <ows:Title>{name}</ows:Title>
    <ows:Identifier>{name}</ows:Identifier>
    <Style isDefault="true"><ows:Identifier>default</ows:Identifier></Style>
    <Format>{mime}</Format>
{matrix_links}    <ResourceURL format="{mime}" resourceType="tile" template="{base_url}/wmts/1.0.0/{name}/default/{{TileMatrixSet}}/{{TileMatrix}}/{{TileRow}}/{{TileCol}}.{ext}"/>
  </Layer>"#,
        name = super::xml_escape(&tileset.name),
        mime = tileset.format.mime_type(),
        ext = tileset.format.extension(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rest_path_without_dimensions() {
        let req = parse_rest_path("osm/default/GoogleMapsCompatible/3/5/4.png", &[]).unwrap();
        assert_eq!(req.tileset, "osm");
        assert_eq!(req.grid.as_deref(), Some("GoogleMapsCompatible"));
        assert_eq!((req.z, req.y, req.x), (3, 5, 4));
    }

    #[test]
    fn parses_rest_path_with_one_dimension() {
        let req = parse_rest_path(
            "osm/default/2024-01-01/GoogleMapsCompatible/3/5/4.png",
            &["TIME"],
        )
        .unwrap();
        assert_eq!(req.dimensions.len(), 1);
        assert_eq!(req.dimensions[0].requested_value, "2024-01-01");
    }

    #[test]
    fn parses_kvp_get_tile() {
        let mut params = HashMap::new();
        params.insert("LAYER".into(), "osm".into());
        params.insert("TILEMATRIXSET".into(), "GoogleMapsCompatible".into());
        params.insert("TILEMATRIX".into(), "3".into());
        params.insert("TILECOL".into(), "4".into());
        params.insert("TILEROW".into(), "5".into());
        let req = parse_kvp_get_tile(&params).unwrap();
        assert_eq!((req.z, req.x, req.y), (3, 4, 5));
    }

    #[test]
    fn feature_info_suffix_indexes_formats() {
        let (i, j, fmt) = parse_feature_info_suffix("10/20.1", &["text/plain", "text/html"]).unwrap();
        assert_eq!((i, j), (20, 10));
        assert_eq!(fmt, "text/html");
    }
}
