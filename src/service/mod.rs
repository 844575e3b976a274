//! Service contract (§6): translate a client URL into a tile or map
//! request, and render request metadata back into a capabilities
//! document. Grounded on §6's per-service list and the teacher's
//! `src/server/handler.rs` routing split (one handler fn per concern);
//! unlike the teacher this module contains no caching logic at all — it
//! only builds [`TileRequest`]/[`MapRequest`] values for `crate::metatile`
//! and `crate::assembly` to consume, and formats errors back into each
//! service's envelope (§7).

pub mod gmaps;
pub mod kml;
pub mod tms;
pub mod ve;
pub mod wms;
pub mod wmts;

use crate::dimension::RequestedDimension;
use crate::error::Error;
use crate::grid::Extent;
use std::collections::HashMap;

/// A single `(tileset, grid, z, x, y, dimensions, format)` tile request,
/// the common target of TMS, WMTS REST, GMaps, VE and KML parsing.
#[derive(Debug, Clone)]
pub struct TileRequest {
    pub tileset: String,
    pub grid: Option<String>,
    pub z: u16,
    pub x: i64,
    pub y: i64,
    pub dimensions: Vec<RequestedDimension>,
    pub extension: String,
}

/// A `GetMap`/`GetFeatureInfo`-style arbitrary-extent request (§3 "Map"),
/// the target of WMS KVP parsing.
#[derive(Debug, Clone)]
pub struct MapRequest {
    pub tileset: String,
    pub grid: Option<String>,
    pub extent: Extent,
    pub width: u32,
    pub height: u32,
    pub srs: String,
    pub dimensions: Vec<RequestedDimension>,
    pub format: Option<String>,
}

/// Parsed `GetFeatureInfo` request: a [`MapRequest`] plus the pixel the
/// client clicked and the requested info MIME format.
#[derive(Debug, Clone)]
pub struct FeatureInfoRequest {
    pub map: MapRequest,
    pub i: u32,
    pub j: u32,
    pub info_format: String,
}

/// Case-insensitive KVP lookup, shared by WMS/WMTS/VE query parsing —
/// OGC KVP keys are conventionally uppercase but clients vary.
pub fn kvp_get<'a>(params: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

/// Parse a `key=value&key=value` query string into a lookup map, the
/// shape every KVP-based service (WMS, VE, WMTS-KVP) starts from.
pub fn parse_kvp(query: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let mut it = pair.splitn(2, '=');
        let key = it.next().unwrap_or_default();
        let value = it.next().unwrap_or_default();
        map.insert(
            urlencoding_decode(key),
            urlencoding_decode(value),
        );
    }
    map
}

/// Minimal `%XX` + `+` decoder sufficient for KVP tile/map requests; full
/// RFC 3986 reserved-character handling is the HTTP front-end's job, not
/// this crate's (§1 "HTTP front-ends" is out of scope).
fn urlencoding_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""), 16) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Split `name.ext` into its two parts; used by TMS/WMTS/GMaps path
/// parsing since the extension selects both the tile format and whether
/// `Content-Type` can be determined without touching the tileset.
pub fn split_extension(segment: &str) -> Result<(&str, &str), Error> {
    match segment.rsplit_once('.') {
        Some((name, ext)) if !name.is_empty() && !ext.is_empty() => Ok((name, ext)),
        _ => Err(Error::invalid_request(format!("missing file extension in '{segment}'"))),
    }
}

/// Error envelope format, selected per-service (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorEnvelope {
    PlainText,
    WmsServiceException,
    WmtsOwsException,
}

/// Render `err` into `envelope`'s body and the content type that should
/// accompany `err.status_code()` (§7 "Errors are always reported through
/// the service's error formatter").
pub fn format_error(err: &Error, envelope: ErrorEnvelope) -> (&'static str, String) {
    match envelope {
        ErrorEnvelope::PlainText => ("text/plain", err.to_string()),
        ErrorEnvelope::WmsServiceException => (
            "application/vnd.ogc.se_xml",
            format!(
                r#"<?xml version="1.0" encoding="UTF-8"?>
<ServiceExceptionReport version="1.1.1" xmlns="http://www.opengis.net/ogc">
  <ServiceException code="{}">{}</ServiceException>
</ServiceExceptionReport>"#,
                wms_exception_code(err),
                xml_escape(&err.to_string())
            ),
        ),
        ErrorEnvelope::WmtsOwsException => (
            "text/xml",
            format!(
                r#"<?xml version="1.0" encoding="UTF-8"?>
<ows:ExceptionReport xmlns:ows="http://www.opengis.net/ows/1.1" version="1.1.0">
  <ows:Exception exceptionCode="{}">
    <ows:ExceptionText>{}</ows:ExceptionText>
  </ows:Exception>
</ows:ExceptionReport>"#,
                wmts_exception_code(err),
                xml_escape(&err.to_string())
            ),
        ),
    }
}

fn wms_exception_code(err: &Error) -> &'static str {
    match err {
        Error::InvalidRequest(_) => "InvalidParameterValue",
        Error::NotFound(_) => "LayerNotDefined",
        Error::InvalidDimension { .. } => "InvalidDimensionValue",
        _ => "NoApplicableCode",
    }
}

fn wmts_exception_code(err: &Error) -> &'static str {
    match err {
        Error::InvalidRequest(_) => "InvalidParameterValue",
        Error::NotFound(_) => "TileOutOfRange",
        Error::InvalidDimension { .. } => "InvalidParameterValue",
        _ => "NoApplicableCode",
    }
}

pub fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_kvp_decodes_plus_and_percent() {
        let parsed = parse_kvp("LAYERS=osm&TIME=2024-01-01%2F2024-01-03&BBOX=1+2,3,4");
        assert_eq!(kvp_get(&parsed, "layers"), Some("osm"));
        assert_eq!(kvp_get(&parsed, "time"), Some("2024-01-01/2024-01-03"));
        assert_eq!(kvp_get(&parsed, "bbox"), Some("1 2,3,4"));
    }

    #[test]
    fn split_extension_rejects_missing_dot() {
        assert!(split_extension("notile").is_err());
        assert_eq!(split_extension("5.png").unwrap(), ("5", "png"));
    }

    #[test]
    fn format_error_selects_envelope() {
        let (ct, body) = format_error(&Error::invalid_request("bad bbox"), ErrorEnvelope::WmsServiceException);
        assert_eq!(ct, "application/vnd.ogc.se_xml");
        assert!(body.contains("ServiceExceptionReport"));
        assert!(body.contains("InvalidParameterValue"));
        assert!(body.contains("bad bbox"));
    }
}
