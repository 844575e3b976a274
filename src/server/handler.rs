//! Per-route handlers (§4.9). Grounded on the teacher's
//! `src/server/handler.rs` handler-per-route split, generalized from one
//! `TileHandler<S, T>` to this crate's several request shapes (tile
//! fetch, map assembly, not-yet-implemented capabilities/feature-info).

use super::{etag::ETagGenerator, AppState};
use crate::dimension::RequestedDimension;
use crate::error::{Error, Result};
use crate::service::{self, wms::WmsRequest, TileRequest};
use crate::tile::{GridLink, Tile};
use axum::extract::{OriginalUri, RawQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

fn find_grid_link(tileset: &crate::config::Tileset, name: Option<&str>) -> Result<Arc<GridLink>> {
    match name {
        Some(n) => tileset
            .grid_links
            .iter()
            .find(|l| l.grid.name == n)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("tileset has no grid-link '{n}'"))),
        None => tileset
            .grid_links
            .first()
            .cloned()
            .ok_or_else(|| Error::internal("tileset has no grid-links")),
    }
}

/// Fill in every tileset dimension not already present in `dimensions`
/// with its default (empty) value. Path-addressed services (TMS/WMTS
/// REST/GMaps) only carry the dimensions literally present in the URL
/// template; a tileset with additional dimensions needs those supplied
/// some other way in a full deployment (KVP `DIM_<NAME>` params, a
/// default-value config), which is beyond what a bare tile path encodes.
fn fill_default_dimensions(
    tileset: &crate::config::Tileset,
    mut dimensions: Vec<RequestedDimension>,
) -> Vec<RequestedDimension> {
    for dim in &tileset.dimensions {
        if !dimensions.iter().any(|d| d.name == dim.name()) {
            dimensions.push(RequestedDimension::new(dim.name(), "", ""));
        }
    }
    dimensions
}

async fn fetch_tile(state: &AppState, req: TileRequest) -> Result<Tile> {
    let tileset = state.ctx.config().tileset(&req.tileset)?;
    let grid_link = find_grid_link(&tileset, req.grid.as_deref())?;
    let dimensions = fill_default_dimensions(&tileset, req.dimensions);
    let tile = Tile::new(tileset, grid_link, req.z, req.x, req.y).with_dimensions(dimensions);
    if !tile.is_valid() {
        return Err(Error::not_found(format!(
            "tile {}/{}/{} out of range for tileset '{}'",
            tile.z, tile.x, tile.y, req.tileset
        )));
    }
    crate::metatile::tile_get(&state.ctx, tile).await
}

fn tile_response(tile: &Tile, headers_in: &HeaderMap) -> Result<Response> {
    if tile.nodata {
        return Err(Error::not_found("tile has no data"));
    }
    let bytes = tile
        .encoded_data
        .clone()
        .ok_or_else(|| Error::internal("fetched tile carries no encoded bytes"))?;

    let etag_gen = ETagGenerator;
    let etag = etag_gen.generate(&bytes);
    if let Some(inm) = headers_in.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()) {
        if etag_gen.matches(&bytes, inm) {
            return Ok(StatusCode::NOT_MODIFIED.into_response());
        }
    }

    let max_age = tile.expires.unwrap_or(0).max(0);
    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        tile.tileset.format.mime_type().parse().unwrap(),
    );
    response_headers.insert(header::ETAG, etag.parse().unwrap());
    response_headers.insert(
        header::CACHE_CONTROL,
        format!("public, max-age={max_age}").parse().unwrap(),
    );
    Ok((StatusCode::OK, response_headers, bytes).into_response())
}

/// `GET /tms/1.0.0/*path`
pub async fn handle_tms(State(state): State<Arc<AppState>>, OriginalUri(uri): OriginalUri) -> Response {
    handle_path_tile(&state, tms_path(&uri), |path, _| service::tms::parse_tile_path(path, None, false))
        .await
        .into_response()
}

/// `GET /gmaps/*path` — like TMS with `reverse_y=1`; the level's
/// `max_y` is needed before parsing, so this route resolves the tileset
/// once via an un-reversed parse, then re-parses with the correct
/// reversal once the grid-link's level is known.
pub async fn handle_gmaps(State(state): State<Arc<AppState>>, OriginalUri(uri): OriginalUri) -> Response {
    let path = tms_path(&uri);
    let probe = match service::tms::parse_tile_path(path, None, false) {
        Ok(p) => p,
        Err(e) => return error_response(&e, service::ErrorEnvelope::PlainText).into_response(),
    };
    let tileset = match state.ctx.config().tileset(&probe.tileset) {
        Ok(t) => t,
        Err(e) => return error_response(&e, service::ErrorEnvelope::PlainText).into_response(),
    };
    let grid_link = match find_grid_link(&tileset, probe.grid.as_deref()) {
        Ok(g) => g,
        Err(e) => return error_response(&e, service::ErrorEnvelope::PlainText).into_response(),
    };
    let max_y = match grid_link.grid.level(probe.z) {
        Ok(l) => l.max_y,
        Err(e) => return error_response(&e, service::ErrorEnvelope::PlainText).into_response(),
    };
    let req = match service::gmaps::parse_tile_path(path, max_y) {
        Ok(r) => r,
        Err(e) => return error_response(&e, service::ErrorEnvelope::PlainText).into_response(),
    };
    respond_tile(&state, req).await.into_response()
}

/// `GET /wmts/1.0.0/*path`
pub async fn handle_wmts(State(state): State<Arc<AppState>>, OriginalUri(uri): OriginalUri) -> Response {
    let path = uri.path().trim_start_matches("/wmts/1.0.0/");
    // Dimension-bearing WMTS layers aren't addressable without first
    // resolving the tileset (we don't know its dimension count until
    // then); attempt a zero-dimension parse first, and on a segment-count
    // mismatch retry once the tileset's dimension names are known.
    let req = match service::wmts::parse_rest_path(path, &[]) {
        Ok(r) => r,
        Err(_) => {
            let layer = path.split('/').next().unwrap_or_default();
            match state.ctx.config().tileset(layer) {
                Ok(tileset) => {
                    let names: Vec<&str> = tileset.dimensions.iter().map(|d| d.name()).collect();
                    match service::wmts::parse_rest_path(path, &names) {
                        Ok(r) => r,
                        Err(e) => return error_response(&e, service::ErrorEnvelope::WmtsOwsException).into_response(),
                    }
                }
                Err(e) => return error_response(&e, service::ErrorEnvelope::WmtsOwsException).into_response(),
            }
        }
    };
    match fetch_tile(&state, req).await {
        Ok(tile) => match tile_response(&tile, &HeaderMap::new()) {
            Ok(r) => r,
            Err(e) => error_response(&e, service::ErrorEnvelope::WmtsOwsException).into_response(),
        },
        Err(e) => error_response(&e, service::ErrorEnvelope::WmtsOwsException).into_response(),
    }
}

/// `GET /ve` — KVP `layer=…&tile=<quadkey>`.
pub async fn handle_ve(State(state): State<Arc<AppState>>, RawQuery(query): RawQuery) -> Response {
    let params = service::parse_kvp(&query.unwrap_or_default());
    let tileset_name = match service::kvp_get(&params, "layer") {
        Some(l) => l.to_string(),
        None => return error_response(&Error::invalid_request("missing 'layer'"), service::ErrorEnvelope::PlainText).into_response(),
    };
    let ext = state
        .ctx
        .config()
        .tileset(&tileset_name)
        .map(|t| t.format.extension().to_string())
        .unwrap_or_else(|_| "png".to_string());
    match service::ve::parse_query(&params, &ext) {
        Ok(req) => respond_tile(&state, req).await.into_response(),
        Err(e) => error_response(&e, service::ErrorEnvelope::PlainText).into_response(),
    }
}

/// `GET /kml/*path` — SuperOverlay document; does not touch the tile
/// cache's pixel path beyond validating the tile is in range.
pub async fn handle_kml(State(state): State<Arc<AppState>>, OriginalUri(uri): OriginalUri) -> Response {
    let path = uri.path().trim_start_matches("/kml/");
    let req = match service::kml::parse_tile_path(path) {
        Ok(r) => r,
        Err(e) => return error_response(&e, service::ErrorEnvelope::PlainText).into_response(),
    };
    let tileset = match state.ctx.config().tileset(&req.tileset) {
        Ok(t) => t,
        Err(e) => return error_response(&e, service::ErrorEnvelope::PlainText).into_response(),
    };
    let grid_link = match find_grid_link(&tileset, req.grid.as_deref()) {
        Ok(g) => g,
        Err(e) => return error_response(&e, service::ErrorEnvelope::PlainText).into_response(),
    };
    if !grid_link.is_valid(req.x, req.y, req.z) {
        return error_response(&Error::not_found("tile out of range"), service::ErrorEnvelope::PlainText).into_response();
    }
    let base_url = format!("http://{}", uri.authority().map(|a| a.as_str()).unwrap_or("localhost"));
    match service::kml::build_superoverlay(
        &req.tileset,
        req.grid.as_deref(),
        &grid_link.grid,
        req.z,
        req.x,
        req.y,
        tileset.format.extension(),
        &base_url,
    ) {
        Ok(doc) => {
            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, "application/vnd.google-earth.kml+xml".parse().unwrap());
            (StatusCode::OK, headers, doc).into_response()
        }
        Err(e) => error_response(&e, service::ErrorEnvelope::PlainText).into_response(),
    }
}

fn tms_path(uri: &axum::http::Uri) -> &str {
    uri.path().trim_start_matches("/tms/1.0.0/")
}

async fn handle_path_tile(
    state: &AppState,
    path: &str,
    parse: impl FnOnce(&str, Option<u32>) -> Result<TileRequest>,
) -> Response {
    match parse(path, None) {
        Ok(req) => respond_tile_ref(state, req).await,
        Err(e) => error_response(&e, service::ErrorEnvelope::PlainText).into_response(),
    }
}

async fn respond_tile(state: &AppState, req: TileRequest) -> Response {
    respond_tile_ref(state, req).await
}

async fn respond_tile_ref(state: &AppState, req: TileRequest) -> Response {
    match fetch_tile(state, req).await {
        Ok(tile) => match tile_response(&tile, &HeaderMap::new()) {
            Ok(r) => r,
            Err(e) => error_response(&e, service::ErrorEnvelope::PlainText).into_response(),
        },
        Err(e) => error_response(&e, service::ErrorEnvelope::PlainText).into_response(),
    }
}

/// `GET /wms` — `GetMap` only (§4.9); `GetCapabilities`/`GetFeatureInfo`
/// are out of scope (§1) and answer `501 Not Implemented`.
pub async fn handle_wms(State(state): State<Arc<AppState>>, RawQuery(query): RawQuery) -> Response {
    let params = service::parse_kvp(&query.unwrap_or_default());
    let dispatched = match service::wms::dispatch(&params) {
        Ok(d) => d,
        Err(e) => return error_response(&e, service::ErrorEnvelope::WmsServiceException).into_response(),
    };
    let map_req = match dispatched {
        WmsRequest::GetMap(m) => m,
        WmsRequest::GetCapabilities | WmsRequest::GetFeatureInfo(_) => {
            return (StatusCode::NOT_IMPLEMENTED, "GetCapabilities/GetFeatureInfo are not implemented").into_response()
        }
    };

    let tileset = match state.ctx.config().tileset(&map_req.tileset) {
        Ok(t) => t,
        Err(e) => return error_response(&e, service::ErrorEnvelope::WmsServiceException).into_response(),
    };
    let grid_link = match find_grid_link(&tileset, None) {
        Ok(g) => g,
        Err(e) => return error_response(&e, service::ErrorEnvelope::WmsServiceException).into_response(),
    };
    let mut map = crate::tile::Map::new(tileset, grid_link, map_req.extent, map_req.width, map_req.height);
    if let Err(e) = crate::assembly::map::assemble(&state.ctx, &mut map).await {
        return error_response(&e, service::ErrorEnvelope::WmsServiceException).into_response();
    }
    let bytes = match map.encoded_data {
        Some(b) => b,
        None => return error_response(&Error::internal("assembly produced no bytes"), service::ErrorEnvelope::WmsServiceException).into_response(),
    };
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, map.tileset.format.mime_type().parse().unwrap());
    (StatusCode::OK, headers, bytes).into_response()
}

pub async fn handle_health() -> impl IntoResponse {
    axum::Json(serde_json::json!({ "status": "healthy", "version": crate::VERSION }))
}

fn error_response(err: &Error, envelope: service::ErrorEnvelope) -> Response {
    let (content_type, body) = service::format_error(err, envelope);
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, content_type.parse().unwrap());
    (err.status_code(), headers, body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tms_path_strips_prefix() {
        let uri: axum::http::Uri = "/tms/1.0.0/osm/3/4/5.png".parse().unwrap();
        assert_eq!(tms_path(&uri), "osm/3/4/5.png");
    }
}
