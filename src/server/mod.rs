//! HTTP surface (§4.9, "added"): an `axum::Router` exposing tile-fetch and
//! map assembly behind the routes that stand in for the full service
//! layer of §6. Grounded on the teacher's `src/server/{mod,cache,etag,
//! handler}.rs` split — a `ServerConfig`, a response `TileCache` (moka,
//! distinct from `crate::cache::TileCache`), an ETag generator, and
//! per-route handler functions — generalized from MVT tiles to this
//! crate's raster tiles and map-assembly path.

pub mod etag;
pub mod forward;
pub mod handler;

pub use etag::ETagGenerator;

use crate::context::Context;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Server-wide HTTP settings, independent of the `<mapcache>` tile-cache
/// configuration proper (§4.9).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub cors: bool,
    pub compression: bool,
    /// Maximum accepted reverse-proxy POST body, bytes (§6 `max_post_length`).
    pub max_post_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".parse().unwrap(),
            cors: true,
            compression: true,
            max_post_length: 16 * 1024 * 1024,
        }
    }
}

/// Shared axum state: the tile-cache [`Context`] plus HTTP-layer settings.
pub struct AppState {
    pub ctx: Context,
    pub config: ServerConfig,
}

/// Build the router for §4.9's routes:
///   - `GET /tms/1.0.0/:tileset/:z/:x/:y.:ext`
///   - `GET /wmts/1.0.0/:tileset/:style/:matrixset/:z/:y/:x.:ext`
///   - `GET /wms` (`GetMap` only; other requests 501)
///   - `GET /health`
pub fn router(ctx: Context, config: ServerConfig) -> Router {
    let cors = config.cors;
    let compression = config.compression;
    let state = Arc::new(AppState { ctx, config });

    let mut router = Router::new()
        .route("/tms/1.0.0/*path", get(handler::handle_tms))
        .route("/wmts/1.0.0/*path", get(handler::handle_wmts))
        .route("/wms", get(handler::handle_wms))
        .route("/gmaps/*path", get(handler::handle_gmaps))
        .route("/ve", get(handler::handle_ve))
        .route("/kml/*path", get(handler::handle_kml))
        .route("/health", get(handler::handle_health))
        .with_state(state);

    if cors {
        router = router.layer(CorsLayer::permissive());
    }
    if compression {
        router = router.layer(CompressionLayer::new());
    }
    router.layer(TraceLayer::new_for_http())
}

/// Run the server to completion (never returns on success).
pub async fn serve(ctx: Context, config: ServerConfig) -> crate::error::Result<()> {
    let bind_addr = config.bind_addr;
    let app = router(ctx, config);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("mapcache listening on {}", bind_addr);
    axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::Error::internal(format!("server error: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_server_config_binds_localhost_8080() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8080);
        assert!(config.cors);
    }
}
