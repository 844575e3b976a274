//! WMS HTTP source: `GetMap` against a remote WMS server over `reqwest`
//! (§4.3 step d, §5 "Source HTTP calls have per-source connect and
//! response timeouts"). Grounded on `original_source/lib/source.c` /
//! `cache_rest.c`'s use of an HTTP client and the spec's §4.2 object-store
//! signing engine, which establishes `reqwest` as this workspace's HTTP
//! client of record.

use super::Source;
use crate::error::{Error, Result};
use crate::image::RawImage;
use crate::tile::Map;
use async_trait::async_trait;
use std::time::Duration;

/// A remote WMS 1.1.1/1.3.0 `GetMap` source.
pub struct WmsSource {
    name: String,
    base_url: String,
    layers: String,
    extra_params: Vec<(String, String)>,
    client: reqwest::Client,
}

impl WmsSource {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        layers: impl Into<String>,
    ) -> Result<Self> {
        Self::with_timeouts(name, base_url, layers, Duration::from_secs(10), Duration::from_secs(60))
    }

    pub fn with_timeouts(
        name: impl Into<String>,
        base_url: impl Into<String>,
        layers: impl Into<String>,
        connect_timeout: Duration,
        response_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(response_timeout)
            .build()?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.into(),
            layers: layers.into(),
            extra_params: Vec::new(),
            client,
        })
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_params.push((key.into(), value.into()));
        self
    }

    fn request_url(&self, map: &Map) -> String {
        let e = &map.extent;
        let mut url = format!(
            "{base}?SERVICE=WMS&VERSION=1.1.1&REQUEST=GetMap&LAYERS={layers}&STYLES=&SRS={srs}\
             &BBOX={minx},{miny},{maxx},{maxy}&WIDTH={w}&HEIGHT={h}&FORMAT=image/png&TRANSPARENT=TRUE",
            base = self.base_url,
            layers = self.layers,
            srs = map.grid_link.grid.srs,
            minx = e.min_x,
            miny = e.min_y,
            maxx = e.max_x,
            maxy = e.max_y,
            w = map.width,
            h = map.height,
        );
        for (k, v) in &self.extra_params {
            url.push('&');
            url.push_str(k);
            url.push('=');
            url.push_str(v);
        }
        url
    }
}

#[async_trait]
impl Source for WmsSource {
    async fn render_map(&self, map: &Map) -> Result<RawImage> {
        let url = self.request_url(map);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !status.is_success() {
            return Err(Error::upstream(format!(
                "WMS source {} returned HTTP {status}",
                self.name
            )));
        }
        if !content_type.starts_with("image/") {
            return Err(Error::upstream(format!(
                "WMS source {} returned non-image content-type {content_type}",
                self.name
            )));
        }
        let bytes = response.bytes().await?;
        let decoded = image::load_from_memory(&bytes)?.to_rgba8();
        let (width, height) = decoded.dimensions();
        Ok(RawImage::new(width, height, decoded.into_raw()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tileset;
    use crate::grid::{Extent, Grid};
    use crate::tile::GridLink;
    use std::sync::Arc;

    #[test]
    fn request_url_carries_bbox_and_size() {
        let source = WmsSource::new("osm-src", "http://example.test/wms", "osm").unwrap();
        let grid = Arc::new(Grid::google_maps_compatible());
        let extent = grid.extent;
        let link = Arc::new(GridLink::new(grid, extent, 0).unwrap());
        let tileset = Arc::new(Tileset::new_for_test("osm", (1, 1), 0));
        let map = Map::new(tileset, link, Extent::new(0.0, 0.0, 100.0, 100.0), 256, 256);
        let url = source.request_url(&map);
        assert!(url.contains("REQUEST=GetMap"));
        assert!(url.contains("BBOX=0,0,100,100"));
        assert!(url.contains("WIDTH=256&HEIGHT=256"));
    }
}
