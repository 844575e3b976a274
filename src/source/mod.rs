//! Source adapter contract (§3, §4.3 step d): render an extent into raw
//! RGBA pixels. Grounded on the teacher's `source::TileSource` trait shape
//! (`crates/meridian-vector-tiles/src/source/mod.rs`), narrowed to the
//! single `render_map` operation this spec's core actually calls — style,
//! layer enumeration and source metadata belong to the service layer
//! (§1, out of scope here).

pub mod wms;

pub use wms::WmsSource;

use crate::error::Result;
use crate::image::RawImage;
use crate::tile::Map;
use async_trait::async_trait;

/// A render back-end: a remote WMS server or a local rendering engine.
/// Implementations receive a [`Map`] (arbitrary extent, width, height,
/// dimensions) and must return the full raw image covering it; the
/// metatile engine (§4.3) is the only caller that passes buffered extents.
#[async_trait]
pub trait Source: Send + Sync {
    async fn render_map(&self, map: &Map) -> Result<RawImage>;

    fn name(&self) -> &str;
}
