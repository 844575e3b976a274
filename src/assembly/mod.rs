//! Tile assembly: out-of-zoom reassembly (§4.4), WMS full-image assembly
//! (§4.5), and the dimension-assembly engine (§4.6). Grounded on
//! `original_source/lib/tileset.c`'s `assemble_out_of_zoom_tile`,
//! `get_map_tiles`/`assemble_map_tiles`, and
//! `tile_get_with_subdimensions`.

pub mod dimension;
pub mod map;
pub mod overzoom;
