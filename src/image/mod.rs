//! Raw RGBA8 pixel buffer and raster arithmetic (§4.7, "added").
//!
//! The original treats this as a pure function library (`lib/image.c`); it
//! has no network or cache-side effects and is implemented in-crate since
//! nothing else in the workspace provides it.

pub mod codec;

pub use codec::{JpegFormat, MixedFormat, PngFormat, RawFormat, TileFormat};

/// An owned RGBA8 pixel buffer, row-major, no padding between rows.
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RawImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len(), (width as usize) * (height as usize) * 4);
        Self { width, height, pixels }
    }

    /// Solid-color buffer, used for Rule-hidden tiles and the
    /// fully-transparent map-assembly fallback.
    pub fn fill(width: u32, height: u32, color: [u8; 4]) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..(width as usize * height as usize) {
            pixels.extend_from_slice(&color);
        }
        Self { width, height, pixels }
    }

    pub fn transparent(width: u32, height: u32) -> Self {
        Self::fill(width, height, [0, 0, 0, 0])
    }

    #[inline]
    fn pixel_at(&self, x: u32, y: u32) -> [u8; 4] {
        let idx = ((y as usize) * self.width as usize + x as usize) * 4;
        [self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2], self.pixels[idx + 3]]
    }

    #[inline]
    fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 4]) {
        let idx = ((y as usize) * self.width as usize + x as usize) * 4;
        self.pixels[idx..idx + 4].copy_from_slice(&color);
    }

    /// `Some(color)` iff every pixel equals the first pixel; mirrors
    /// `mapcache_image_blank_color`. Used by blank-tile detection and the
    /// dimension-assembly early opaque-exit.
    pub fn blank_color(&self) -> Option<[u8; 4]> {
        if self.pixels.is_empty() {
            return None;
        }
        let first = [self.pixels[0], self.pixels[1], self.pixels[2], self.pixels[3]];
        if self.pixels.chunks_exact(4).all(|p| p == first) {
            Some(first)
        } else {
            None
        }
    }

    /// Every alpha byte is 255.
    pub fn is_opaque(&self) -> bool {
        self.pixels.chunks_exact(4).all(|p| p[3] == 255)
    }

    /// Straight alpha blend of `other` over `self` at `(dst_x, dst_y)`:
    /// `dst = src*srcA + dst*(1-srcA)`. Used by dimension-stack assembly
    /// and the metatile-to-tile split paint step.
    pub fn composite_over(&mut self, other: &RawImage, dst_x: i64, dst_y: i64) {
        for sy in 0..other.height {
            let ty = dst_y + sy as i64;
            if ty < 0 || ty >= self.height as i64 {
                continue;
            }
            for sx in 0..other.width {
                let tx = dst_x + sx as i64;
                if tx < 0 || tx >= self.width as i64 {
                    continue;
                }
                let src = other.pixel_at(sx, sy);
                if src[3] == 0 {
                    continue;
                }
                if src[3] == 255 {
                    self.set_pixel(tx as u32, ty as u32, src);
                    continue;
                }
                let dst = self.pixel_at(tx as u32, ty as u32);
                let sa = src[3] as f32 / 255.0;
                let blended = [
                    (src[0] as f32 * sa + dst[0] as f32 * (1.0 - sa)).round() as u8,
                    (src[1] as f32 * sa + dst[1] as f32 * (1.0 - sa)).round() as u8,
                    (src[2] as f32 * sa + dst[2] as f32 * (1.0 - sa)).round() as u8,
                    (src[3] as f32 + dst[3] as f32 * (1.0 - sa)).round().min(255.0) as u8,
                ];
                self.set_pixel(tx as u32, ty as u32, blended);
            }
        }
    }

    /// Copy a `w x h` sub-rectangle starting at `(src_x, src_y)` out of
    /// `self` — used to split a rendered metatile into its child tiles.
    pub fn sub_rect(&self, src_x: u32, src_y: u32, w: u32, h: u32) -> RawImage {
        let mut out = RawImage::transparent(w, h);
        for row in 0..h {
            for col in 0..w {
                let px = self.pixel_at(src_x + col, src_y + row);
                out.set_pixel(col, row, px);
            }
        }
        out
    }

    /// Resample into a `dst_w x dst_h` buffer using nearest-neighbor or
    /// bilinear interpolation (map assembly, §4.5; out-of-zoom reassembly,
    /// §4.4).
    pub fn resample_into(&self, dst_w: u32, dst_h: u32, mode: ResampleMode) -> RawImage {
        if dst_w == self.width && dst_h == self.height {
            return self.clone();
        }
        let mut out = RawImage::transparent(dst_w, dst_h);
        let x_ratio = self.width as f64 / dst_w as f64;
        let y_ratio = self.height as f64 / dst_h as f64;
        for dy in 0..dst_h {
            for dx in 0..dst_w {
                let color = match mode {
                    ResampleMode::Nearest => {
                        let sx = ((dx as f64 * x_ratio) as u32).min(self.width - 1);
                        let sy = ((dy as f64 * y_ratio) as u32).min(self.height - 1);
                        self.pixel_at(sx, sy)
                    }
                    ResampleMode::Bilinear => self.bilinear_sample(
                        (dx as f64 + 0.5) * x_ratio - 0.5,
                        (dy as f64 + 0.5) * y_ratio - 0.5,
                    ),
                };
                out.set_pixel(dx, dy, color);
            }
        }
        out
    }

    fn bilinear_sample(&self, fx: f64, fy: f64) -> [u8; 4] {
        let x0 = fx.floor().max(0.0) as u32;
        let y0 = fy.floor().max(0.0) as u32;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let x0 = x0.min(self.width - 1);
        let y0 = y0.min(self.height - 1);
        let tx = (fx - x0 as f64).clamp(0.0, 1.0);
        let ty = (fy - y0 as f64).clamp(0.0, 1.0);
        let p00 = self.pixel_at(x0, y0);
        let p10 = self.pixel_at(x1, y0);
        let p01 = self.pixel_at(x0, y1);
        let p11 = self.pixel_at(x1, y1);
        let mut out = [0u8; 4];
        for c in 0..4 {
            let top = p00[c] as f64 * (1.0 - tx) + p10[c] as f64 * tx;
            let bottom = p01[c] as f64 * (1.0 - tx) + p11[c] as f64 * tx;
            out[c] = (top * (1.0 - ty) + bottom * ty).round() as u8;
        }
        out
    }
}

/// Resampling strategy used for map assembly and out-of-zoom reassembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResampleMode {
    Nearest,
    Bilinear,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_color_detects_uniform_image() {
        let img = RawImage::fill(4, 4, [10, 20, 30, 255]);
        assert_eq!(img.blank_color(), Some([10, 20, 30, 255]));
    }

    #[test]
    fn blank_color_none_for_nonuniform() {
        let mut img = RawImage::fill(2, 2, [1, 1, 1, 255]);
        img.set_pixel(1, 1, [2, 2, 2, 255]);
        assert_eq!(img.blank_color(), None);
    }

    #[test]
    fn composite_over_opaque_overwrites() {
        let mut base = RawImage::fill(2, 2, [0, 0, 0, 255]);
        let top = RawImage::fill(2, 2, [255, 255, 255, 255]);
        base.composite_over(&top, 0, 0);
        assert_eq!(base.pixel_at(0, 0), [255, 255, 255, 255]);
    }

    #[test]
    fn composite_over_transparent_is_noop() {
        let mut base = RawImage::fill(1, 1, [9, 9, 9, 255]);
        let top = RawImage::fill(1, 1, [0, 0, 0, 0]);
        base.composite_over(&top, 0, 0);
        assert_eq!(base.pixel_at(0, 0), [9, 9, 9, 255]);
    }

    #[test]
    fn sub_rect_extracts_region() {
        let mut img = RawImage::transparent(4, 4);
        img.set_pixel(2, 2, [7, 7, 7, 255]);
        let cropped = img.sub_rect(2, 2, 2, 2);
        assert_eq!(cropped.pixel_at(0, 0), [7, 7, 7, 255]);
    }

    #[test]
    fn resample_nearest_preserves_size_noop() {
        let img = RawImage::fill(4, 4, [1, 2, 3, 255]);
        let out = img.resample_into(4, 4, ResampleMode::Nearest);
        assert_eq!(out, img);
    }

    #[test]
    fn is_opaque_detects_full_alpha() {
        assert!(RawImage::fill(1, 1, [0, 0, 0, 255]).is_opaque());
        assert!(!RawImage::fill(1, 1, [0, 0, 0, 254]).is_opaque());
    }
}
