//! Software canvas used by the headless CLI and by tests.

use std::path::Path;

use anyhow::{bail, Context, Result};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

use super::{DrawGeometry, Surface};
use crate::overlay::SharedOpacity;

/// Frame surface backed by an in-memory RGBA buffer.
///
/// The dimming overlay is kept separate and only composed into
/// [`RasterSurface::snapshot`], matching how a page stacks the overlay
/// element above the canvas.
pub struct RasterSurface {
    canvas: RgbaImage,
    overlay: SharedOpacity,
}

impl RasterSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: RgbaImage::new(width, height),
            overlay: SharedOpacity::new(),
        }
    }

    /// Layer handle to hand to an [`crate::overlay::OverlayController`].
    pub fn overlay_layer(&self) -> SharedOpacity {
        self.overlay.clone()
    }

    pub fn overlay_opacity(&self) -> f32 {
        self.overlay.get()
    }

    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    /// Canvas with the black overlay composed on top.
    pub fn snapshot(&self) -> RgbaImage {
        let alpha = self.overlay.get().clamp(0.0, 1.0);
        let mut composed = self.canvas.clone();
        for pixel in composed.pixels_mut() {
            let [r, g, b, a] = pixel.0;
            let keep = 1.0 - alpha;
            let out_alpha = alpha + (a as f32 / 255.0) * keep;
            *pixel = Rgba([
                (r as f32 * keep).round() as u8,
                (g as f32 * keep).round() as u8,
                (b as f32 * keep).round() as u8,
                (out_alpha * 255.0).round() as u8,
            ]);
        }
        composed
    }

    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        self.snapshot()
            .save(path)
            .with_context(|| format!("failed to write snapshot {}", path.display()))
    }
}

impl Surface for RasterSurface {
    type Image = RgbaImage;

    fn size(&self) -> (u32, u32) {
        self.canvas.dimensions()
    }

    fn set_size(&mut self, width: u32, height: u32) {
        self.canvas = RgbaImage::new(width, height);
    }

    fn clear(&mut self) {
        for pixel in self.canvas.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }

    fn draw(&mut self, image: &RgbaImage, geometry: &DrawGeometry) -> Result<()> {
        if image.width() == 0 || image.height() == 0 {
            bail!("frame has zero area");
        }
        let (canvas_width, canvas_height) = self.canvas.dimensions();
        let (Some(x), Some(y)) = (
            visible_span(canvas_width, geometry.offset.x, geometry.size.x, image.width()),
            visible_span(canvas_height, geometry.offset.y, geometry.size.y, image.height()),
        ) else {
            return Ok(());
        };

        let width = x.dest_len.round().max(1.0) as u32;
        let height = y.dest_len.round().max(1.0) as u32;
        let source = imageops::crop_imm(image, x.start, y.start, x.len, y.len).to_image();
        let scaled = if (width, height) == source.dimensions() {
            source
        } else {
            imageops::resize(&source, width, height, FilterType::Triangle)
        };
        imageops::overlay(
            &mut self.canvas,
            &scaled,
            x.dest_offset.round() as i64,
            y.dest_offset.round() as i64,
        );
        Ok(())
    }
}

/// Source pixels along one axis that land on the canvas, and where they go.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Span {
    start: u32,
    len: u32,
    dest_offset: f32,
    dest_len: f32,
}

fn visible_span(canvas: u32, offset: f32, size: f32, source: u32) -> Option<Span> {
    if !(size.is_finite() && size > 0.0 && offset.is_finite()) {
        return None;
    }
    let visible_from = offset.max(0.0);
    let visible_to = (offset + size).min(canvas as f32);
    if visible_to <= visible_from {
        return None;
    }
    let scale = size / source as f32;
    let start = (((visible_from - offset) / scale).floor() as u32).min(source - 1);
    let end = (((visible_to - offset) / scale).ceil() as u32).clamp(start + 1, source);
    Some(Span {
        start,
        len: end - start,
        dest_offset: offset + start as f32 * scale,
        dest_len: (end - start) as f32 * scale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameStore;
    use crate::overlay::OverlayLayer;
    use crate::render::{cover_fit, PaintOutcome, Renderer};

    fn solid(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba(color))
    }

    #[test]
    fn cover_draw_fills_the_whole_canvas() {
        let mut surface = RasterSurface::new(4, 4);
        let frame = solid(4, 2, [200, 10, 10, 255]);
        let geometry = cover_fit(surface.size(), frame.dimensions());
        surface.draw(&frame, &geometry).unwrap();
        for pixel in surface.canvas().pixels() {
            assert!(pixel.0[0] >= 195, "{pixel:?}");
            assert!(pixel.0[3] >= 250, "{pixel:?}");
        }
    }

    #[test]
    fn clear_and_resize_drop_pixels() {
        let mut surface = RasterSurface::new(2, 2);
        let frame = solid(2, 2, [0, 255, 0, 255]);
        surface.draw(&frame, &cover_fit((2, 2), (2, 2))).unwrap();
        surface.clear();
        assert!(surface.canvas().pixels().all(|p| p.0 == [0, 0, 0, 0]));

        surface.set_size(3, 1);
        assert_eq!(surface.size(), (3, 1));
    }

    #[test]
    fn snapshot_composes_the_overlay() {
        let mut surface = RasterSurface::new(2, 2);
        let frame = solid(2, 2, [200, 200, 200, 255]);
        surface.draw(&frame, &cover_fit((2, 2), (2, 2))).unwrap();
        surface.overlay_layer().set_opacity(0.5);

        let snapshot = surface.snapshot();
        let pixel = snapshot.get_pixel(0, 0).0;
        assert_eq!(pixel, [100, 100, 100, 255]);
        // The canvas itself is untouched.
        assert_eq!(surface.canvas().get_pixel(0, 0).0[0], 200);
    }

    #[test]
    fn renderer_paints_into_the_raster() {
        let store = FrameStore::new(1);
        store.publish(0, solid(8, 8, [9, 9, 9, 255]));
        let mut renderer = Renderer::new(RasterSurface::new(4, 4));
        assert_eq!(renderer.paint(0, &store), PaintOutcome::Painted);
        let [r, _, _, a] = renderer.surface().canvas().get_pixel(3, 3).0;
        assert!((8..=10).contains(&r));
        assert!(a >= 250);
    }

    #[test]
    fn snapshot_is_written_as_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.png");
        let surface = RasterSurface::new(5, 3);
        surface.save_snapshot(&path).unwrap();
        let written = image::open(&path).unwrap();
        assert_eq!((written.width(), written.height()), (5, 3));
    }

    #[test]
    fn only_the_visible_source_rows_are_resampled() {
        let span = visible_span(720, -63640.0, 128000.0, 1000).unwrap();
        assert_eq!((span.start, span.len), (497, 6));
        assert_eq!(span.dest_offset, -24.0);
        assert_eq!(span.dest_len, 768.0);

        let full = visible_span(64, 0.0, 64.0, 16).unwrap();
        assert_eq!((full.start, full.len), (0, 16));
        assert!(visible_span(64, 64.0, 10.0, 4).is_none());
        assert!(visible_span(0, 0.0, 10.0, 4).is_none());
    }

    #[test]
    fn extreme_aspect_frames_still_cover_the_canvas() {
        let mut surface = RasterSurface::new(1280, 720);
        let mut frame = solid(10, 1000, [0, 0, 0, 255]);
        for y in 490..510 {
            for x in 0..10 {
                frame.put_pixel(x, y, Rgba([0, 0, 250, 255]));
            }
        }
        let geometry = cover_fit(surface.size(), frame.dimensions());
        surface.draw(&frame, &geometry).unwrap();
        for (x, y) in [(0, 0), (640, 360), (1279, 719)] {
            let pixel = surface.canvas().get_pixel(x, y).0;
            assert!(pixel[2] >= 245 && pixel[3] >= 250, "({x}, {y}) {pixel:?}");
        }
    }
}
