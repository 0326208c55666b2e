use anyhow::{anyhow, Result};
use wasm_bindgen::JsCast;
use web_sys::{
    CanvasRenderingContext2d, HtmlCanvasElement, HtmlImageElement, ImageSmoothingQuality,
};

use super::{DrawGeometry, Surface};
use crate::frame::FrameImage;

impl FrameImage for HtmlImageElement {
    fn dimensions(&self) -> (u32, u32) {
        (self.natural_width(), self.natural_height())
    }
}

/// Frame surface backed by a 2D canvas for WebAssembly builds.
pub struct CanvasSurface {
    canvas: HtmlCanvasElement,
    context: CanvasRenderingContext2d,
}

impl CanvasSurface {
    /// Creates a surface that draws into the provided HTML canvas element.
    pub fn new(canvas: HtmlCanvasElement) -> Result<Self> {
        let context = canvas
            .get_context("2d")
            .map_err(|err| anyhow!("failed to query canvas context: {err:?}"))?
            .ok_or_else(|| anyhow!("canvas does not support 2d context"))?
            .dyn_into::<CanvasRenderingContext2d>()
            .map_err(|_| anyhow!("failed to cast canvas context"))?;
        let surface = Self { canvas, context };
        surface.configure_smoothing();
        Ok(surface)
    }

    pub fn canvas(&self) -> &HtmlCanvasElement {
        &self.canvas
    }

    // Resizing a canvas resets its context state, smoothing included.
    fn configure_smoothing(&self) {
        self.context.set_image_smoothing_enabled(true);
        self.context
            .set_image_smoothing_quality(ImageSmoothingQuality::High);
    }
}

impl Surface for CanvasSurface {
    type Image = HtmlImageElement;

    fn size(&self) -> (u32, u32) {
        (self.canvas.width(), self.canvas.height())
    }

    fn set_size(&mut self, width: u32, height: u32) {
        self.canvas.set_width(width);
        self.canvas.set_height(height);
        self.configure_smoothing();
    }

    fn clear(&mut self) {
        self.context.clear_rect(
            0.0,
            0.0,
            self.canvas.width() as f64,
            self.canvas.height() as f64,
        );
    }

    fn draw(&mut self, image: &HtmlImageElement, geometry: &DrawGeometry) -> Result<()> {
        self.context
            .draw_image_with_html_image_element_and_dw_and_dh(
                image,
                geometry.offset.x as f64,
                geometry.offset.y as f64,
                geometry.size.x as f64,
                geometry.size.y as f64,
            )
            .map_err(|err| anyhow!("failed to draw frame: {err:?}"))
    }
}
