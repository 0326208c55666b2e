//! Frame painting.
//!
//! [`Renderer`] owns one [`Surface`] and decides when a paint is needed; the
//! surfaces only know how to clear and draw. `raster` is a software canvas
//! available everywhere, `native` draws through wgpu into a winit window and
//! `wasm` draws into an HTML canvas.

use anyhow::Result;
use glam::Vec2;
use log::{trace, warn};

use crate::frame::{FrameImage, FrameStore};

pub mod raster;

#[cfg(not(target_arch = "wasm32"))]
pub mod native;
#[cfg(target_arch = "wasm32")]
pub mod wasm;

pub use raster::RasterSurface;

#[cfg(not(target_arch = "wasm32"))]
pub use native::GpuSurface;
#[cfg(target_arch = "wasm32")]
pub use wasm::CanvasSurface;

/// Pixel target the renderer paints frames into.
pub trait Surface {
    type Image: FrameImage;

    fn size(&self) -> (u32, u32);

    /// Resizes the backing store. Existing pixels are discarded.
    fn set_size(&mut self, width: u32, height: u32);

    fn clear(&mut self);

    fn draw(&mut self, image: &Self::Image, geometry: &DrawGeometry) -> Result<()>;
}

/// Placement of a frame on the surface, in surface pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawGeometry {
    pub offset: Vec2,
    pub size: Vec2,
}

/// Scales `image` to cover `canvas` completely, preserving its aspect ratio
/// and centring it so the overflow is cropped evenly on one axis.
pub fn cover_fit(canvas: (u32, u32), image: (u32, u32)) -> DrawGeometry {
    let canvas = Vec2::new(canvas.0 as f32, canvas.1 as f32);
    if image.0 == 0 || image.1 == 0 || canvas.y == 0.0 {
        return DrawGeometry {
            offset: Vec2::ZERO,
            size: canvas,
        };
    }
    let image_aspect = image.0 as f32 / image.1 as f32;
    let canvas_aspect = canvas.x / canvas.y;
    let size = if canvas_aspect > image_aspect {
        Vec2::new(canvas.x, canvas.x / image_aspect)
    } else {
        Vec2::new(canvas.y * image_aspect, canvas.y)
    };
    DrawGeometry {
        offset: (canvas - size) / 2.0,
        size,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaintOutcome {
    Painted,
    /// The requested frame is already on the surface.
    Unchanged,
    /// The requested frame has not finished loading.
    NotLoaded,
    /// The surface rejected the draw; the next tick retries.
    DrawFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderStats {
    pub paints: usize,
    pub unchanged: usize,
    pub not_loaded: usize,
    pub geometry_updates: usize,
}

#[derive(Debug, Clone, Copy)]
struct CachedGeometry {
    canvas: (u32, u32),
    image: (u32, u32),
    geometry: DrawGeometry,
}

/// Paints frames onto a surface, skipping work whenever it can.
pub struct Renderer<S: Surface> {
    surface: S,
    geometry: Option<CachedGeometry>,
    last_painted: Option<usize>,
    stats: RenderStats,
}

impl<S: Surface> Renderer<S> {
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            geometry: None,
            last_painted: None,
            stats: RenderStats::default(),
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn size(&self) -> (u32, u32) {
        self.surface.size()
    }

    pub fn last_painted(&self) -> Option<usize> {
        self.last_painted
    }

    pub fn geometry(&self) -> Option<DrawGeometry> {
        self.geometry.map(|cached| cached.geometry)
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    /// Resizes the surface. A real size change drops the cached geometry and
    /// the painted index, since the surface lost its pixels. Zero areas are
    /// ignored.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 || self.surface.size() == (width, height) {
            return false;
        }
        trace!("Surface resized to {width}x{height}");
        self.surface.set_size(width, height);
        self.geometry = None;
        self.last_painted = None;
        true
    }

    /// Paints `index` from `store` unless it is already shown or not loaded.
    pub fn paint(&mut self, index: usize, store: &FrameStore<S::Image>) -> PaintOutcome {
        if self.last_painted == Some(index) {
            self.stats.unchanged += 1;
            return PaintOutcome::Unchanged;
        }
        let Some(image) = store.image(index) else {
            self.stats.not_loaded += 1;
            return PaintOutcome::NotLoaded;
        };

        let canvas = self.surface.size();
        let dimensions = image.dimensions();
        let geometry = match self.geometry {
            Some(cached) if cached.canvas == canvas && cached.image == dimensions => {
                cached.geometry
            }
            _ => {
                let geometry = cover_fit(canvas, dimensions);
                self.geometry = Some(CachedGeometry {
                    canvas,
                    image: dimensions,
                    geometry,
                });
                self.stats.geometry_updates += 1;
                geometry
            }
        };

        self.surface.clear();
        if let Err(err) = self.surface.draw(&image, &geometry) {
            warn!("failed to draw frame {index}: {err:?}");
            return PaintOutcome::DrawFailed;
        }
        self.last_painted = Some(index);
        self.stats.paints += 1;
        PaintOutcome::Painted
    }
}
