use std::borrow::Cow;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use bytemuck::{bytes_of, Pod, Zeroable};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use log::{debug, warn};
use winit::window::{Window, WindowId};

use super::{DrawGeometry, Surface};
use crate::overlay::SharedOpacity;

/// Frame surface that draws through wgpu into a winit window.
///
/// `draw` only uploads the frame and records where it goes; nothing reaches
/// the screen until [`GpuSurface::present`] runs the pass that draws the
/// frame quad and then the dimming overlay on top.
pub struct GpuSurface {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    frame_pipeline: wgpu::RenderPipeline,
    overlay_pipeline: wgpu::RenderPipeline,
    globals_buffer: wgpu::Buffer,
    globals_bind_group: wgpu::BindGroup,
    texture_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    texture: Option<FrameTexture>,
    placement: Option<DrawGeometry>,
    overlay: SharedOpacity,
}

struct FrameTexture {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    size: (u32, u32),
}

impl GpuSurface {
    /// Initializes the swap chain for `window`. The overlay is read from
    /// `overlay` on every present.
    pub async fn new(window: Arc<Window>, overlay: SharedOpacity) -> Result<Self> {
        let size = window.inner_size();
        if size.width == 0 || size.height == 0 {
            return Err(anyhow!("window has zero area"));
        }

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: Default::default(),
            backend_options: Default::default(),
        });
        let surface = instance.create_surface(Arc::clone(&window))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("failed to acquire GPU adapter")?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("sequence-device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                experimental_features: Default::default(),
                memory_hints: Default::default(),
                trace: Default::default(),
            })
            .await
            .context("failed to create GPU device")?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|format| format.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width,
            height: size.height,
            present_mode: wgpu::PresentMode::Fifo,
            desired_maximum_frame_latency: 2,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
        };
        surface.configure(&device, &config);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("sequence-shader"),
            source: wgpu::ShaderSource::Wgsl(SHADER.into()),
        });

        let globals_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("globals-bind-layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<Globals>() as u64),
                },
                count: None,
            }],
        });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("frame-bind-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let globals_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("globals-uniform"),
            size: std::mem::size_of::<Globals>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let globals_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("globals-bind-group"),
            layout: &globals_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: globals_buffer.as_entire_binding(),
            }],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("frame-sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let frame_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("frame-pipeline-layout"),
            bind_group_layouts: &[&globals_layout, &texture_layout],
            push_constant_ranges: &[],
        });
        let overlay_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("overlay-pipeline-layout"),
            bind_group_layouts: &[&globals_layout],
            push_constant_ranges: &[],
        });

        let frame_pipeline = create_pipeline(
            &device,
            &shader,
            &frame_layout,
            surface_format,
            ("frame-pipeline", "vs_frame", "fs_frame"),
        );
        let overlay_pipeline = create_pipeline(
            &device,
            &shader,
            &overlay_layout,
            surface_format,
            ("overlay-pipeline", "vs_overlay", "fs_overlay"),
        );

        debug!(
            "GPU surface ready at {}x{} ({surface_format:?})",
            config.width, config.height
        );

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            frame_pipeline,
            overlay_pipeline,
            globals_buffer,
            globals_bind_group,
            texture_layout,
            sampler,
            texture: None,
            placement: None,
            overlay,
        })
    }

    /// Returns the identifier of the window owned by the surface.
    pub fn window_id(&self) -> WindowId {
        self.window.id()
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Draws the uploaded frame and the overlay into the next swap chain image.
    pub fn present(&mut self) -> Result<(), wgpu::SurfaceError> {
        let size = (self.config.width, self.config.height);
        let globals = Globals {
            rect: self
                .placement
                .map(|geometry| ndc_rect(&geometry, size))
                .unwrap_or_default(),
            overlay: [0.0, 0.0, 0.0, self.overlay.get().clamp(0.0, 1.0)],
        };
        self.queue
            .write_buffer(&self.globals_buffer, 0, bytes_of(&globals));

        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("sequence-encoder"),
            });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("sequence-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            pass.set_bind_group(0, &self.globals_bind_group, &[]);
            if let (Some(texture), Some(_)) = (&self.texture, self.placement) {
                pass.set_pipeline(&self.frame_pipeline);
                pass.set_bind_group(1, &texture.bind_group, &[]);
                pass.draw(0..6, 0..1);
            }
            pass.set_pipeline(&self.overlay_pipeline);
            pass.draw(0..3, 0..1);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }

    fn upload(&mut self, image: &RgbaImage) {
        let limit = self.device.limits().max_texture_dimension_2d;
        let fitted = fit_within(image.dimensions(), limit);
        let pixels: Cow<'_, RgbaImage> = if fitted == image.dimensions() {
            Cow::Borrowed(image)
        } else {
            warn!(
                "frame {}x{} exceeds the {limit}px texture limit, downscaling",
                image.width(),
                image.height()
            );
            Cow::Owned(imageops::resize(image, fitted.0, fitted.1, FilterType::Triangle))
        };

        let reuse = matches!(&self.texture, Some(texture) if texture.size == fitted);
        if !reuse {
            self.texture = Some(self.create_texture(fitted));
        }
        let Some(texture) = &self.texture else {
            return;
        };
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels.as_raw(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * fitted.0),
                rows_per_image: Some(fitted.1),
            },
            wgpu::Extent3d {
                width: fitted.0,
                height: fitted.1,
                depth_or_array_layers: 1,
            },
        );
    }

    fn create_texture(&self, size: (u32, u32)) -> FrameTexture {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("frame-texture"),
            size: wgpu::Extent3d {
                width: size.0,
                height: size.1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("frame-bind-group"),
            layout: &self.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        FrameTexture {
            texture,
            bind_group,
            size,
        }
    }
}

impl Surface for GpuSurface {
    type Image = RgbaImage;

    fn size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    /// Reconfigures the swap chain to match the new dimensions.
    fn set_size(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
        self.placement = None;
    }

    fn clear(&mut self) {
        self.placement = None;
    }

    fn draw(&mut self, image: &RgbaImage, geometry: &DrawGeometry) -> Result<()> {
        if image.width() == 0 || image.height() == 0 {
            return Err(anyhow!("frame has zero area"));
        }
        self.upload(image);
        self.placement = Some(*geometry);
        Ok(())
    }
}

fn create_pipeline(
    device: &wgpu::Device,
    shader: &wgpu::ShaderModule,
    layout: &wgpu::PipelineLayout,
    format: wgpu::TextureFormat,
    (label, vertex, fragment): (&str, &str, &str),
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some(vertex),
            compilation_options: Default::default(),
            buffers: &[],
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some(fragment),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        multiview: None,
        cache: None,
    })
}

/// Converts a pixel-space placement into `[left, top, right, bottom]` in
/// normalized device coordinates.
fn ndc_rect(geometry: &DrawGeometry, surface: (u32, u32)) -> [f32; 4] {
    let width = surface.0.max(1) as f32;
    let height = surface.1.max(1) as f32;
    let to_x = |x: f32| x / width * 2.0 - 1.0;
    let to_y = |y: f32| 1.0 - y / height * 2.0;
    let end = geometry.offset + geometry.size;
    [
        to_x(geometry.offset.x),
        to_y(geometry.offset.y),
        to_x(end.x),
        to_y(end.y),
    ]
}

/// Largest size with the same aspect ratio that fits within `limit` on both
/// axes.
fn fit_within(size: (u32, u32), limit: u32) -> (u32, u32) {
    let longest = size.0.max(size.1);
    if longest <= limit || longest == 0 {
        return size;
    }
    let scale = limit as f64 / longest as f64;
    (
        ((size.0 as f64 * scale).round() as u32).clamp(1, limit),
        ((size.1 as f64 * scale).round() as u32).clamp(1, limit),
    )
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Globals {
    rect: [f32; 4],
    overlay: [f32; 4],
}

const SHADER: &str = r#"
struct Globals {
    rect: vec4<f32>,
    overlay: vec4<f32>,
}

@group(0) @binding(0)
var<uniform> globals: Globals;

@group(1) @binding(0)
var frame_texture: texture_2d<f32>;
@group(1) @binding(1)
var frame_sampler: sampler;

struct FrameVertex {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_frame(@builtin(vertex_index) index: u32) -> FrameVertex {
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(0.0, 0.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(0.0, 0.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(0.0, 1.0),
    );
    let corner = corners[index];
    var out: FrameVertex;
    out.position = vec4<f32>(
        mix(globals.rect.x, globals.rect.z, corner.x),
        mix(globals.rect.y, globals.rect.w, corner.y),
        0.0,
        1.0,
    );
    out.uv = corner;
    return out;
}

@fragment
fn fs_frame(input: FrameVertex) -> @location(0) vec4<f32> {
    return textureSample(frame_texture, frame_sampler, input.uv);
}

@vertex
fn vs_overlay(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    var corners = array<vec2<f32>, 3>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(3.0, -1.0),
        vec2<f32>(-1.0, 3.0),
    );
    return vec4<f32>(corners[index], 0.0, 1.0);
}

@fragment
fn fs_overlay() -> @location(0) vec4<f32> {
    return globals.overlay;
}
"#;

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use super::*;
    use crate::render::cover_fit;

    #[test]
    fn full_surface_maps_to_clip_space_corners() {
        let geometry = DrawGeometry {
            offset: Vec2::ZERO,
            size: Vec2::new(800.0, 600.0),
        };
        assert_eq!(ndc_rect(&geometry, (800, 600)), [-1.0, 1.0, 1.0, -1.0]);
    }

    #[test]
    fn cropped_cover_extends_past_clip_space() {
        let geometry = cover_fit((1600, 600), (800, 600));
        let [left, top, right, bottom] = ndc_rect(&geometry, (1600, 600));
        assert!((left + 1.0).abs() < 1e-4);
        assert!((right - 1.0).abs() < 1e-4);
        assert!((top - 2.0).abs() < 1e-3);
        assert!((bottom + 2.0).abs() < 1e-3);
    }

    #[test]
    fn oversized_frames_are_scaled_to_the_limit() {
        assert_eq!(fit_within((1920, 1080), 8192), (1920, 1080));
        assert_eq!(fit_within((16384, 8192), 8192), (8192, 4096));
        assert_eq!(fit_within((100, 20000), 2048), (10, 2048));
    }
}
