use std::any::Any;
use std::env;
use std::fmt;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use log::{info, warn};
use pollster::block_on;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};

use scroll_sequence::render::GpuSurface;
use scroll_sequence::{
    DirectorySource, EngineConfig, EngineHost, EngineState, ManualTicker, PlaybackStrategy,
    RasterSurface, SequenceEngine, SharedOpacity, VirtualPage,
};

const FRAME: Duration = Duration::from_millis(16);
const LINE_HEIGHT: f64 = 60.0;

const USAGE: &str = "Usage: scroll-sequence <frames-dir> [--frames N] [--pattern P] \
[--manifest FILE] [--width W] [--height H] [--summary-only] [--sweep STEPS] [--snapshot OUT.png]";

#[cfg(not(target_arch = "wasm32"))]
fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

#[cfg(target_arch = "wasm32")]
fn main() {}

fn run() -> Result<()> {
    let options = CliOptions::parse(env::args().skip(1))?;
    let config = options.engine_config()?;

    if options.summary_only {
        run_headless(&options, config)
    } else {
        match run_interactive(&options, config.clone()) {
            Ok(()) => Ok(()),
            Err(err) => {
                if err.downcast_ref::<WindowInitError>().is_some() {
                    eprintln!(
                        "{err}. Falling back to --summary-only mode (set DISPLAY or install X11 libs to enable the preview)."
                    );
                    run_headless(&options, config)
                } else {
                    Err(err)
                }
            }
        }
    }
}

fn run_headless(options: &CliOptions, config: EngineConfig) -> Result<()> {
    let page = Rc::new(VirtualPage::new(options.width as f64, options.height as f64));
    let ticker = Rc::new(ManualTicker::new());
    let surface = RasterSurface::new(options.width, options.height);
    let overlay = surface.overlay_layer();
    let host = EngineHost {
        ticker: ticker.clone(),
        viewport: page.clone(),
        track: page.clone(),
    };
    let engine = SequenceEngine::new(
        config,
        host,
        DirectorySource::new(options.dir.clone()),
        surface,
        overlay,
    );

    engine.start();
    let handle = engine
        .load_handle()
        .ok_or_else(|| anyhow!("engine did not start"))?;
    handle.wait().context("failed to preload frames")?;
    ticker.advance(FRAME);
    if let EngineState::Failed(err) = engine.state() {
        return Err(err).context("failed to preload frames");
    }

    let store = engine.store().ok_or_else(|| anyhow!("engine did not start"))?;
    let first = store
        .image(0)
        .map(|image| image.dimensions())
        .unwrap_or_default();
    println!(
        "Loaded {} frame(s) ({}x{}) from {}",
        store.len(),
        first.0,
        first.1,
        options.dir.display()
    );
    let degraded = handle.degraded();
    if !degraded.is_empty() {
        println!("Degraded frame(s): {degraded:?}");
    }
    let class = engine
        .viewport_class()
        .ok_or_else(|| anyhow!("engine did not bind"))?;
    println!(
        "Viewport {}x{} ({class:?}), track spans {:.0}px",
        options.width,
        options.height,
        page.scroll_extent()
    );

    let progress = engine.subscribe_progress();
    let steps = options.sweep.max(1);
    match engine.strategy() {
        Some(PlaybackStrategy::Autoplay { duration }) => {
            println!("Autoplay over {:.3}s", duration.as_secs_f64());
            let mut elapsed = Duration::ZERO;
            for index in 0..=steps {
                let at = sweep_point(duration, index, steps);
                if index > 0 {
                    ticker.advance(at.saturating_sub(elapsed));
                }
                elapsed = at;
                let target = engine
                    .playback_target()
                    .ok_or_else(|| anyhow!("engine did not paint"))?;
                println!(
                    "t {:.3}s progress {:.3} frame {} overlay {:.3}",
                    at.as_secs_f64(),
                    progress.latest(),
                    target.frame_index,
                    target.overlay_opacity
                );
            }
        }
        _ => {
            println!("Scrubbing over {steps} step(s)");
            let extent = page.scroll_extent();
            for index in 0..=steps {
                let y = page.scroll_to(extent * f64::from(index) / f64::from(steps));
                ticker.advance(FRAME);
                let target = engine
                    .playback_target()
                    .ok_or_else(|| anyhow!("engine did not paint"))?;
                println!(
                    "scroll {:.1} progress {:.3} frame {} overlay {:.3}",
                    y,
                    progress.latest(),
                    target.frame_index,
                    target.overlay_opacity
                );
            }
        }
    }

    let stats = engine.with_renderer(|renderer| renderer.stats());
    println!(
        "Paints: {} (unchanged {}, not loaded {})",
        stats.paints, stats.unchanged, stats.not_loaded
    );

    if let Some(path) = &options.snapshot {
        engine.with_renderer(|renderer| renderer.surface().save_snapshot(path))?;
        println!("Snapshot written to {}", path.display());
    }

    engine.teardown();
    let counters = page.counters();
    info!(
        "Teardown: {} attach / {} detach, {} pin / {} release",
        counters.attaches, counters.detaches, counters.pins, counters.releases
    );
    Ok(())
}

/// Offset of sweep step `index` of `steps`, landing exactly on `duration`
/// at the last step.
fn sweep_point(duration: Duration, index: u32, steps: u32) -> Duration {
    let nanos = duration.as_nanos() * u128::from(index) / u128::from(steps.max(1));
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

fn run_interactive(options: &CliOptions, config: EngineConfig) -> Result<()> {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(|_| {}));
    let event_loop = panic::catch_unwind(AssertUnwindSafe(EventLoop::new));
    panic::set_hook(default_hook);
    let event_loop = event_loop
        .map_err(|panic| WindowInitError::from_panic("event loop", panic))?
        .map_err(|err| WindowInitError::from_error("event loop", err))?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = PreviewApp {
        options: options.clone(),
        config,
        preview: None,
        last_error: None,
    };
    event_loop
        .run_app(&mut app)
        .context("event loop terminated abnormally")?;

    if let Some(preview) = app.preview.take() {
        preview.engine.teardown();
    }
    if let Some(err) = app.last_error {
        return Err(err);
    }
    Ok(())
}

type PreviewEngine = SequenceEngine<DirectorySource, GpuSurface, SharedOpacity>;

struct PreviewApp {
    options: CliOptions,
    config: EngineConfig,
    preview: Option<Preview>,
    last_error: Option<anyhow::Error>,
}

struct Preview {
    engine: PreviewEngine,
    page: Rc<VirtualPage>,
    ticker: Rc<ManualTicker>,
    window: Arc<Window>,
    last_frame: Instant,
}

impl PreviewApp {
    fn create_preview(&self, event_loop: &ActiveEventLoop) -> Result<Preview> {
        let window = Arc::new(
            event_loop
                .create_window(
                    Window::default_attributes()
                        .with_title("Scroll Sequence")
                        .with_inner_size(LogicalSize::new(
                            self.options.width as f64,
                            self.options.height as f64,
                        )),
                )
                .map_err(|err| WindowInitError::from_error("window", err))?,
        );
        let overlay = SharedOpacity::new();
        let surface = block_on(GpuSurface::new(Arc::clone(&window), overlay.clone()))?;

        let size = window.inner_size();
        let page = Rc::new(VirtualPage::new(size.width as f64, size.height as f64));
        let ticker = Rc::new(ManualTicker::new());
        let host = EngineHost {
            ticker: ticker.clone(),
            viewport: page.clone(),
            track: page.clone(),
        };
        let engine = SequenceEngine::new(
            self.config.clone(),
            host,
            DirectorySource::new(self.options.dir.clone()),
            surface,
            overlay,
        );
        engine.on_frames_ready(|| info!("Frames ready; scroll to play the sequence"));
        engine.start();

        Ok(Preview {
            engine,
            page,
            ticker,
            window,
            last_frame: Instant::now(),
        })
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        self.last_error = Some(err);
        event_loop.exit();
    }
}

impl ApplicationHandler for PreviewApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.preview.is_some() {
            return;
        }
        match self.create_preview(event_loop) {
            Ok(preview) => self.preview = Some(preview),
            Err(err) => self.fail(event_loop, err),
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(preview) = self.preview.as_mut() else {
            return;
        };
        if window_id != preview.window.id() {
            return;
        }
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                preview.page.resize(size.width as f64, size.height as f64);
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let dy = match delta {
                    MouseScrollDelta::LineDelta(_, lines) => -lines as f64 * LINE_HEIGHT,
                    MouseScrollDelta::PixelDelta(position) => -position.y,
                };
                preview.page.scroll_by(dy);
            }
            WindowEvent::KeyboardInput { event, .. } if event.state == ElementState::Pressed => {
                match event.logical_key {
                    Key::Named(NamedKey::Escape) => event_loop.exit(),
                    Key::Named(NamedKey::ArrowDown) => {
                        preview.page.scroll_by(LINE_HEIGHT);
                    }
                    Key::Named(NamedKey::ArrowUp) => {
                        preview.page.scroll_by(-LINE_HEIGHT);
                    }
                    Key::Named(NamedKey::Home) => {
                        preview.page.scroll_to(0.0);
                    }
                    Key::Named(NamedKey::End) => {
                        let extent = preview.page.scroll_extent();
                        preview.page.scroll_to(extent);
                    }
                    _ => {}
                }
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                preview.ticker.advance(now - preview.last_frame);
                preview.last_frame = now;

                if let EngineState::Failed(err) = preview.engine.state() {
                    let err = anyhow::Error::new(err).context("failed to preload frames");
                    self.fail(event_loop, err);
                    return;
                }

                let presented = preview
                    .engine
                    .with_renderer_mut(|renderer| renderer.surface_mut().present());
                if let Err(err) = presented {
                    match err {
                        wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => {
                            let size = preview.window.inner_size();
                            preview.page.resize(size.width as f64, size.height as f64);
                        }
                        wgpu::SurfaceError::OutOfMemory => {
                            self.fail(event_loop, anyhow!("GPU is out of memory"));
                        }
                        wgpu::SurfaceError::Timeout => {
                            info!("Surface timeout; retrying next frame");
                        }
                        wgpu::SurfaceError::Other => {
                            warn!("Surface reported an unknown error; retrying next frame");
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(preview) = &self.preview {
            preview.window.request_redraw();
        }
    }
}

#[derive(Debug)]
struct WindowInitError {
    message: String,
}

impl WindowInitError {
    fn from_panic(stage: &str, panic: Box<dyn Any + Send>) -> Self {
        Self {
            message: format!("failed to initialize {stage}: {}", panic_message(panic)),
        }
    }

    fn from_error(stage: &str, err: impl fmt::Display) -> Self {
        Self {
            message: format!("failed to initialize {stage}: {err}"),
        }
    }
}

impl fmt::Display for WindowInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for WindowInitError {}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(msg) => *msg,
        Err(panic) => match panic.downcast::<&'static str>() {
            Ok(msg) => (*msg).to_string(),
            Err(_) => "unknown panic".into(),
        },
    }
}

#[derive(Debug, Clone)]
struct CliOptions {
    dir: PathBuf,
    frames: Option<usize>,
    pattern: Option<String>,
    manifest: Option<PathBuf>,
    width: u32,
    height: u32,
    summary_only: bool,
    sweep: u32,
    snapshot: Option<PathBuf>,
}

impl CliOptions {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let Some(dir) = args.next() else {
            bail!("{USAGE}");
        };
        let mut options = Self {
            dir: PathBuf::from(dir),
            frames: None,
            pattern: None,
            manifest: None,
            width: 1280,
            height: 720,
            summary_only: false,
            sweep: 8,
            snapshot: None,
        };
        while let Some(arg) = args.next() {
            let mut value = |flag: &str| {
                args.next()
                    .ok_or_else(|| anyhow!("Missing value for {flag}"))
            };
            match arg.as_str() {
                "--frames" => options.frames = Some(parse_number(&value("--frames")?, "--frames")?),
                "--pattern" => options.pattern = Some(value("--pattern")?),
                "--manifest" => options.manifest = Some(PathBuf::from(value("--manifest")?)),
                "--width" => options.width = parse_number(&value("--width")?, "--width")?,
                "--height" => options.height = parse_number(&value("--height")?, "--height")?,
                "--sweep" => options.sweep = parse_number(&value("--sweep")?, "--sweep")?,
                "--snapshot" => options.snapshot = Some(PathBuf::from(value("--snapshot")?)),
                "--summary-only" => options.summary_only = true,
                other => bail!("Unknown argument: {other}\n{USAGE}"),
            }
        }
        if options.width == 0 || options.height == 0 {
            bail!("viewport size must be non-zero");
        }
        Ok(options)
    }

    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.manifest {
            Some(path) => {
                let xml = fs::read_to_string(path)
                    .with_context(|| format!("failed to read manifest {}", path.display()))?;
                EngineConfig::from_xml(&xml)
                    .with_context(|| format!("failed to parse manifest {}", path.display()))?
            }
            None => EngineConfig::default(),
        };
        if let Some(frames) = self.frames {
            if frames == 0 {
                bail!("--frames must be at least 1");
            }
            config.frame_count = frames;
        }
        if let Some(pattern) = &self.pattern {
            config.source_pattern = pattern.clone();
        }
        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, flag: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|err| anyhow!("invalid value {value:?} for {flag}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliOptions> {
        CliOptions::parse(args.iter().map(|arg| arg.to_string()))
    }

    #[test]
    fn sweep_points_land_on_the_full_duration() {
        let duration = Duration::from_millis(250);
        assert_eq!(sweep_point(duration, 0, 3), Duration::ZERO);
        assert_eq!(sweep_point(duration, 3, 3), duration);
        assert_eq!(sweep_point(duration, u32::MAX, u32::MAX), duration);
        assert!(sweep_point(duration, 1, 3) < sweep_point(duration, 2, 3));
    }

    #[test]
    fn oversized_sweep_is_rejected() {
        let err = parse(&["frames", "--sweep", "4294967296"]).unwrap_err();
        assert!(err.to_string().contains("--sweep"));
        assert_eq!(parse(&["frames", "--sweep", "12"]).unwrap().sweep, 12);
    }
}
