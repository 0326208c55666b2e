//! The engine state machine that wires loading, scroll binding, mapping,
//! painting and the overlay together.
//!
//! ```text
//! Idle --start--> Preloading --all frames--> Ready --bind--> Bound --teardown--> Unbound
//!                     |
//!                     +--fetch failure--> Failed
//! ```
//!
//! All host-side work runs on one thread: the engine lives behind
//! `Rc<RefCell<..>>` and is driven by the injected [`Ticker`] and by
//! viewport events. Callbacks handed to the host only hold weak references,
//! so dropping the engine is enough to stop it.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::mem;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::FrameLoadError;
use crate::frame::{FrameSpec, FrameStore};
use crate::loader::{FrameSource, LoadHandle, LoadState};
use crate::mapper::{FrameIndexMapper, PlaybackTarget};
use crate::overlay::{LaggedOpacity, OverlayController, OverlayLayer};
use crate::progress::{progress_channel, ProgressPublisher, ProgressSubscriber};
use crate::render::{Renderer, Surface};
use crate::scroll::{PlaybackStrategy, ScrollBinder};
use crate::ticker::{Tick, Ticker, TickerToken};
use crate::viewport::{ObserverToken, PinnedTrack, ViewportClass, ViewportEvent, ViewportObserver};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Preloading,
    Ready,
    Bound,
    Unbound,
    Failed(FrameLoadError),
}

impl EngineState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Preloading => "preloading",
            Self::Ready => "ready",
            Self::Bound => "bound",
            Self::Unbound => "unbound",
            Self::Failed(_) => "failed",
        }
    }
}

/// Collaborators supplied by the hosting page.
#[derive(Clone)]
pub struct EngineHost {
    pub ticker: Rc<dyn Ticker>,
    pub viewport: Rc<dyn ViewportObserver>,
    pub track: Rc<dyn PinnedTrack>,
}

type ReadyListener = Box<dyn FnOnce()>;

/// Scroll-synchronized image sequence.
pub struct SequenceEngine<S, C, L>
where
    S: FrameSource + 'static,
    C: Surface<Image = S::Image> + 'static,
    L: OverlayLayer + 'static,
{
    inner: Rc<RefCell<EngineCore<S, C, L>>>,
    events: Rc<RefCell<VecDeque<ViewportEvent>>>,
}

struct EngineCore<S, C, L>
where
    S: FrameSource,
    C: Surface<Image = S::Image>,
{
    config: EngineConfig,
    specs: Vec<FrameSpec>,
    host: EngineHost,
    source: Arc<S>,
    renderer: Renderer<C>,
    overlay: OverlayController<L>,
    lag: LaggedOpacity,
    mapper: FrameIndexMapper,
    state: EngineState,
    load: Option<LoadHandle<S>>,
    store: Option<Arc<FrameStore<S::Image>>>,
    tick_token: Option<TickerToken>,
    observer_token: Option<ObserverToken>,
    publisher: Option<ProgressPublisher>,
    progress: ProgressSubscriber,
    binder: Option<ScrollBinder>,
    class: Option<ViewportClass>,
    ready_listeners: Vec<ReadyListener>,
    frames_ready: bool,
    target: Option<PlaybackTarget>,
    now: Duration,
}

impl<S, C, L> SequenceEngine<S, C, L>
where
    S: FrameSource + 'static,
    C: Surface<Image = S::Image> + 'static,
    L: OverlayLayer + 'static,
{
    pub fn new(config: EngineConfig, host: EngineHost, source: S, surface: C, overlay: L) -> Self {
        let specs = config.specs();
        let (publisher, progress) = progress_channel();
        let core = EngineCore {
            mapper: FrameIndexMapper::new(specs.len(), config.light_curve),
            lag: LaggedOpacity::new(config.overlay_lag),
            specs,
            config,
            host,
            source: Arc::new(source),
            renderer: Renderer::new(surface),
            overlay: OverlayController::new(overlay),
            state: EngineState::Idle,
            load: None,
            store: None,
            tick_token: None,
            observer_token: None,
            publisher: Some(publisher),
            progress,
            binder: None,
            class: None,
            ready_listeners: Vec::new(),
            frames_ready: false,
            target: None,
            now: Duration::ZERO,
        };
        Self {
            inner: Rc::new(RefCell::new(core)),
            events: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    /// Starts preloading and registers the tick callback. Only valid while
    /// idle; later calls are ignored.
    pub fn start(&self) {
        let mut core = self.inner.borrow_mut();
        if core.state != EngineState::Idle {
            warn!("start() ignored in state {:?}", core.state);
            return;
        }
        core.state = EngineState::Preloading;
        let handle = core
            .config
            .loader()
            .load(Arc::clone(&core.source), core.specs.clone());
        core.store = Some(handle.store());
        core.load = Some(handle);

        let weak = Rc::downgrade(&self.inner);
        let events = Rc::downgrade(&self.events);
        let token = core.host.ticker.register(Box::new(move |tick| {
            if let (Some(inner), Some(events)) = (weak.upgrade(), events.upgrade()) {
                Self::on_tick(&inner, &events, tick);
            }
        }));
        core.tick_token = Some(token);
    }

    pub fn state(&self) -> EngineState {
        self.inner.borrow().state.clone()
    }

    /// The load failure, once the engine has failed.
    pub fn error(&self) -> Option<FrameLoadError> {
        match &self.inner.borrow().state {
            EngineState::Failed(err) => Some(err.clone()),
            _ => None,
        }
    }

    pub fn frames_ready(&self) -> bool {
        self.inner.borrow().frames_ready
    }

    /// Runs `listener` once every frame has loaded. Runs it immediately when
    /// that already happened; never runs it if the preload fails.
    pub fn on_frames_ready(&self, listener: impl FnOnce() + 'static) {
        let mut core = self.inner.borrow_mut();
        if !core.frames_ready {
            core.ready_listeners.push(Box::new(listener));
            return;
        }
        drop(core);
        listener();
    }

    pub fn subscribe_progress(&self) -> ProgressSubscriber {
        self.inner.borrow().progress.clone()
    }

    pub fn load_state(&self) -> Option<LoadState> {
        self.inner.borrow().load.as_ref().map(LoadHandle::state)
    }

    /// Handle onto the running preload, once started.
    pub fn load_handle(&self) -> Option<LoadHandle<S>> {
        self.inner.borrow().load.clone()
    }

    pub fn store(&self) -> Option<Arc<FrameStore<S::Image>>> {
        self.inner.borrow().store.clone()
    }

    /// Target derived on the most recent bound tick.
    pub fn playback_target(&self) -> Option<PlaybackTarget> {
        self.inner.borrow().target
    }

    pub fn viewport_class(&self) -> Option<ViewportClass> {
        self.inner.borrow().class
    }

    pub fn strategy(&self) -> Option<PlaybackStrategy> {
        self.inner
            .borrow()
            .binder
            .as_ref()
            .map(ScrollBinder::strategy)
    }

    pub fn with_renderer<R>(&self, f: impl FnOnce(&Renderer<C>) -> R) -> R {
        f(&self.inner.borrow().renderer)
    }

    pub fn with_renderer_mut<R>(&self, f: impl FnOnce(&mut Renderer<C>) -> R) -> R {
        f(&mut self.inner.borrow_mut().renderer)
    }

    pub fn with_overlay<R>(&self, f: impl FnOnce(&L) -> R) -> R {
        f(self.inner.borrow().overlay.layer())
    }

    /// Stops ticking, detaches from the viewport, releases the track and
    /// drops the frames. Safe to call in any state and more than once.
    pub fn teardown(&self) {
        let Ok(mut core) = self.inner.try_borrow_mut() else {
            warn!("teardown() called while the engine is busy; ignored");
            return;
        };
        core.teardown();
        self.events.borrow_mut().clear();
    }

    fn on_tick(
        inner: &Rc<RefCell<EngineCore<S, C, L>>>,
        events: &Rc<RefCell<VecDeque<ViewportEvent>>>,
        tick: Tick,
    ) {
        let listeners = {
            let Ok(mut core) = inner.try_borrow_mut() else {
                return;
            };
            core.now = tick.now;
            match core.state {
                EngineState::Preloading => {
                    let sink = Self::event_sink(Rc::downgrade(inner), Rc::downgrade(events));
                    core.poll_load(sink, tick)
                }
                EngineState::Bound => {
                    core.drain_events(events);
                    core.advance(tick);
                    Vec::new()
                }
                _ => Vec::new(),
            }
        };
        for listener in listeners {
            listener();
        }
    }

    /// Queues viewport events and handles them right away when the engine is
    /// not in the middle of a tick.
    fn event_sink(
        inner: Weak<RefCell<EngineCore<S, C, L>>>,
        events: Weak<RefCell<VecDeque<ViewportEvent>>>,
    ) -> Rc<dyn Fn(ViewportEvent)> {
        Rc::new(move |event| {
            let (Some(inner), Some(events)) = (inner.upgrade(), events.upgrade()) else {
                return;
            };
            events.borrow_mut().push_back(event);
            let borrowed = inner.try_borrow_mut();
            if let Ok(mut core) = borrowed {
                if core.state == EngineState::Bound {
                    core.drain_events(&events);
                }
            }
        })
    }
}

impl<S, C, L> Drop for SequenceEngine<S, C, L>
where
    S: FrameSource + 'static,
    C: Surface<Image = S::Image> + 'static,
    L: OverlayLayer + 'static,
{
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<S, C, L> EngineCore<S, C, L>
where
    S: FrameSource,
    C: Surface<Image = S::Image>,
    L: OverlayLayer,
{
    fn poll_load(&mut self, sink: Rc<dyn Fn(ViewportEvent)>, tick: Tick) -> Vec<ReadyListener> {
        let Some(outcome) = self.load.as_ref().and_then(LoadHandle::outcome) else {
            return Vec::new();
        };
        match outcome {
            Ok(()) => {
                info!("Frames ready ({} total)", self.specs.len());
                self.state = EngineState::Ready;
                self.frames_ready = true;
                self.bind(sink, tick);
                mem::take(&mut self.ready_listeners)
            }
            Err(err) => {
                error!("Preload failed at frame {}: {err}", err.index());
                if let Some(token) = self.tick_token.take() {
                    self.host.ticker.unregister(token);
                }
                self.ready_listeners.clear();
                self.state = EngineState::Failed(err);
                Vec::new()
            }
        }
    }

    fn bind(&mut self, sink: Rc<dyn Fn(ViewportEvent)>, tick: Tick) {
        let Some(publisher) = self.publisher.take() else {
            return;
        };
        self.observer_token = Some(self.host.viewport.attach(sink));
        let metrics = self.host.viewport.metrics();
        let class = ViewportClass::classify(metrics.width, self.config.compact_breakpoint);
        let strategy = PlaybackStrategy::for_class(class, self.autoplay_duration());
        info!(
            "Binding at {:.0}x{:.0} as {class:?}",
            metrics.width, metrics.height
        );
        self.class = Some(class);
        self.renderer
            .resize(logical_to_pixels(metrics.width), logical_to_pixels(metrics.height));
        self.binder = Some(ScrollBinder::bind(
            Rc::clone(&self.host.track),
            strategy,
            publisher,
            metrics.scroll_y,
        ));
        self.state = EngineState::Bound;
        self.advance(Tick {
            now: tick.now,
            delta: Duration::ZERO,
        });
    }

    fn autoplay_duration(&self) -> Duration {
        self.config.autoplay_duration_for(&self.specs)
    }

    fn drain_events(&mut self, events: &RefCell<VecDeque<ViewportEvent>>) {
        loop {
            let Some(event) = events.borrow_mut().pop_front() else {
                break;
            };
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: ViewportEvent) {
        let Some(binder) = self.binder.as_mut() else {
            return;
        };
        match event {
            ViewportEvent::Scroll { y } => binder.observe_scroll(y),
            ViewportEvent::Resize { width, height } => {
                let resized = self
                    .renderer
                    .resize(logical_to_pixels(width), logical_to_pixels(height));
                binder.refresh_metrics();
                if self.config.reclassify_on_resize {
                    let class = ViewportClass::classify(width, self.config.compact_breakpoint);
                    if self.class != Some(class) {
                        let duration = self.config.autoplay_duration_for(&self.specs);
                        binder.set_strategy(PlaybackStrategy::for_class(class, duration));
                        self.class = Some(class);
                    }
                }
                if resized {
                    debug!("Repainting after resize to {width:.0}x{height:.0}");
                    self.advance(Tick {
                        now: self.now,
                        delta: Duration::ZERO,
                    });
                }
            }
        }
    }

    fn advance(&mut self, tick: Tick) {
        let (Some(binder), Some(store)) = (self.binder.as_mut(), self.store.as_ref()) else {
            return;
        };
        binder.tick(tick.now);
        let target = self.mapper.map(self.progress.latest());
        self.renderer.paint(target.frame_index, store);
        let opacity = if self.lag.is_enabled() {
            self.lag.step(target.overlay_opacity, tick.delta)
        } else {
            target.overlay_opacity
        };
        self.overlay.apply(opacity);
        self.target = Some(target);
    }

    fn teardown(&mut self) {
        if let Some(token) = self.tick_token.take() {
            self.host.ticker.unregister(token);
        }
        if let Some(token) = self.observer_token.take() {
            self.host.viewport.detach(token);
        }
        if let Some(binder) = self.binder.as_mut() {
            binder.unbind();
        }
        if let Some(store) = &self.store {
            store.release();
        }
        self.ready_listeners.clear();
        match self.state {
            EngineState::Failed(_) | EngineState::Unbound => {}
            _ => {
                debug!("Engine torn down from {:?}", self.state);
                self.state = EngineState::Unbound;
            }
        }
    }
}

fn logical_to_pixels(value: f64) -> u32 {
    if value.is_finite() && value > 0.0 {
        value.round().min(u32::MAX as f64) as u32
    } else {
        0
    }
}
