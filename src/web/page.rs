//! DOM-backed viewport, track and overlay.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use gloo_events::EventListener;
use web_sys::{HtmlElement, Window};

use crate::overlay::OverlayLayer;
use crate::viewport::{
    ObserverToken, PinnedTrack, TrackMetrics, ViewportEvent, ViewportMetrics, ViewportObserver,
    ViewportSink,
};

/// Window scroll and resize notifications.
pub struct WindowObserver {
    window: Window,
    listeners: RefCell<BTreeMap<ObserverToken, [EventListener; 2]>>,
    next_token: Cell<u64>,
}

impl WindowObserver {
    pub fn new() -> Result<Self> {
        let window = web_sys::window().ok_or_else(|| anyhow!("window not available"))?;
        Ok(Self {
            window,
            listeners: RefCell::new(BTreeMap::new()),
            next_token: Cell::new(0),
        })
    }
}

fn window_metrics(window: &Window) -> ViewportMetrics {
    let dimension = |value: Result<wasm_bindgen::JsValue, wasm_bindgen::JsValue>| {
        value.ok().and_then(|value| value.as_f64()).unwrap_or(0.0)
    };
    ViewportMetrics {
        width: dimension(window.inner_width()),
        height: dimension(window.inner_height()),
        scroll_y: window.scroll_y().unwrap_or(0.0),
    }
}

impl ViewportObserver for WindowObserver {
    fn metrics(&self) -> ViewportMetrics {
        window_metrics(&self.window)
    }

    fn attach(&self, sink: ViewportSink) -> ObserverToken {
        let token = ObserverToken(self.next_token.get());
        self.next_token.set(token.0 + 1);

        let scroll = {
            let window = self.window.clone();
            let sink = sink.clone();
            EventListener::new(&self.window, "scroll", move |_| {
                sink(ViewportEvent::Scroll {
                    y: window_metrics(&window).scroll_y,
                });
            })
        };
        let resize = {
            let window = self.window.clone();
            EventListener::new(&self.window, "resize", move |_| {
                let metrics = window_metrics(&window);
                sink(ViewportEvent::Resize {
                    width: metrics.width,
                    height: metrics.height,
                });
            })
        };
        self.listeners.borrow_mut().insert(token, [scroll, resize]);
        token
    }

    fn detach(&self, token: ObserverToken) -> bool {
        self.listeners.borrow_mut().remove(&token).is_some()
    }
}

/// Section whose scroll range drives the sequence, with the stage element
/// that stays fixed to the viewport while the section scrolls by.
pub struct ElementTrack {
    window: Window,
    track: HtmlElement,
    stage: HtmlElement,
}

impl ElementTrack {
    pub fn new(track: HtmlElement, stage: HtmlElement) -> Result<Self> {
        let window = web_sys::window().ok_or_else(|| anyhow!("window not available"))?;
        Ok(Self {
            window,
            track,
            stage,
        })
    }

    fn set_stage_style(&self, name: &str, value: Option<&str>) {
        let style = self.stage.style();
        let result = match value {
            Some(value) => style.set_property(name, value),
            None => style.remove_property(name).map(|_| ()),
        };
        if let Err(err) = result {
            log::warn!("failed to update stage style {name}: {err:?}");
        }
    }
}

impl PinnedTrack for ElementTrack {
    fn metrics(&self) -> TrackMetrics {
        let scroll_y = self.window.scroll_y().unwrap_or(0.0);
        let rect = self.track.get_bounding_client_rect();
        TrackMetrics {
            start: rect.top() + scroll_y,
            length: (rect.height() - self.stage.offset_height() as f64).max(0.0),
        }
    }

    fn pin(&self) {
        self.set_stage_style("position", Some("sticky"));
        self.set_stage_style("top", Some("0px"));
    }

    fn release(&self) {
        self.set_stage_style("position", None);
        self.set_stage_style("top", None);
    }
}

/// Overlay element whose CSS opacity follows the light curve.
pub struct StyleOverlay {
    element: HtmlElement,
}

impl StyleOverlay {
    pub fn new(element: HtmlElement) -> Self {
        Self { element }
    }
}

impl OverlayLayer for StyleOverlay {
    fn set_opacity(&mut self, opacity: f32) {
        if let Err(err) = self
            .element
            .style()
            .set_property("opacity", &format!("{opacity:.3}"))
        {
            log::warn!("failed to set overlay opacity: {err:?}");
        }
    }
}
