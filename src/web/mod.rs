//! Browser host: binds the engine to a canvas, an overlay element, a track
//! section, `requestAnimationFrame` and the window's scroll/resize events.

use std::rc::Rc;

use wasm_bindgen::prelude::*;
use web_sys::{HtmlCanvasElement, HtmlElement};

use crate::config::EngineConfig;
use crate::engine::{EngineHost, EngineState, SequenceEngine};
use crate::render::CanvasSurface;

mod page;
mod source;
mod ticker;

pub use page::{ElementTrack, StyleOverlay, WindowObserver};
pub use source::ImageElementSource;
pub use ticker::AnimationFrameTicker;

#[wasm_bindgen(start)]
pub fn bootstrap() {
    console_error_panic_hook::set_once();
    let _ = wasm_logger::init(wasm_logger::Config::default());
}

type WebEngine = SequenceEngine<ImageElementSource, CanvasSurface, StyleOverlay>;

/// Hero sequence mounted on a page.
#[wasm_bindgen]
pub struct ScrollSequence {
    engine: WebEngine,
}

#[wasm_bindgen]
impl ScrollSequence {
    /// `stage` is the element kept in view while `track` scrolls past; it
    /// normally contains both the canvas and the overlay. `manifest` is an
    /// optional `<sequence>` XML document overriding the defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(
        canvas: HtmlCanvasElement,
        overlay: HtmlElement,
        track: HtmlElement,
        stage: HtmlElement,
        manifest: Option<String>,
    ) -> Result<ScrollSequence, JsValue> {
        let config = match manifest {
            Some(xml) => EngineConfig::from_xml(&xml).map_err(to_js)?,
            None => EngineConfig::default(),
        };
        let host = EngineHost {
            ticker: Rc::new(AnimationFrameTicker::new().map_err(to_js)?),
            viewport: Rc::new(WindowObserver::new().map_err(to_js)?),
            track: Rc::new(ElementTrack::new(track, stage).map_err(to_js)?),
        };
        let surface = CanvasSurface::new(canvas).map_err(to_js)?;
        let engine = SequenceEngine::new(
            config,
            host,
            ImageElementSource::new(),
            surface,
            StyleOverlay::new(overlay),
        );
        Ok(Self { engine })
    }

    /// Starts preloading; the sequence binds itself once every frame is in.
    pub fn start(&self) {
        self.engine.start();
    }

    #[wasm_bindgen(js_name = framesReady)]
    pub fn frames_ready(&self) -> bool {
        self.engine.frames_ready()
    }

    /// Calls `callback` once the frames are ready, e.g. to dismiss a splash
    /// screen.
    #[wasm_bindgen(js_name = onReady)]
    pub fn on_ready(&self, callback: js_sys::Function) {
        self.engine.on_frames_ready(move || {
            if let Err(err) = callback.call0(&JsValue::NULL) {
                log::error!("frames-ready callback failed: {err:?}");
            }
        });
    }

    pub fn state(&self) -> String {
        self.engine.state().name().to_string()
    }

    /// Index of the failed frame, if preloading failed.
    #[wasm_bindgen(js_name = failedFrame)]
    pub fn failed_frame(&self) -> Option<u32> {
        match self.engine.state() {
            EngineState::Failed(err) => Some(err.index() as u32),
            _ => None,
        }
    }

    /// Frame currently shown, if any.
    #[wasm_bindgen(js_name = currentFrame)]
    pub fn current_frame(&self) -> Option<u32> {
        self.engine
            .playback_target()
            .map(|target| target.frame_index as u32)
    }

    pub fn teardown(&self) {
        self.engine.teardown();
    }
}

fn to_js(err: anyhow::Error) -> JsValue {
    JsValue::from_str(&format!("{err:?}"))
}
