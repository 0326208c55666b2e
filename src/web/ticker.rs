use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::JsCast;
use web_sys::Window;

use crate::ticker::{Tick, TickCallback, TickRegistry, Ticker, TickerToken};

/// Ticker driven by `requestAnimationFrame`. The loop only runs while at
/// least one callback is registered.
pub struct AnimationFrameTicker {
    registry: Rc<TickRegistry>,
    frame: Rc<FrameLoop>,
}

struct FrameLoop {
    window: Window,
    callback: RefCell<Option<Closure<dyn FnMut(f64)>>>,
    pending: Cell<Option<i32>>,
    last: Cell<Option<f64>>,
}

impl AnimationFrameTicker {
    pub fn new() -> Result<Self> {
        let window = web_sys::window().ok_or_else(|| anyhow!("window not available"))?;
        let registry = Rc::new(TickRegistry::new());
        let frame = Rc::new(FrameLoop {
            window,
            callback: RefCell::new(None),
            pending: Cell::new(None),
            last: Cell::new(None),
        });

        let weak_frame = Rc::downgrade(&frame);
        let weak_registry = Rc::downgrade(&registry);
        let closure = Closure::wrap(Box::new(move |timestamp: f64| {
            let (Some(frame), Some(registry)) = (weak_frame.upgrade(), weak_registry.upgrade())
            else {
                return;
            };
            frame.pending.set(None);
            let delta = frame
                .last
                .replace(Some(timestamp))
                .map(|last| (timestamp - last).max(0.0))
                .unwrap_or(0.0);
            registry.dispatch(Tick {
                now: millis(timestamp),
                delta: millis(delta),
            });
            if registry.is_empty() {
                frame.last.set(None);
            } else {
                frame.request();
            }
        }) as Box<dyn FnMut(f64)>);
        *frame.callback.borrow_mut() = Some(closure);

        Ok(Self { registry, frame })
    }
}

impl FrameLoop {
    fn request(&self) {
        if self.pending.get().is_some() {
            return;
        }
        let callback = self.callback.borrow();
        let Some(callback) = callback.as_ref() else {
            return;
        };
        match self
            .window
            .request_animation_frame(callback.as_ref().unchecked_ref())
        {
            Ok(handle) => self.pending.set(Some(handle)),
            Err(err) => log::error!("requestAnimationFrame failed: {err:?}"),
        }
    }

    fn cancel(&self) {
        if let Some(handle) = self.pending.take() {
            let _ = self.window.cancel_animation_frame(handle);
        }
        self.last.set(None);
    }
}

impl Ticker for AnimationFrameTicker {
    fn register(&self, callback: TickCallback) -> TickerToken {
        let token = self.registry.insert(callback);
        self.frame.request();
        token
    }

    fn unregister(&self, token: TickerToken) -> bool {
        let removed = self.registry.remove(token);
        if self.registry.is_empty() {
            self.frame.cancel();
        }
        removed
    }
}

impl Drop for AnimationFrameTicker {
    fn drop(&mut self) {
        self.frame.cancel();
        self.frame.callback.borrow_mut().take();
    }
}

fn millis(value: f64) -> Duration {
    Duration::from_secs_f64((value / 1000.0).max(0.0))
}
