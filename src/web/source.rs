use std::cell::RefCell;
use std::rc::Rc;

use gloo_events::EventListener;
use wasm_bindgen_futures::{spawn_local, JsFuture};
use web_sys::HtmlImageElement;

use crate::error::{DecodeError, FetchError};
use crate::frame::FrameSpec;
use crate::loader::{FetchReply, Fetched, FrameSource, RequestResources};

/// Loads frames through `<img>` elements, running `decode()` on each before
/// handing it over so the first paint does not stall on decoding.
///
/// The load/error listener pair of a frame is dropped once that frame
/// settles, outside the listener callback that settled it.
#[derive(Default)]
pub struct ImageElementSource {
    listeners: RequestResources<[EventListener; 2]>,
}

impl ImageElementSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames whose load or error event has not fired yet.
    pub fn pending(&self) -> usize {
        self.listeners.len()
    }
}

impl FrameSource for ImageElementSource {
    type Image = HtmlImageElement;

    fn request(&self, spec: &FrameSpec, reply: FetchReply<Self>) {
        let image = match HtmlImageElement::new() {
            Ok(image) => image,
            Err(err) => {
                reply.complete(Err(FetchError::new(format!(
                    "failed to create image element: {err:?}"
                ))));
                return;
            }
        };
        let index = spec.index;
        let reply = Rc::new(RefCell::new(Some(reply)));

        let on_load = {
            let loaded = image.clone();
            let reply = Rc::clone(&reply);
            let listeners = self.listeners.clone();
            EventListener::once(&image, "load", move |_| {
                let Some(reply) = reply.borrow_mut().take() else {
                    return;
                };
                let image = loaded.clone();
                spawn_local(async move {
                    drop(listeners.settle(index));
                    let fetched = match JsFuture::from(image.decode()).await {
                        Ok(_) => Fetched::decoded(image),
                        Err(err) => {
                            Fetched::degraded(image, DecodeError::new(format!("{err:?}")))
                        }
                    };
                    reply.complete(Ok(fetched));
                });
            })
        };
        let on_error = {
            let source = spec.source.clone();
            let listeners = self.listeners.clone();
            EventListener::once(&image, "error", move |_| {
                let Some(reply) = reply.borrow_mut().take() else {
                    return;
                };
                reply.complete(Err(FetchError::new(format!("failed to load {source}"))));
                spawn_local(async move {
                    drop(listeners.settle(index));
                });
            })
        };
        self.listeners.hold(index, [on_load, on_error]);
        image.set_src(&spec.source);
    }
}
