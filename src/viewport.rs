use std::rc::Rc;

use serde::{Deserialize, Serialize};

/// Viewport size and vertical scroll offset, in logical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewportMetrics {
    pub width: f64,
    pub height: f64,
    pub scroll_y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewportEvent {
    Scroll { y: f64 },
    Resize { width: f64, height: f64 },
}

pub type ViewportSink = Rc<dyn Fn(ViewportEvent)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverToken(pub u64);

/// Source of scroll and resize notifications supplied by the hosting page.
pub trait ViewportObserver {
    fn metrics(&self) -> ViewportMetrics;

    /// Starts delivering events to `sink` until the token is detached.
    fn attach(&self, sink: ViewportSink) -> ObserverToken;

    /// Returns false when the token was not attached.
    fn detach(&self, token: ObserverToken) -> bool;
}

/// Where the pinned track sits in the document.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackMetrics {
    /// Scroll offset at which the track reaches the top of the viewport.
    pub start: f64,
    /// Scroll distance consumed while the track is pinned.
    pub length: f64,
}

/// Handle to the scroll region that drives the animation.
pub trait PinnedTrack {
    fn metrics(&self) -> TrackMetrics;

    /// Reserves the track's scroll space and fixes it to the viewport.
    fn pin(&self);

    /// Gives the reservation back. Called once per `pin`.
    fn release(&self);
}

/// Device class derived from the viewport width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViewportClass {
    /// Narrow, typically touch-driven viewports.
    Compact,
    /// Pointer-driven desktop viewports.
    Wide,
}

impl ViewportClass {
    pub fn classify(width: f64, breakpoint: f64) -> Self {
        if width < breakpoint {
            Self::Compact
        } else {
            Self::Wide
        }
    }
}

impl<T> ViewportObserver for Rc<T>
where
    T: ViewportObserver + ?Sized,
{
    fn metrics(&self) -> ViewportMetrics {
        (**self).metrics()
    }

    fn attach(&self, sink: ViewportSink) -> ObserverToken {
        (**self).attach(sink)
    }

    fn detach(&self, token: ObserverToken) -> bool {
        (**self).detach(token)
    }
}

impl<T> PinnedTrack for Rc<T>
where
    T: PinnedTrack + ?Sized,
{
    fn metrics(&self) -> TrackMetrics {
        (**self).metrics()
    }

    fn pin(&self) {
        (**self).pin()
    }

    fn release(&self) {
        (**self).release()
    }
}
