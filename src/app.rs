//! Simulated page used by the native hosts: one viewport over a document
//! whose only feature is the pinned track.

use std::collections::BTreeMap;

use log::trace;
use parking_lot::{Mutex, RwLock};

use crate::viewport::{
    ObserverToken, PinnedTrack, TrackMetrics, ViewportEvent, ViewportMetrics, ViewportObserver,
    ViewportSink,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PageCounters {
    pub attaches: usize,
    pub detaches: usize,
    pub pins: usize,
    pub releases: usize,
}

#[derive(Debug)]
struct PageState {
    metrics: ViewportMetrics,
    track_start: f64,
    /// Track length in viewport heights.
    track_screens: f64,
    pinned: bool,
    counters: PageCounters,
}

/// Viewport and pinned track of a page that exists only in memory.
///
/// The track spans `track_screens` viewport heights so it keeps its
/// proportions across resizes, like a section sized in `vh`.
pub struct VirtualPage {
    state: RwLock<PageState>,
    sinks: Mutex<BTreeMap<ObserverToken, ViewportSink>>,
    next_token: Mutex<u64>,
}

impl VirtualPage {
    /// Page whose track starts at the top and spans one screen.
    pub fn new(width: f64, height: f64) -> Self {
        Self::with_track(width, height, 0.0, 1.0)
    }

    pub fn with_track(width: f64, height: f64, track_start: f64, track_screens: f64) -> Self {
        Self {
            state: RwLock::new(PageState {
                metrics: ViewportMetrics {
                    width,
                    height,
                    scroll_y: 0.0,
                },
                track_start: track_start.max(0.0),
                track_screens: track_screens.max(0.0),
                pinned: false,
                counters: PageCounters::default(),
            }),
            sinks: Mutex::new(BTreeMap::new()),
            next_token: Mutex::new(0),
        }
    }

    /// Furthest scroll offset: the end of the track.
    pub fn scroll_extent(&self) -> f64 {
        let track = self.track_metrics();
        track.start + track.length
    }

    /// Scrolls to `y`, clamped to the page, and notifies observers.
    pub fn scroll_to(&self, y: f64) -> f64 {
        let extent = self.scroll_extent();
        let y = if y.is_finite() { y.clamp(0.0, extent) } else { 0.0 };
        self.state.write().metrics.scroll_y = y;
        trace!("Scrolled to {y:.1}");
        self.dispatch(ViewportEvent::Scroll { y });
        y
    }

    pub fn scroll_by(&self, delta: f64) -> f64 {
        let current = self.state.read().metrics.scroll_y;
        self.scroll_to(current + delta)
    }

    /// Resizes the viewport and notifies observers.
    pub fn resize(&self, width: f64, height: f64) {
        {
            let mut state = self.state.write();
            state.metrics.width = width;
            state.metrics.height = height;
        }
        self.dispatch(ViewportEvent::Resize { width, height });
        let extent = self.scroll_extent();
        let scroll_y = self.state.read().metrics.scroll_y;
        if scroll_y > extent {
            self.scroll_to(extent);
        }
    }

    pub fn counters(&self) -> PageCounters {
        self.state.read().counters
    }

    pub fn is_pinned(&self) -> bool {
        self.state.read().pinned
    }

    /// Observers currently attached.
    pub fn observers(&self) -> usize {
        self.sinks.lock().len()
    }

    fn track_metrics(&self) -> TrackMetrics {
        let state = self.state.read();
        TrackMetrics {
            start: state.track_start,
            length: state.metrics.height * state.track_screens,
        }
    }

    fn dispatch(&self, event: ViewportEvent) {
        let sinks: Vec<ViewportSink> = self.sinks.lock().values().cloned().collect();
        for sink in sinks {
            sink(event);
        }
    }
}

impl ViewportObserver for VirtualPage {
    fn metrics(&self) -> ViewportMetrics {
        self.state.read().metrics
    }

    fn attach(&self, sink: ViewportSink) -> ObserverToken {
        let token = {
            let mut next = self.next_token.lock();
            let token = ObserverToken(*next);
            *next += 1;
            token
        };
        self.sinks.lock().insert(token, sink);
        self.state.write().counters.attaches += 1;
        token
    }

    fn detach(&self, token: ObserverToken) -> bool {
        let removed = self.sinks.lock().remove(&token).is_some();
        if removed {
            self.state.write().counters.detaches += 1;
        }
        removed
    }
}

impl PinnedTrack for VirtualPage {
    fn metrics(&self) -> TrackMetrics {
        self.track_metrics()
    }

    fn pin(&self) {
        let mut state = self.state.write();
        state.pinned = true;
        state.counters.pins += 1;
    }

    fn release(&self) {
        let mut state = self.state.write();
        state.pinned = false;
        state.counters.releases += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn scroll_is_clamped_to_the_track() {
        let page = VirtualPage::with_track(1280.0, 800.0, 100.0, 2.0);
        assert_eq!(page.scroll_extent(), 1700.0);
        assert_eq!(page.scroll_to(-50.0), 0.0);
        assert_eq!(page.scroll_to(5000.0), 1700.0);
        assert_eq!(page.scroll_by(-200.0), 1500.0);
    }

    #[test]
    fn observers_receive_events_until_detached() {
        let page = VirtualPage::new(1280.0, 800.0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let token = page.attach(Rc::new(move |event| sink.borrow_mut().push(event)));

        page.scroll_to(200.0);
        page.resize(1024.0, 700.0);
        assert!(page.detach(token));
        assert!(!page.detach(token));
        page.scroll_to(300.0);

        assert_eq!(
            *seen.borrow(),
            vec![
                ViewportEvent::Scroll { y: 200.0 },
                ViewportEvent::Resize {
                    width: 1024.0,
                    height: 700.0
                },
            ]
        );
        let counters = page.counters();
        assert_eq!((counters.attaches, counters.detaches), (1, 1));
    }

    #[test]
    fn track_follows_the_viewport_height() {
        let page = VirtualPage::new(800.0, 600.0);
        assert_eq!(PinnedTrack::metrics(&page).length, 600.0);
        page.resize(800.0, 900.0);
        assert_eq!(PinnedTrack::metrics(&page).length, 900.0);
    }
}
