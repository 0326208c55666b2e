use std::rc::Rc;
use std::time::Duration;

use log::{debug, info};

use crate::progress::ProgressPublisher;
use crate::viewport::{PinnedTrack, TrackMetrics, ViewportClass};

/// How progress is derived while the track is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStrategy {
    /// Progress follows the scroll position through the track, reversibly.
    Scrub,
    /// Progress ramps from 0 to 1 over `duration` once the track is reached,
    /// independent of further scrolling.
    Autoplay { duration: Duration },
}

impl PlaybackStrategy {
    pub fn for_class(class: ViewportClass, autoplay_duration: Duration) -> Self {
        match class {
            ViewportClass::Wide => Self::Scrub,
            ViewportClass::Compact => Self::Autoplay {
                duration: autoplay_duration,
            },
        }
    }
}

/// Linear position of `scroll_y` within the track, clamped to [0, 1].
pub fn scroll_progress(scroll_y: f64, track: TrackMetrics) -> f32 {
    let travelled = scroll_y - track.start;
    if track.length <= 0.0 {
        return if travelled >= 0.0 { 1.0 } else { 0.0 };
    }
    (travelled / track.length).clamp(0.0, 1.0) as f32
}

/// Pins the track and publishes its progress once per tick.
pub struct ScrollBinder {
    track: Rc<dyn PinnedTrack>,
    metrics: TrackMetrics,
    strategy: PlaybackStrategy,
    scroll_y: f64,
    ramp_started: Option<Duration>,
    publisher: ProgressPublisher,
    pinned: bool,
}

impl ScrollBinder {
    pub fn bind(
        track: Rc<dyn PinnedTrack>,
        strategy: PlaybackStrategy,
        publisher: ProgressPublisher,
        scroll_y: f64,
    ) -> Self {
        track.pin();
        let metrics = track.metrics();
        debug!(
            "Bound track at {:.0}px spanning {:.0}px ({strategy:?})",
            metrics.start, metrics.length
        );
        Self {
            track,
            metrics,
            strategy,
            scroll_y,
            ramp_started: None,
            publisher,
            pinned: true,
        }
    }

    pub fn strategy(&self) -> PlaybackStrategy {
        self.strategy
    }

    /// Switches strategy; an autoplay ramp in progress starts over.
    pub fn set_strategy(&mut self, strategy: PlaybackStrategy) {
        if strategy != self.strategy {
            info!("Playback strategy changed to {strategy:?}");
            self.strategy = strategy;
            self.ramp_started = None;
        }
    }

    pub fn observe_scroll(&mut self, scroll_y: f64) {
        self.scroll_y = scroll_y;
    }

    pub fn refresh_metrics(&mut self) {
        if self.pinned {
            self.metrics = self.track.metrics();
        }
    }

    pub fn metrics(&self) -> TrackMetrics {
        self.metrics
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Derives and publishes progress for the tick at `now`.
    pub fn tick(&mut self, now: Duration) -> f32 {
        let progress = match self.strategy {
            PlaybackStrategy::Scrub => scroll_progress(self.scroll_y, self.metrics),
            PlaybackStrategy::Autoplay { duration } => {
                if self.ramp_started.is_none() && self.scroll_y >= self.metrics.start {
                    debug!("Autoplay ramp started at {now:?}");
                    self.ramp_started = Some(now);
                }
                match self.ramp_started {
                    None => 0.0,
                    Some(_) if duration.is_zero() => 1.0,
                    Some(started) => {
                        let elapsed = now.saturating_sub(started);
                        (elapsed.as_secs_f64() / duration.as_secs_f64()).min(1.0) as f32
                    }
                }
            }
        };
        self.publisher.publish(progress);
        progress
    }

    /// Releases the pin. Safe to call repeatedly.
    pub fn unbind(&mut self) {
        if self.pinned {
            self.pinned = false;
            self.track.release();
            debug!("Released pinned track");
        }
    }
}

impl Drop for ScrollBinder {
    fn drop(&mut self) {
        self.unbind();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::progress::progress_channel;

    #[derive(Default)]
    struct FixedTrack {
        pins: Cell<usize>,
        releases: Cell<usize>,
    }

    impl PinnedTrack for FixedTrack {
        fn metrics(&self) -> TrackMetrics {
            TrackMetrics {
                start: 100.0,
                length: 400.0,
            }
        }

        fn pin(&self) {
            self.pins.set(self.pins.get() + 1);
        }

        fn release(&self) {
            self.releases.set(self.releases.get() + 1);
        }
    }

    fn secs(value: f64) -> Duration {
        Duration::from_secs_f64(value)
    }

    #[test]
    fn scroll_progress_is_linear_and_clamped() {
        let track = TrackMetrics {
            start: 100.0,
            length: 400.0,
        };
        assert_eq!(scroll_progress(0.0, track), 0.0);
        assert_eq!(scroll_progress(300.0, track), 0.5);
        assert_eq!(scroll_progress(500.0, track), 1.0);
        assert_eq!(scroll_progress(9000.0, track), 1.0);

        let flat = TrackMetrics {
            start: 50.0,
            length: 0.0,
        };
        assert_eq!(scroll_progress(49.0, flat), 0.0);
        assert_eq!(scroll_progress(50.0, flat), 1.0);
    }

    #[test]
    fn scrub_follows_scroll_both_ways() {
        let track = Rc::new(FixedTrack::default());
        let (publisher, subscriber) = progress_channel();
        let mut binder = ScrollBinder::bind(track.clone(), PlaybackStrategy::Scrub, publisher, 0.0);

        binder.observe_scroll(200.0);
        assert_eq!(binder.tick(secs(0.1)), 0.25);
        binder.observe_scroll(400.0);
        binder.tick(secs(0.2));
        assert_eq!(subscriber.latest(), 0.75);
        binder.observe_scroll(100.0);
        assert_eq!(binder.tick(secs(0.3)), 0.0);
    }

    #[test]
    fn autoplay_ignores_scroll_once_started() {
        let track = Rc::new(FixedTrack::default());
        let (publisher, _subscriber) = progress_channel();
        let strategy = PlaybackStrategy::Autoplay { duration: secs(2.0) };
        let mut binder = ScrollBinder::bind(track, strategy, publisher, 0.0);

        assert_eq!(binder.tick(secs(1.0)), 0.0, "track not reached yet");
        binder.observe_scroll(120.0);
        assert_eq!(binder.tick(secs(2.0)), 0.0);
        binder.observe_scroll(5000.0);
        assert_eq!(binder.tick(secs(3.0)), 0.5);
        binder.observe_scroll(0.0);
        assert_eq!(binder.tick(secs(4.0)), 1.0);
        assert_eq!(binder.tick(secs(9.0)), 1.0);
    }

    #[test]
    fn unbind_releases_once() {
        let track = Rc::new(FixedTrack::default());
        let (publisher, _subscriber) = progress_channel();
        let mut binder = ScrollBinder::bind(track.clone(), PlaybackStrategy::Scrub, publisher, 0.0);
        binder.unbind();
        binder.unbind();
        drop(binder);
        assert_eq!(track.pins.get(), 1);
        assert_eq!(track.releases.get(), 1);
    }

    #[test]
    fn strategy_follows_viewport_class() {
        let duration = secs(8.0);
        assert_eq!(
            PlaybackStrategy::for_class(ViewportClass::Wide, duration),
            PlaybackStrategy::Scrub
        );
        assert_eq!(
            PlaybackStrategy::for_class(ViewportClass::Compact, duration),
            PlaybackStrategy::Autoplay { duration }
        );
    }
}
