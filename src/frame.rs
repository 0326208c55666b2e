use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Number of frames in the stock hero sequence (`frame_000` .. `frame_191`).
pub const DEFAULT_FRAME_COUNT: usize = 192;

/// Raster handle that the renderer can fit onto a surface.
pub trait FrameImage {
    fn dimensions(&self) -> (u32, u32);
}

impl FrameImage for image::RgbaImage {
    fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }
}

/// Name of the frame at `index`, zero padded to three digits.
pub fn frame_name(index: usize) -> String {
    format!("frame_{index:03}")
}

/// Nominal display time of a frame as exported with the sequence assets.
pub fn frame_delay(index: usize) -> Duration {
    if index % 3 == 1 {
        Duration::from_millis(41)
    } else {
        Duration::from_millis(42)
    }
}

/// Source descriptor for one frame of the sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSpec {
    pub index: usize,
    pub name: String,
    pub delay: Duration,
    pub source: String,
}

impl FrameSpec {
    /// Resolves the frame's source from a pattern with `{name}`, `{index}`
    /// and `{delay}` placeholders.
    pub fn from_pattern(pattern: &str, index: usize) -> Self {
        let name = frame_name(index);
        let delay = frame_delay(index);
        let source = pattern
            .replace("{name}", &name)
            .replace("{index}", &format!("{index:03}"))
            .replace("{delay}", &format!("{:.3}s", delay.as_secs_f64()));
        Self {
            index,
            name,
            delay,
            source,
        }
    }
}

/// Builds the dense, ordered spec list for `count` frames.
pub fn sequence_specs(pattern: &str, count: usize) -> Vec<FrameSpec> {
    (0..count)
        .map(|index| FrameSpec::from_pattern(pattern, index))
        .collect()
}

/// Total nominal playback time of a spec list.
pub fn sequence_duration(specs: &[FrameSpec]) -> Duration {
    specs.iter().map(|spec| spec.delay).sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameStatus {
    Pending,
    Loaded,
    Failed,
}

/// One slot of the frame set.
#[derive(Debug)]
pub struct Frame<I> {
    pub index: usize,
    pub image: Option<Arc<I>>,
    pub status: FrameStatus,
}

impl<I> Clone for Frame<I> {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            image: self.image.clone(),
            status: self.status,
        }
    }
}

/// Fixed-size, index-addressed frame collection shared between the loader
/// and the renderer.
#[derive(Debug)]
pub struct FrameStore<I> {
    slots: Vec<RwLock<Frame<I>>>,
    loaded: AtomicUsize,
    released: AtomicBool,
}

impl<I> FrameStore<I> {
    /// Creates `count` pending frames.
    pub fn new(count: usize) -> Self {
        let slots = (0..count)
            .map(|index| {
                RwLock::new(Frame {
                    index,
                    image: None,
                    status: FrameStatus::Pending,
                })
            })
            .collect();
        Self {
            slots,
            loaded: AtomicUsize::new(0),
            released: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns a snapshot of the frame at `index`, or `None` when out of range.
    pub fn get(&self, index: usize) -> Option<Frame<I>> {
        self.slots.get(index).map(|slot| slot.read().clone())
    }

    /// Returns the raster at `index` if that frame has finished loading.
    pub fn image(&self, index: usize) -> Option<Arc<I>> {
        let slot = self.slots.get(index)?.read();
        match slot.status {
            FrameStatus::Loaded => slot.image.clone(),
            _ => None,
        }
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.load(Ordering::Acquire)
    }

    /// True once every frame is loaded.
    pub fn all_ready(&self) -> bool {
        !self.released.load(Ordering::Acquire) && self.loaded_count() == self.len()
    }

    /// Drops every raster. Publishes arriving afterwards are ignored.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        for slot in &self.slots {
            let mut frame = slot.write();
            frame.image = None;
            frame.status = FrameStatus::Pending;
        }
        self.loaded.store(0, Ordering::Release);
    }

    pub(crate) fn publish(&self, index: usize, image: I) -> bool {
        if self.released.load(Ordering::Acquire) {
            return false;
        }
        let Some(slot) = self.slots.get(index) else {
            return false;
        };
        let mut frame = slot.write();
        if frame.status == FrameStatus::Loaded {
            return false;
        }
        frame.image = Some(Arc::new(image));
        frame.status = FrameStatus::Loaded;
        self.loaded.fetch_add(1, Ordering::AcqRel);
        true
    }

    pub(crate) fn mark_failed(&self, index: usize) {
        if let Some(slot) = self.slots.get(index) {
            let mut frame = slot.write();
            if frame.status == FrameStatus::Pending {
                frame.status = FrameStatus::Failed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_zero_padded() {
        assert_eq!(frame_name(0), "frame_000");
        assert_eq!(frame_name(7), "frame_007");
        assert_eq!(frame_name(191), "frame_191");
    }

    #[test]
    fn pattern_resolves_delay_suffix() {
        let pattern = "/sequence/{name}_delay-{delay}.webp";
        assert_eq!(
            FrameSpec::from_pattern(pattern, 0).source,
            "/sequence/frame_000_delay-0.042s.webp"
        );
        assert_eq!(
            FrameSpec::from_pattern(pattern, 1).source,
            "/sequence/frame_001_delay-0.041s.webp"
        );
        assert_eq!(FrameSpec::from_pattern("{index}.png", 12).source, "012.png");
    }

    #[test]
    fn stock_sequence_runs_about_eight_seconds() {
        let specs = sequence_specs("{name}", DEFAULT_FRAME_COUNT);
        assert_eq!(specs.len(), DEFAULT_FRAME_COUNT);
        assert_eq!(sequence_duration(&specs), Duration::from_millis(8000));
    }

    #[test]
    fn store_tracks_readiness() {
        let store = FrameStore::<u32>::new(3);
        assert!(!store.all_ready());
        assert!(store.publish(2, 20));
        assert!(store.publish(0, 0));
        assert!(!store.publish(0, 99), "second publish is ignored");
        assert_eq!(store.loaded_count(), 2);
        assert!(store.image(1).is_none());
        assert!(store.publish(1, 10));
        assert!(store.all_ready());
        assert_eq!(*store.image(0).unwrap(), 0);
        assert!(store.get(3).is_none());
    }

    #[test]
    fn failed_frames_are_not_ready() {
        let store = FrameStore::<u32>::new(2);
        store.mark_failed(1);
        assert_eq!(store.get(1).unwrap().status, FrameStatus::Failed);
        assert!(store.image(1).is_none());
    }

    #[test]
    fn release_drops_images_and_ignores_late_publishes() {
        let store = FrameStore::<u32>::new(2);
        store.publish(0, 1);
        store.release();
        assert!(store.image(0).is_none());
        assert!(!store.publish(1, 2));
        assert!(!store.all_ready());
        store.release();
    }
}
