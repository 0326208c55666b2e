use serde::{Deserialize, Serialize};

/// What the surface and the overlay should show for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackTarget {
    pub frame_index: usize,
    pub overlay_opacity: f32,
}

/// `floor(progress * (count - 1))`, clamped to the valid index range.
///
/// Progress of exactly 1.0 selects the last frame; non-finite progress is
/// treated as 0.
pub fn frame_index(progress: f32, frame_count: usize) -> usize {
    if frame_count == 0 {
        return 0;
    }
    let progress = sanitize(progress) as f64;
    let last = frame_count - 1;
    let index = (progress * last as f64).floor() as usize;
    index.min(last)
}

/// Overlay opacity over the scroll range: an ease-out rise from `baseline`
/// to `peak` at `peak_at`, then an ease-in-out fall to `rest` at the end.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LightCurve {
    pub baseline: f32,
    pub peak: f32,
    pub rest: f32,
    pub peak_at: f32,
}

impl Default for LightCurve {
    fn default() -> Self {
        Self {
            baseline: 0.0,
            peak: 0.4,
            rest: 0.1,
            peak_at: 0.5,
        }
    }
}

impl LightCurve {
    pub fn opacity(&self, progress: f32) -> f32 {
        let progress = sanitize(progress);
        let peak_at = self.peak_at.clamp(f32::EPSILON, 1.0 - f32::EPSILON);
        let value = if progress <= peak_at {
            let t = progress / peak_at;
            lerp(self.baseline, self.peak, ease_out(t))
        } else {
            let t = (progress - peak_at) / (1.0 - peak_at);
            lerp(self.peak, self.rest, ease_in_out(t))
        };
        value.clamp(0.0, 1.0)
    }
}

/// Maps published progress onto a [`PlaybackTarget`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameIndexMapper {
    frame_count: usize,
    curve: LightCurve,
}

impl FrameIndexMapper {
    pub fn new(frame_count: usize, curve: LightCurve) -> Self {
        Self { frame_count, curve }
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn map(&self, progress: f32) -> PlaybackTarget {
        PlaybackTarget {
            frame_index: frame_index(progress, self.frame_count),
            overlay_opacity: self.curve.opacity(progress),
        }
    }
}

fn sanitize(progress: f32) -> f32 {
    if progress.is_finite() {
        progress.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn lerp(from: f32, to: f32, t: f32) -> f32 {
    from + (to - from) * t
}

fn ease_out(t: f32) -> f32 {
    1.0 - (1.0 - t) * (1.0 - t)
}

fn ease_in_out(t: f32) -> f32 {
    t * t * (3.0 - 2.0 * t)
}

#[cfg(test)]
mod tests {
    use super::*;

    const N: usize = 192;

    #[test]
    fn endpoints_map_to_first_and_last_frame() {
        assert_eq!(frame_index(0.0, N), 0);
        assert_eq!(frame_index(1.0, N), N - 1);
        assert_eq!(frame_index(1.5, N), N - 1);
        assert_eq!(frame_index(-0.2, N), 0);
        assert_eq!(frame_index(f32::NAN, N), 0);
        assert_eq!(frame_index(0.5, 0), 0);
    }

    #[test]
    fn index_is_floor_of_scaled_progress() {
        for step in 0..=1000 {
            let p = step as f32 / 1000.0;
            let expected = (p as f64 * (N - 1) as f64).floor() as usize;
            assert_eq!(frame_index(p, N), expected, "progress {p}");
        }
    }

    #[test]
    fn index_is_monotonic() {
        let mut previous = 0;
        for step in 0..=4096 {
            let index = frame_index(step as f32 / 4096.0, N);
            assert!(index >= previous);
            previous = index;
        }
    }

    #[test]
    fn light_curve_rises_then_falls() {
        let curve = LightCurve::default();
        assert_eq!(curve.opacity(0.0), 0.0);
        assert!((curve.opacity(0.5) - 0.4).abs() < 1e-6);
        assert!((curve.opacity(1.0) - 0.1).abs() < 1e-6);

        let samples: Vec<f32> = (0..=20).map(|i| curve.opacity(i as f32 / 20.0)).collect();
        for pair in samples[..=10].windows(2) {
            assert!(pair[1] > pair[0], "rising half: {pair:?}");
        }
        for pair in samples[10..].windows(2) {
            assert!(pair[1] < pair[0], "falling half: {pair:?}");
        }
    }

    #[test]
    fn mapper_combines_index_and_opacity() {
        let mapper = FrameIndexMapper::new(5, LightCurve::default());
        let target = mapper.map(0.5);
        assert_eq!(target.frame_index, 2);
        assert!((target.overlay_opacity - 0.4).abs() < 1e-6);
    }
}
