use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::frame::{sequence_duration, sequence_specs, FrameSpec, DEFAULT_FRAME_COUNT};
use crate::loader::FrameLoader;
use crate::mapper::LightCurve;

/// Source pattern of the stock hero sequence.
pub const DEFAULT_SOURCE_PATTERN: &str = "/sequence/{name}_delay-{delay}.webp";

/// Viewports narrower than this many logical pixels play the sequence on a
/// timer instead of scrubbing it.
pub const DEFAULT_COMPACT_BREAKPOINT: f64 = 1024.0;

/// Tunables of a [`crate::SequenceEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub frame_count: usize,
    pub source_pattern: String,
    pub compact_breakpoint: f64,
    /// Length of the compact-viewport ramp. `None` plays the frames at their
    /// nominal delays.
    pub autoplay_duration: Option<Duration>,
    pub light_curve: LightCurve,
    /// Time constant of the overlay easing; zero applies the curve directly.
    pub overlay_lag: Duration,
    pub max_in_flight: Option<usize>,
    /// Re-run viewport classification on every resize instead of only at bind.
    pub reclassify_on_resize: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frame_count: DEFAULT_FRAME_COUNT,
            source_pattern: DEFAULT_SOURCE_PATTERN.to_string(),
            compact_breakpoint: DEFAULT_COMPACT_BREAKPOINT,
            autoplay_duration: None,
            light_curve: LightCurve::default(),
            overlay_lag: Duration::ZERO,
            max_in_flight: None,
            reclassify_on_resize: false,
        }
    }
}

impl EngineConfig {
    pub fn specs(&self) -> Vec<FrameSpec> {
        sequence_specs(&self.source_pattern, self.frame_count)
    }

    pub fn autoplay_duration_for(&self, specs: &[FrameSpec]) -> Duration {
        self.autoplay_duration
            .unwrap_or_else(|| sequence_duration(specs))
    }

    pub fn loader(&self) -> FrameLoader {
        FrameLoader::with_max_in_flight(self.max_in_flight)
    }
}
