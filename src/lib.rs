//! Scroll-synchronized image sequence playback.
//!
//! A fixed set of still frames is preloaded, the scroll position over a
//! pinned track is turned into a progress value, and that progress selects
//! the frame painted on a full-viewport surface together with the opacity of
//! a dimming overlay. Wide viewports scrub the sequence with the scroll
//! position; compact viewports play it on a timer once the track is reached.
//!
//! Hosts plug in through small traits ([`FrameSource`], [`Surface`],
//! [`OverlayLayer`], [`Ticker`], [`ViewportObserver`], [`PinnedTrack`]) so
//! the same engine drives a browser page on `wasm32` and the native preview
//! and headless tooling everywhere else.

pub mod app;
pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod loader;
pub mod manifest;
pub mod mapper;
pub mod overlay;
pub mod progress;
pub mod render;
pub mod scroll;
#[cfg(not(target_arch = "wasm32"))]
pub mod source;
pub mod ticker;
pub mod viewport;
#[cfg(target_arch = "wasm32")]
pub mod web;

pub use app::VirtualPage;
pub use config::EngineConfig;
pub use engine::{EngineHost, EngineState, SequenceEngine};
pub use error::{DecodeError, FetchError, FrameLoadError};
pub use frame::{Frame, FrameImage, FrameSpec, FrameStatus, FrameStore};
pub use loader::{
    FetchReply, Fetched, FrameLoader, FrameSource, LoadHandle, LoadState, RequestResources,
};
pub use mapper::{FrameIndexMapper, LightCurve, PlaybackTarget};
pub use overlay::{OverlayController, OverlayLayer, SharedOpacity};
pub use progress::{progress_channel, ProgressPublisher, ProgressSubscriber};
pub use render::{cover_fit, DrawGeometry, PaintOutcome, RasterSurface, Renderer, Surface};
pub use scroll::{PlaybackStrategy, ScrollBinder};
#[cfg(not(target_arch = "wasm32"))]
pub use source::DirectorySource;
pub use ticker::{ManualTicker, Tick, Ticker};
pub use viewport::{PinnedTrack, TrackMetrics, ViewportClass, ViewportEvent, ViewportObserver};
