//! Dimming layer above the frame surface.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

/// Anything whose opacity can be set.
pub trait OverlayLayer {
    fn set_opacity(&mut self, opacity: f32);
}

impl<T: OverlayLayer + ?Sized> OverlayLayer for Box<T> {
    fn set_opacity(&mut self, opacity: f32) {
        (**self).set_opacity(opacity)
    }
}

/// Forwards derived opacities to a layer, clamped to [0, 1].
pub struct OverlayController<L> {
    layer: L,
}

impl<L: OverlayLayer> OverlayController<L> {
    pub fn new(layer: L) -> Self {
        Self { layer }
    }

    pub fn layer(&self) -> &L {
        &self.layer
    }

    pub fn layer_mut(&mut self) -> &mut L {
        &mut self.layer
    }

    /// Applies `opacity` and returns the value actually set.
    pub fn apply(&mut self, opacity: f32) -> f32 {
        let opacity = if opacity.is_finite() {
            opacity.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.layer.set_opacity(opacity);
        opacity
    }
}

/// Opacity cell shared between the controller and a surface that composes
/// the overlay itself.
#[derive(Debug, Clone, Default)]
pub struct SharedOpacity(Rc<Cell<f32>>);

impl SharedOpacity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> f32 {
        self.0.get()
    }
}

impl OverlayLayer for SharedOpacity {
    fn set_opacity(&mut self, opacity: f32) {
        self.0.set(opacity);
    }
}

/// Eases the applied opacity toward its target with time constant `lag`.
#[derive(Debug, Clone, Copy)]
pub struct LaggedOpacity {
    lag: Duration,
    current: Option<f32>,
}

impl LaggedOpacity {
    pub fn new(lag: Duration) -> Self {
        Self { lag, current: None }
    }

    pub fn is_enabled(&self) -> bool {
        !self.lag.is_zero()
    }

    /// Advances by `delta` toward `target`. The first step lands on the
    /// target directly.
    pub fn step(&mut self, target: f32, delta: Duration) -> f32 {
        let next = match self.current {
            Some(current) if self.is_enabled() => {
                let alpha = 1.0 - (-delta.as_secs_f32() / self.lag.as_secs_f32()).exp();
                current + (target - current) * alpha
            }
            _ => target,
        };
        self.current = Some(next);
        next
    }
}
