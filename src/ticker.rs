//! Animation scheduling.
//!
//! The engine never reaches for a global frame clock. It receives a
//! [`Ticker`] and registers one callback with it for as long as it needs
//! tick-cadence work. [`ManualTicker`] steps time explicitly and drives both
//! the tests and the native preview loop; the web host supplies a
//! `requestAnimationFrame` backed implementation.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

/// Timestamp handed to tick callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tick {
    pub now: Duration,
    pub delta: Duration,
}

pub type TickCallback = Box<dyn FnMut(Tick)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TickerToken(u64);

/// Scheduler that invokes registered callbacks once per animation frame.
pub trait Ticker {
    fn register(&self, callback: TickCallback) -> TickerToken;

    /// Returns false when the token was not registered.
    fn unregister(&self, token: TickerToken) -> bool;
}

/// Callback table shared by ticker implementations.
///
/// Callbacks may register or unregister (themselves included) while a tick
/// is being dispatched; removals take effect immediately, additions on the
/// next tick.
#[derive(Default)]
pub struct TickRegistry {
    next_token: Cell<u64>,
    callbacks: RefCell<BTreeMap<TickerToken, Rc<RefCell<TickCallback>>>>,
}

impl TickRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, callback: TickCallback) -> TickerToken {
        let token = TickerToken(self.next_token.get());
        self.next_token.set(token.0 + 1);
        self.callbacks
            .borrow_mut()
            .insert(token, Rc::new(RefCell::new(callback)));
        token
    }

    pub fn remove(&self, token: TickerToken) -> bool {
        self.callbacks.borrow_mut().remove(&token).is_some()
    }

    pub fn len(&self) -> usize {
        self.callbacks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.borrow().is_empty()
    }

    /// Runs every callback registered before the dispatch started and still
    /// registered when its turn comes. Returns how many ran.
    pub fn dispatch(&self, tick: Tick) -> usize {
        let snapshot: Vec<_> = self
            .callbacks
            .borrow()
            .iter()
            .map(|(token, callback)| (*token, Rc::clone(callback)))
            .collect();
        let mut ran = 0;
        for (token, callback) in snapshot {
            if !self.callbacks.borrow().contains_key(&token) {
                continue;
            }
            // A callback that re-enters dispatch is skipped on the inner pass.
            let Ok(mut callback) = callback.try_borrow_mut() else {
                continue;
            };
            (*callback)(tick);
            ran += 1;
        }
        ran
    }
}

/// Ticker whose clock only moves when [`ManualTicker::advance`] is called.
#[derive(Default)]
pub struct ManualTicker {
    registry: TickRegistry,
    now: Cell<Duration>,
    registrations: Cell<usize>,
    unregistrations: Cell<usize>,
}

impl ManualTicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward and runs one tick.
    pub fn advance(&self, delta: Duration) -> usize {
        let now = self.now.get() + delta;
        self.now.set(now);
        self.registry.dispatch(Tick { now, delta })
    }

    pub fn now(&self) -> Duration {
        self.now.get()
    }

    /// Callbacks currently registered.
    pub fn active(&self) -> usize {
        self.registry.len()
    }

    pub fn registrations(&self) -> usize {
        self.registrations.get()
    }

    pub fn unregistrations(&self) -> usize {
        self.unregistrations.get()
    }
}

impl Ticker for ManualTicker {
    fn register(&self, callback: TickCallback) -> TickerToken {
        self.registrations.set(self.registrations.get() + 1);
        self.registry.insert(callback)
    }

    fn unregister(&self, token: TickerToken) -> bool {
        let removed = self.registry.remove(token);
        if removed {
            self.unregistrations.set(self.unregistrations.get() + 1);
        }
        removed
    }
}

impl<T> Ticker for Rc<T>
where
    T: Ticker + ?Sized,
{
    fn register(&self, callback: TickCallback) -> TickerToken {
        (**self).register(callback)
    }

    fn unregister(&self, token: TickerToken) -> bool {
        (**self).unregister(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: Duration = Duration::from_millis(16);

    #[test]
    fn advance_runs_registered_callbacks() {
        let ticker = ManualTicker::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        ticker.register(Box::new(move |tick| sink.borrow_mut().push(tick.now)));

        ticker.advance(FRAME);
        ticker.advance(FRAME);
        assert_eq!(*seen.borrow(), vec![FRAME, FRAME * 2]);
    }

    #[test]
    fn unregistered_callbacks_stop_firing() {
        let ticker = ManualTicker::new();
        let count = Rc::new(Cell::new(0));
        let counter = Rc::clone(&count);
        let token = ticker.register(Box::new(move |_| counter.set(counter.get() + 1)));
        ticker.advance(FRAME);
        assert!(ticker.unregister(token));
        assert!(!ticker.unregister(token));
        ticker.advance(FRAME);
        assert_eq!(count.get(), 1);
        assert_eq!(ticker.active(), 0);
        assert_eq!(ticker.unregistrations(), 1);
    }

    #[test]
    fn callback_can_unregister_a_later_callback_mid_tick() {
        let ticker = Rc::new(ManualTicker::new());
        let fired = Rc::new(Cell::new(false));
        let victim = Rc::new(Cell::new(None));

        let handle = Rc::clone(&ticker);
        let target = Rc::clone(&victim);
        ticker.register(Box::new(move |_| {
            if let Some(token) = target.get() {
                handle.unregister(token);
            }
        }));
        let flag = Rc::clone(&fired);
        victim.set(Some(ticker.register(Box::new(move |_| flag.set(true)))));

        assert_eq!(ticker.advance(FRAME), 1);
        assert!(!fired.get());
    }

    #[test]
    fn callback_can_unregister_itself() {
        let ticker = Rc::new(ManualTicker::new());
        let own = Rc::new(Cell::new(None));
        let handle = Rc::clone(&ticker);
        let slot = Rc::clone(&own);
        own.set(Some(ticker.register(Box::new(move |_| {
            if let Some(token) = slot.get() {
                handle.unregister(token);
            }
        }))));
        assert_eq!(ticker.advance(FRAME), 1);
        assert_eq!(ticker.advance(FRAME), 0);
    }
}
