//! Fan-out/fan-in preloading of the frame set.
//!
//! Every frame is requested from a [`FrameSource`] and answered through a
//! one-shot [`FetchReply`]. Replies may arrive in any order and from any
//! thread the source chooses; the loader publishes each raster into the
//! shared [`FrameStore`] as it arrives and settles the [`LoadHandle`] as soon
//! as the outcome is known: ready once every frame is in, failed on the first
//! fetch error without waiting for the rest.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
#[cfg(not(target_arch = "wasm32"))]
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex};

use crate::error::{DecodeError, FetchError, FrameLoadError};
use crate::frame::{FrameImage, FrameSpec, FrameStore};

/// Raster delivered by a source, together with the result of the optional
/// decode pre-pass.
#[derive(Debug)]
pub struct Fetched<I> {
    pub image: I,
    pub decode: Result<(), DecodeError>,
}

impl<I> Fetched<I> {
    pub fn decoded(image: I) -> Self {
        Self {
            image,
            decode: Ok(()),
        }
    }

    pub fn degraded(image: I, err: DecodeError) -> Self {
        Self {
            image,
            decode: Err(err),
        }
    }
}

/// Retrieves frame rasters on behalf of the loader.
pub trait FrameSource: Sized {
    type Image: FrameImage;

    /// Starts retrieving `spec`. The source must eventually call
    /// [`FetchReply::complete`]; dropping the reply counts as a fetch failure.
    fn request(&self, spec: &FrameSpec, reply: FetchReply<Self>);
}

/// One-shot completion handle for a single frame request.
pub struct FetchReply<S: FrameSource> {
    shared: Option<Arc<LoadShared<S>>>,
    index: usize,
}

impl<S: FrameSource> FetchReply<S> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn complete(mut self, result: Result<Fetched<S::Image>, FetchError>) {
        if let Some(shared) = self.shared.take() {
            shared.complete(self.index, result);
        }
    }
}

impl<S: FrameSource> Drop for FetchReply<S> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.complete(
                self.index,
                Err(FetchError::new("request dropped without a reply")),
            );
        }
    }
}

/// Observable state of a preload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Loading { loaded: usize, total: usize },
    Ready,
    Failed(FrameLoadError),
}

/// Issues frame requests, optionally capping how many are in flight.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameLoader {
    max_in_flight: Option<usize>,
}

impl FrameLoader {
    /// Loader that issues every request at once.
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps concurrent requests. `None` (or zero) means unbounded.
    pub fn with_max_in_flight(max_in_flight: Option<usize>) -> Self {
        Self {
            max_in_flight: max_in_flight.filter(|limit| *limit > 0),
        }
    }

    /// Starts loading `specs` from `source` into a fresh store.
    pub fn load<S: FrameSource>(&self, source: Arc<S>, specs: Vec<FrameSpec>) -> LoadHandle<S> {
        let total = specs.len();
        info!(
            "Preloading {total} frame(s){}",
            self.max_in_flight
                .map(|limit| format!(" ({limit} in flight)"))
                .unwrap_or_default()
        );
        let shared = Arc::new(LoadShared {
            source,
            store: Arc::new(FrameStore::new(total)),
            specs,
            limit: self.max_in_flight.unwrap_or(usize::MAX),
            progress: Mutex::new(Progress {
                next: 0,
                in_flight: 0,
                pumping: false,
                outcome: if total == 0 { Some(Ok(())) } else { None },
                degraded: Vec::new(),
            }),
            settled: Condvar::new(),
        });
        LoadShared::pump(&shared);
        LoadHandle { shared }
    }
}

/// Handle onto a running or settled preload.
pub struct LoadHandle<S: FrameSource> {
    shared: Arc<LoadShared<S>>,
}

impl<S: FrameSource> Clone for LoadHandle<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: FrameSource> LoadHandle<S> {
    pub fn store(&self) -> Arc<FrameStore<S::Image>> {
        Arc::clone(&self.shared.store)
    }

    pub fn state(&self) -> LoadState {
        let progress = self.shared.progress.lock();
        match &progress.outcome {
            Some(Ok(())) => LoadState::Ready,
            Some(Err(err)) => LoadState::Failed(err.clone()),
            None => LoadState::Loading {
                loaded: self.shared.store.loaded_count(),
                total: self.shared.store.len(),
            },
        }
    }

    /// `None` while loading, then the settled result.
    pub fn outcome(&self) -> Option<Result<(), FrameLoadError>> {
        self.shared.progress.lock().outcome.clone()
    }

    /// Indices whose decode pre-pass failed but whose raw raster was kept.
    pub fn degraded(&self) -> Vec<usize> {
        self.shared.progress.lock().degraded.clone()
    }

    /// Blocks until the preload settles.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn wait(&self) -> Result<(), FrameLoadError> {
        let mut progress = self.shared.progress.lock();
        loop {
            if let Some(outcome) = progress.outcome.clone() {
                return outcome;
            }
            self.shared.settled.wait(&mut progress);
        }
    }

    /// Like [`LoadHandle::wait`], giving up after `timeout`.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), FrameLoadError>> {
        let mut progress = self.shared.progress.lock();
        if progress.outcome.is_none() {
            let _ = self
                .shared
                .settled
                .wait_while_for(&mut progress, |p| p.outcome.is_none(), timeout);
        }
        progress.outcome.clone()
    }
}

struct Progress {
    next: usize,
    in_flight: usize,
    pumping: bool,
    outcome: Option<Result<(), FrameLoadError>>,
    degraded: Vec<usize>,
}

struct LoadShared<S: FrameSource> {
    source: Arc<S>,
    store: Arc<FrameStore<S::Image>>,
    specs: Vec<FrameSpec>,
    limit: usize,
    progress: Mutex<Progress>,
    settled: Condvar,
}

impl<S: FrameSource> LoadShared<S> {
    /// Issues requests until the in-flight cap is reached. Only one caller
    /// pumps at a time; the flag is cleared under the same lock that checks
    /// for remaining work, so a completion racing with the pump never stalls.
    fn pump(this: &Arc<Self>) {
        {
            let mut progress = this.progress.lock();
            if progress.pumping {
                return;
            }
            progress.pumping = true;
        }
        loop {
            let index = {
                let mut progress = this.progress.lock();
                // Only a capped load stops issuing after a failure.
                let stop_issuing =
                    this.limit != usize::MAX && matches!(progress.outcome, Some(Err(_)));
                if stop_issuing
                    || progress.next >= this.specs.len()
                    || progress.in_flight >= this.limit
                {
                    progress.pumping = false;
                    return;
                }
                let index = progress.next;
                progress.next += 1;
                progress.in_flight += 1;
                index
            };
            debug!("requesting {}", this.specs[index].source);
            let reply = FetchReply {
                shared: Some(Arc::clone(this)),
                index,
            };
            this.source.request(&this.specs[index], reply);
        }
    }

    fn complete(self: Arc<Self>, index: usize, result: Result<Fetched<S::Image>, FetchError>) {
        match result {
            Ok(fetched) => {
                if let Err(err) = &fetched.decode {
                    warn!("frame {index} decode pre-pass failed, using raw raster: {err}");
                    self.progress.lock().degraded.push(index);
                }
                self.store.publish(index, fetched.image);
                let mut progress = self.progress.lock();
                progress.in_flight = progress.in_flight.saturating_sub(1);
                if progress.outcome.is_none() && self.store.all_ready() {
                    info!("All {} frame(s) loaded", self.store.len());
                    progress.outcome = Some(Ok(()));
                    self.settled.notify_all();
                }
            }
            Err(err) => {
                self.store.mark_failed(index);
                let mut progress = self.progress.lock();
                progress.in_flight = progress.in_flight.saturating_sub(1);
                if progress.outcome.is_none() {
                    error!("frame {index} failed to load: {err}");
                    progress.outcome = Some(Err(FrameLoadError::fetch(index, err.0)));
                    self.settled.notify_all();
                } else {
                    debug!("frame {index} failed after the preload settled: {err}");
                }
            }
        }
        Self::pump(&self);
    }
}

/// Per-request resources a source keeps alive until the request settles,
/// such as the event listeners attached for one frame.
///
/// Single-threaded: meant for sources that complete on the host thread.
pub struct RequestResources<T> {
    slots: Rc<RefCell<HashMap<usize, T>>>,
}

impl<T> Clone for RequestResources<T> {
    fn clone(&self) -> Self {
        Self {
            slots: Rc::clone(&self.slots),
        }
    }
}

impl<T> Default for RequestResources<T> {
    fn default() -> Self {
        Self {
            slots: Rc::new(RefCell::new(HashMap::new())),
        }
    }
}

impl<T> RequestResources<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Holds `resource` for request `index`, replacing an earlier one.
    pub fn hold(&self, index: usize, resource: T) {
        self.slots.borrow_mut().insert(index, resource);
    }

    /// Hands back what was held for `index` so the caller decides when to
    /// drop it.
    pub fn settle(&self, index: usize) -> Option<T> {
        self.slots.borrow_mut().remove(&index)
    }

    /// Requests still holding resources.
    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedSource;
    use super::*;
    use crate::frame::{sequence_specs, FrameStatus};

    fn specs(count: usize) -> Vec<FrameSpec> {
        sequence_specs("{name}.png", count)
    }

    #[test]
    fn resolves_when_every_frame_loads() {
        let handle = FrameLoader::new().load(Arc::new(ScriptedSource::immediate()), specs(5));
        assert_eq!(handle.state(), LoadState::Ready);
        assert!(handle.store().all_ready());
        assert_eq!(handle.wait(), Ok(()));
    }

    #[test]
    fn rejects_with_the_failing_index() {
        let source = Arc::new(ScriptedSource::immediate().failing(1));
        let handle = FrameLoader::new().load(Arc::clone(&source), specs(5));
        match handle.outcome() {
            Some(Err(FrameLoadError::FetchFailure { index, .. })) => assert_eq!(index, 1),
            other => panic!("unexpected outcome {other:?}"),
        }
        let store = handle.store();
        assert!(!store.all_ready());
        assert_eq!(store.get(1).unwrap().status, FrameStatus::Failed);
        // The rest of the fan-out still lands in the store.
        assert_eq!(store.loaded_count(), 4);
    }

    #[test]
    fn fails_fast_while_other_fetches_are_in_flight() {
        let source = Arc::new(ScriptedSource::deferred().failing(1));
        let handle = FrameLoader::new().load(Arc::clone(&source), specs(5));
        assert_eq!(handle.state(), LoadState::Loading { loaded: 0, total: 5 });

        source.release(3);
        source.release(1);
        assert_eq!(handle.outcome().map(|r| r.map_err(|e| e.index())), Some(Err(1)));

        source.release(0);
        source.release(4);
        source.release(2);
        assert_eq!(handle.store().loaded_count(), 4);
        assert!(matches!(handle.state(), LoadState::Failed(_)));
    }

    #[test]
    fn out_of_order_arrivals_fill_the_store() {
        let source = Arc::new(ScriptedSource::deferred());
        let handle = FrameLoader::new().load(Arc::clone(&source), specs(4));
        for index in [2, 0, 3] {
            source.release(index);
        }
        assert_eq!(handle.state(), LoadState::Loading { loaded: 3, total: 4 });
        source.release(1);
        assert_eq!(handle.state(), LoadState::Ready);
        assert_eq!(handle.store().image(2).unwrap().index, 2);
    }

    #[test]
    fn degraded_decode_still_counts_as_loaded() {
        let mut source = ScriptedSource::immediate();
        source.degraded.insert(2);
        let handle = FrameLoader::new().load(Arc::new(source), specs(3));
        assert_eq!(handle.outcome(), Some(Ok(())));
        assert_eq!(handle.degraded(), vec![2]);
    }

    #[test]
    fn bounded_loader_caps_requests_in_flight() {
        let source = Arc::new(ScriptedSource::deferred());
        let handle =
            FrameLoader::with_max_in_flight(Some(2)).load(Arc::clone(&source), specs(5));
        assert_eq!(*source.requested.borrow(), vec![0, 1]);

        source.release(1);
        assert_eq!(*source.requested.borrow(), vec![0, 1, 2]);
        source.release(0);
        source.release(2);
        source.release(3);
        source.release(4);
        assert_eq!(handle.outcome(), Some(Ok(())));
    }

    #[test]
    fn bounded_loader_stops_issuing_after_failure() {
        let source = Arc::new(ScriptedSource::deferred().failing(0));
        let handle =
            FrameLoader::with_max_in_flight(Some(2)).load(Arc::clone(&source), specs(5));
        source.release(0);
        assert!(matches!(handle.state(), LoadState::Failed(_)));
        assert_eq!(*source.requested.borrow(), vec![0, 1]);
    }

    #[test]
    fn dropped_reply_is_a_fetch_failure() {
        struct Forgetful;
        impl FrameSource for Forgetful {
            type Image = super::testing::Swatch;
            fn request(&self, _spec: &FrameSpec, _reply: FetchReply<Self>) {}
        }
        let handle = FrameLoader::new().load(Arc::new(Forgetful), specs(2));
        assert_eq!(handle.outcome().map(|r| r.map_err(|e| e.index())), Some(Err(0)));
    }

    #[test]
    fn empty_sequence_is_immediately_ready() {
        let handle = FrameLoader::new().load(Arc::new(ScriptedSource::immediate()), Vec::new());
        assert_eq!(handle.state(), LoadState::Ready);
    }

    #[test]
    fn request_resources_are_released_as_requests_settle() {
        let resources = RequestResources::new();
        let marker = Rc::new(());
        for index in 0..3 {
            resources.hold(index, Rc::clone(&marker));
        }
        assert_eq!(resources.len(), 3);
        assert_eq!(Rc::strong_count(&marker), 4);

        let shared = resources.clone();
        drop(shared.settle(1));
        assert!(shared.settle(1).is_none());
        assert_eq!(resources.len(), 2);
        assert_eq!(Rc::strong_count(&marker), 3);

        drop(resources.settle(0));
        drop(resources.settle(2));
        assert!(resources.is_empty());
        assert_eq!(Rc::strong_count(&marker), 1);
    }
}
