use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::tracker::{ReferenceTracker, Resident, SlotId, Strength};
use crate::types::Result;

/// Produces the value behind a [`VirtualReference`].
pub trait Loader<T>: Send + Sync {
    /// Loads the value. `Ok(None)` means there is nothing to load.
    fn load(&self) -> Result<Option<T>>;

    /// Weight charged against a [`super::Watermark::ResidentBytes`] budget.
    fn weight(&self, _value: &T) -> u64 {
        0
    }
}

impl<T, F> Loader<T> for F
where
    F: Fn() -> Result<Option<T>> + Send + Sync,
{
    fn load(&self) -> Result<Option<T>> {
        self()
    }
}

/// A lazily loaded value whose residency is managed by a shared tracker.
///
/// `get()` hands out the value while the tracker keeps it; once the tracker
/// has dropped it, the next `get()` loads it again. Only one thread runs the
/// loader of a given reference at a time; other references load in parallel.
pub struct VirtualReference<T> {
    tracker: Arc<ReferenceTracker>,
    slot: SlotId,
    loader: Box<dyn Loader<T>>,
    failures: Mutex<u32>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> VirtualReference<T> {
    /// Creates an empty reference registered with `tracker`.
    pub fn new(tracker: Arc<ReferenceTracker>, loader: impl Loader<T> + 'static) -> Self {
        let slot = tracker.register();
        Self {
            tracker,
            slot,
            loader: Box::new(loader),
            failures: Mutex::new(0),
            _marker: PhantomData,
        }
    }

    fn cached(&self) -> Option<Arc<T>> {
        self.tracker
            .value(self.slot)
            .and_then(|value| Arc::downcast::<T>(value).ok())
    }

    /// Returns the value, loading it if the tracker does not hold it.
    ///
    /// Returns `None` when the loader has nothing to offer or has failed
    /// as many times as the tracker's retry policy allows.
    pub fn get(&self) -> Option<Arc<T>> {
        if let Some(value) = self.cached() {
            return Some(value);
        }
        let mut failures = self.failures.lock();
        if let Some(value) = self.cached() {
            return Some(value);
        }
        let max_attempts = self.tracker.options().retry.max_attempts;
        if *failures >= max_attempts {
            return None;
        }
        match self.loader.load() {
            Ok(Some(value)) => {
                let weight = self.loader.weight(&value);
                let value = Arc::new(value);
                let resident: Resident = value.clone();
                self.tracker.on_loaded(self.slot, resident, weight);
                *failures = 0;
                Some(value)
            }
            Ok(None) => {
                *failures += 1;
                debug!(attempt = *failures, "cache.reference.empty");
                None
            }
            Err(err) => {
                *failures += 1;
                warn!(attempt = *failures, max_attempts, error = %err, "cache.reference.load_failed");
                None
            }
        }
    }

    /// Tier of the resident value, or `None` when nothing is resident.
    pub fn strength(&self) -> Option<Strength> {
        self.tracker.strength(self.slot)
    }

    /// Returns true while the tracker holds a value.
    pub fn is_resident(&self) -> bool {
        self.tracker.value(self.slot).is_some()
    }

    /// Drops the resident value so the next `get()` reloads it.
    pub fn invalidate(&self) -> bool {
        self.tracker.invalidate(self.slot)
    }

    /// Failed attempts since the last successful load.
    pub fn failures(&self) -> u32 {
        *self.failures.lock()
    }

    /// Forgets earlier failures so the loader is tried again.
    pub fn reset_failures(&self) {
        *self.failures.lock() = 0;
    }
}

impl<T> Drop for VirtualReference<T> {
    fn drop(&mut self) {
        self.tracker.release(self.slot);
    }
}

impl<T> std::fmt::Debug for VirtualReference<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualReference")
            .field("slot", &self.slot)
            .field("strength", &self.tracker.strength(self.slot))
            .finish()
    }
}
