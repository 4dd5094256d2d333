use std::any::Any;
use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::probe::{MemoryProbe, SystemMemory};

/// Type-erased cached value.
pub(crate) type Resident = std::sync::Arc<dyn Any + Send + Sync>;

/// Reclaimability tier of a cached value.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strength {
    /// Never dropped by the tracker.
    Strong,
    /// Dropped by a collection pass only while memory pressure persists.
    Reclaimable,
    /// Dropped by the next collection pass.
    Discardable,
}

/// Condition under which the tracker starts softening references.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Watermark {
    /// Pressure while the probe reports less free memory than this.
    FreeMemory {
        /// Minimum free bytes to keep available.
        min_free_bytes: u64,
    },
    /// Pressure while more than `max` values are held strongly.
    StrongCount {
        /// Strong references allowed.
        max: usize,
    },
    /// Pressure while the summed weight of resident values exceeds `max_bytes`.
    ResidentBytes {
        /// Resident weight allowed.
        max_bytes: u64,
    },
}

impl Default for Watermark {
    fn default() -> Self {
        Watermark::FreeMemory {
            min_free_bytes: 256 * 1024 * 1024,
        }
    }
}

/// How often a failing loader is retried.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Load attempts allowed before the reference stays empty until
    /// [`super::VirtualReference::reset_failures`] is called.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 2 }
    }
}

/// Tracker configuration.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerOptions {
    /// Tier a softened reference drops to.
    pub soften_to: Strength,
    /// Pressure condition.
    pub watermark: Watermark,
    /// Loader retry policy for references sharing this tracker.
    pub retry: RetryPolicy,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            soften_to: Strength::Reclaimable,
            watermark: Watermark::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl TrackerOptions {
    /// Sets the tier softened references drop to.
    pub fn soften_to(mut self, strength: Strength) -> Self {
        self.soften_to = strength;
        self
    }

    /// Sets the pressure condition.
    pub fn watermark(mut self, watermark: Watermark) -> Self {
        self.watermark = watermark;
        self
    }

    /// Sets the retry policy.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Counters describing tracker activity.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct TrackerStats {
    /// Successful loads reported.
    pub loads: u64,
    /// References softened.
    pub softened: u64,
    /// Values dropped by collection, reclaim, or invalidation.
    pub collected: u64,
    /// Values currently resident.
    pub resident: usize,
    /// Values currently held strongly.
    pub strong: usize,
    /// Summed weight of resident values.
    pub resident_bytes: u64,
}

/// Handle of one tracked reference inside the tracker arena.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct SlotId {
    index: u32,
    generation: u32,
}

struct Slot {
    value: Option<Resident>,
    strength: Strength,
    weight: u64,
    generation: u32,
    // Sequence number of the load currently held; 0 when empty.
    load_seq: u64,
    in_use: bool,
}

// One load, in load order. Stale once the slot's `load_seq` moves on.
#[derive(Copy, Clone, Debug)]
struct QueueEntry {
    id: SlotId,
    seq: u64,
}

/// Queue length tolerated below which no compaction pass runs.
const QUEUE_SLACK: usize = 16;

#[derive(Default)]
struct Inner {
    slots: Vec<Slot>,
    free: Vec<u32>,
    queue: VecDeque<QueueEntry>,
    next_seq: u64,
    stats: TrackerStats,
}

impl Inner {
    fn slot(&self, id: SlotId) -> Option<&Slot> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.in_use && s.generation == id.generation)
    }

    fn slot_mut(&mut self, id: SlotId) -> Option<&mut Slot> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.in_use && s.generation == id.generation)
    }

    // The queue entry still describes the slot's current strong load.
    fn is_current(&self, entry: &QueueEntry) -> bool {
        self.slot(entry.id).map_or(false, |s| {
            s.value.is_some() && s.load_seq == entry.seq && s.strength == Strength::Strong
        })
    }

    // Drops stale entries once they outnumber the strong loads.
    fn compact_queue(&mut self) {
        if self.queue.len() <= 2 * self.stats.strong + QUEUE_SLACK {
            return;
        }
        let before = self.queue.len();
        let mut queue = std::mem::take(&mut self.queue);
        queue.retain(|entry| self.is_current(entry));
        self.queue = queue;
        trace!(before, after = self.queue.len(), "cache.tracker.queue.compacted");
    }

    fn take(&mut self, index: usize, dropped: &mut Vec<Resident>) {
        let slot = &mut self.slots[index];
        slot.load_seq = 0;
        if let Some(value) = slot.value.take() {
            self.stats.resident -= 1;
            self.stats.resident_bytes -= slot.weight;
            if slot.strength == Strength::Strong {
                self.stats.strong -= 1;
            }
            self.stats.collected += 1;
            dropped.push(value);
        }
    }
}

/// Ranks loaded values by load order and softens the oldest under pressure.
///
/// One tracker is shared, through an `Arc`, by every reference of a cache
/// group so eviction is fair across the group. It holds slot indices, never
/// the references themselves.
pub struct ReferenceTracker {
    opts: TrackerOptions,
    probe: Box<dyn MemoryProbe>,
    inner: Mutex<Inner>,
}

impl ReferenceTracker {
    /// Creates a tracker reading free memory from the operating system.
    pub fn new(opts: TrackerOptions) -> Self {
        Self::with_probe(opts, Box::new(SystemMemory))
    }

    /// Creates a tracker with a custom free-memory probe.
    pub fn with_probe(opts: TrackerOptions, probe: Box<dyn MemoryProbe>) -> Self {
        Self {
            opts,
            probe,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Configuration in effect.
    pub fn options(&self) -> &TrackerOptions {
        &self.opts
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> TrackerStats {
        self.inner.lock().stats.clone()
    }

    pub(crate) fn register(&self) -> SlotId {
        let mut inner = self.inner.lock();
        let index = match inner.free.pop() {
            Some(index) => index,
            None => {
                inner.slots.push(Slot {
                    value: None,
                    strength: Strength::Strong,
                    weight: 0,
                    generation: 0,
                    load_seq: 0,
                    in_use: false,
                });
                (inner.slots.len() - 1) as u32
            }
        };
        let slot = &mut inner.slots[index as usize];
        slot.in_use = true;
        SlotId {
            index,
            generation: slot.generation,
        }
    }

    pub(crate) fn release(&self, id: SlotId) {
        let mut dropped = Vec::new();
        {
            let mut inner = self.inner.lock();
            if inner.slot(id).is_none() {
                return;
            }
            let index = id.index as usize;
            inner.take(index, &mut dropped);
            let slot = &mut inner.slots[index];
            slot.in_use = false;
            slot.generation = slot.generation.wrapping_add(1);
            inner.free.push(id.index);
            inner.compact_queue();
        }
        drop(dropped);
    }

    pub(crate) fn value(&self, id: SlotId) -> Option<Resident> {
        self.inner.lock().slot(id).and_then(|s| s.value.clone())
    }

    pub(crate) fn strength(&self, id: SlotId) -> Option<Strength> {
        self.inner
            .lock()
            .slot(id)
            .filter(|s| s.value.is_some())
            .map(|s| s.strength)
    }

    pub(crate) fn invalidate(&self, id: SlotId) -> bool {
        let mut dropped = Vec::new();
        {
            let mut inner = self.inner.lock();
            if inner.slot(id).is_some() {
                inner.take(id.index as usize, &mut dropped);
                inner.compact_queue();
            }
        }
        !dropped.is_empty()
    }

    /// Records a successful load and softens the oldest loads while the
    /// watermark is exceeded.
    ///
    /// Runs on the loading thread. It may drop values of other references;
    /// those reload on their next `get()`.
    pub(crate) fn on_loaded(&self, id: SlotId, value: Resident, weight: u64) {
        let mut dropped = Vec::new();
        {
            let mut inner = self.inner.lock();
            inner.next_seq += 1;
            let seq = inner.next_seq;
            let Some(slot) = inner.slot_mut(id) else {
                return;
            };
            slot.load_seq = seq;
            let previous = slot.value.replace(value);
            let was_strong = previous.is_some() && slot.strength == Strength::Strong;
            let old_weight = if previous.is_some() { slot.weight } else { 0 };
            slot.strength = Strength::Strong;
            slot.weight = weight;
            if let Some(previous) = previous {
                dropped.push(previous);
            } else {
                inner.stats.resident += 1;
            }
            if !was_strong {
                inner.stats.strong += 1;
            }
            inner.stats.resident_bytes = inner.stats.resident_bytes - old_weight + weight;
            inner.stats.loads += 1;
            inner.queue.push_back(QueueEntry { id, seq });
            inner.compact_queue();
            trace!(slot = id.index, weight, "cache.tracker.loaded");

            while self.under_pressure(&inner) {
                let Some(victim) = self.pop_oldest_strong(&mut inner) else {
                    break;
                };
                self.soften(&mut inner, victim);
                self.collect(&mut inner, &mut dropped);
            }
        }
        drop(dropped);
    }

    fn under_pressure(&self, inner: &Inner) -> bool {
        match &self.opts.watermark {
            Watermark::FreeMemory { min_free_bytes } => self
                .probe
                .available_bytes()
                .map_or(false, |free| free < *min_free_bytes),
            Watermark::StrongCount { max } => inner.stats.strong > *max,
            Watermark::ResidentBytes { max_bytes } => inner.stats.resident_bytes > *max_bytes,
        }
    }

    fn pop_oldest_strong(&self, inner: &mut Inner) -> Option<SlotId> {
        while let Some(entry) = inner.queue.pop_front() {
            if inner.is_current(&entry) {
                return Some(entry.id);
            }
        }
        None
    }

    fn soften(&self, inner: &mut Inner, id: SlotId) {
        if let Some(slot) = inner.slot_mut(id) {
            slot.strength = self.opts.soften_to;
            inner.stats.strong -= 1;
            inner.stats.softened += 1;
            debug!(slot = id.index, to = ?self.opts.soften_to, "cache.tracker.softened");
        }
    }

    fn collect(&self, inner: &mut Inner, dropped: &mut Vec<Resident>) {
        let before = dropped.len();
        for index in 0..inner.slots.len() {
            let slot = &inner.slots[index];
            if slot.value.is_none() {
                continue;
            }
            let drop_it = match slot.strength {
                Strength::Strong => false,
                Strength::Discardable => true,
                Strength::Reclaimable => self.under_pressure(inner),
            };
            if drop_it {
                inner.take(index, dropped);
            }
        }
        if dropped.len() > before {
            debug!(dropped = dropped.len() - before, "cache.tracker.collected");
        }
    }

    /// Drops every softened value regardless of pressure. Returns how many.
    pub fn reclaim(&self) -> usize {
        let mut dropped = Vec::new();
        {
            let mut inner = self.inner.lock();
            for index in 0..inner.slots.len() {
                let slot = &inner.slots[index];
                if slot.value.is_some() && slot.strength != Strength::Strong {
                    inner.take(index, &mut dropped);
                }
            }
        }
        let count = dropped.len();
        drop(dropped);
        if count > 0 {
            debug!(dropped = count, "cache.tracker.reclaimed");
        }
        count
    }
}

impl std::fmt::Debug for ReferenceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceTracker")
            .field("opts", &self.opts)
            .field("stats", &self.stats())
            .finish()
    }
}
