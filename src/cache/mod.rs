//! Memory-bounded cache of lazily loaded values.
//!
//! A [`VirtualReference`] owns a loader and asks a shared
//! [`ReferenceTracker`] to hold the loaded value. The tracker keeps values in
//! an arena, ranks them by load order, and softens the oldest strong ones
//! whenever its [`Watermark`] is exceeded:
//!
//! ```text
//! get() ─miss─▶ lock ─▶ recheck ─▶ load ─▶ on_loaded ─▶ while pressure:
//!                                                         pop oldest strong
//!                                                         soften
//!                                                         collect
//! ```
//!
//! Eviction follows load order only. A value loaded once and read often is
//! softened no later than one loaded after it.

mod archive;
mod probe;
mod reference;
mod tracker;

pub use archive::ArchiveLoader;
pub use probe::{FixedMemory, MemoryProbe, SystemMemory};
pub use reference::{Loader, VirtualReference};
pub use tracker::{
    ReferenceTracker, RetryPolicy, SlotId, Strength, TrackerOptions, TrackerStats, Watermark,
};
