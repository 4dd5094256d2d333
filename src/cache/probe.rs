#![allow(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};

/// Source of the free-memory figure used by [`super::Watermark::FreeMemory`].
pub trait MemoryProbe: Send + Sync {
    /// Free physical memory in bytes, or `None` when unknown.
    fn available_bytes(&self) -> Option<u64>;
}

/// Reads available physical memory from the operating system.
///
/// On Linux this is `MemAvailable` from `/proc/meminfo`, which counts
/// reclaimable page cache. Kernels without that field fall back to the free
/// page count. Platforms without a cheap query report `None`, which the
/// tracker treats as "no pressure".
#[derive(Copy, Clone, Debug, Default)]
pub struct SystemMemory;

impl MemoryProbe for SystemMemory {
    #[cfg(target_os = "linux")]
    fn available_bytes(&self) -> Option<u64> {
        std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|text| parse_mem_available(&text))
            .or_else(free_pages_bytes)
    }

    #[cfg(not(target_os = "linux"))]
    fn available_bytes(&self) -> Option<u64> {
        None
    }
}

/// Extracts `MemAvailable` in bytes from `/proc/meminfo` text.
#[cfg(any(target_os = "linux", test))]
fn parse_mem_available(meminfo: &str) -> Option<u64> {
    let line = meminfo.lines().find(|l| l.starts_with("MemAvailable:"))?;
    let mut fields = line["MemAvailable:".len()..].split_whitespace();
    let value: u64 = fields.next()?.parse().ok()?;
    let scale = match fields.next() {
        Some("kB") => 1024,
        None => 1,
        Some(_) => return None,
    };
    value.checked_mul(scale)
}

#[cfg(target_os = "linux")]
fn free_pages_bytes() -> Option<u64> {
    // SAFETY: sysconf only reads process-independent system values.
    let (pages, page_size) =
        unsafe { (libc::sysconf(libc::_SC_AVPHYS_PAGES), libc::sysconf(libc::_SC_PAGESIZE)) };
    if pages < 0 || page_size <= 0 {
        return None;
    }
    (pages as u64).checked_mul(page_size as u64)
}

/// Probe reporting a value set by the caller.
#[derive(Debug, Default)]
pub struct FixedMemory {
    free: AtomicU64,
}

impl FixedMemory {
    /// Creates a probe reporting `free` bytes.
    pub fn new(free: u64) -> Self {
        Self {
            free: AtomicU64::new(free),
        }
    }

    /// Changes the reported value.
    pub fn set(&self, free: u64) {
        self.free.store(free, Ordering::Relaxed);
    }
}

impl MemoryProbe for FixedMemory {
    fn available_bytes(&self) -> Option<u64> {
        Some(self.free.load(Ordering::Relaxed))
    }
}

impl<P: MemoryProbe + ?Sized> MemoryProbe for std::sync::Arc<P> {
    fn available_bytes(&self) -> Option<u64> {
        (**self).available_bytes()
    }
}
